pub mod config;
pub mod diag;
pub mod label;
pub mod logging;

pub use config::Settings;
pub use diag::{Diagnostic, Diagnostics};
pub use label::Label;
