//! # buildgen-syntax
//!
//! Parsed representation of one build configuration file, plus the
//! expression model that converts native values to and from the
//! configuration language's expression tree.
//!
//! The pipeline through this crate:
//!
//! 1. **Lexing/parsing** — [`parser::parse`] turns file text into a
//!    [`file::File`]: an ordered list of load statements, rule
//!    declarations with comment-carrying attributes, and opaque
//!    pass-through statements the model does not interpret.
//! 2. **Mutation** — rules expose comment-preserving attribute get/set;
//!    protected (`# keep`) rules, attributes, and list elements are
//!    visible to callers through the comment metadata.
//! 3. **Values** — [`values`] converts between native containers
//!    (sorted/unsorted string lists, globs, conditional select maps) and
//!    expressions, and implements the closed 4-case merge matrix over
//!    `{plain list, conditional map}`.
//! 4. **Emission** — [`file::File::sync`] canonicalizes the tree and
//!    [`file::File::format`] produces deterministic text: loads first,
//!    alphabetized and deduplicated, stable attribute ordering.
//!
//! No disk I/O happens here; callers own reading and writing files.

pub mod ast;
pub mod file;
pub mod lexer;
pub mod parser;
pub mod values;

pub use ast::{Arg, Expr};
pub use file::{Attr, Directive, File, LoadStmt, Rule, Stmt};
pub use parser::{parse, ParseError};
pub use values::{GlobValue, SelectValue, Value, ValueError};
