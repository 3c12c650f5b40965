//! # buildgen-engine
//!
//! The reconciliation engine: merges freshly generated rule declarations
//! into existing configuration files and resolves import identifiers into
//! dependency labels across the repository.
//!
//! ## Pipeline
//!
//! 1. **Merge** — [`merger::Merger`] reconciles the generated rule set for
//!    one directory against its existing [`File`](buildgen_syntax::File):
//!    policy-driven matching, attribute merge honoring `# keep` markers,
//!    deletion of emptied rules, and transitive rename propagation.
//! 2. **Index** — [`index::RuleIndexBuilder`] collects, across the whole
//!    repository, which rule satisfies which import. `finish()` is a hard
//!    barrier: embeds are closed transitively (cycles reported once),
//!    candidate lists are sorted for reproducible ambiguity decisions, and
//!    the index becomes read-only.
//! 3. **Resolve** — [`meta::MetaResolver`] maps each rule's surface kind
//!    through user-declared aliasing and kind mapping to a logical kind,
//!    dispatches to the registered per-kind [`resolver::Resolver`], and
//!    writes resolved dependency labels back into the rule. Ambiguous
//!    imports are omitted and diagnosed rather than guessed.
//! 4. **Fix loads** — [`loads::fix_loads`] rewrites load statements to
//!    exactly the set of symbols the merged file references.
//!
//! Merging within one file is sequential; parallelism exists only across
//! directories, and only the index accepts concurrent contributions.

pub mod index;
pub mod kinds;
pub mod loads;
pub mod merger;
pub mod meta;
pub mod resolver;

pub use index::{FindResult, ImportSpec, RuleIndex, RuleIndexBuilder};
pub use kinds::{KindInfo, KindRegistry, LoadInfo, MappedKind, PackageKinds};
pub use loads::fix_loads;
pub use merger::Merger;
pub use meta::MetaResolver;
pub use resolver::{CrossResolver, ResolveConfig, ResolveOverride, Resolver, ResolverRegistry};

use buildgen_core::{Diagnostic, Diagnostics};
use buildgen_syntax::File;

/// Parse one directory's file, turning failure into a recorded diagnostic
/// so one malformed file never aborts the rest of the run.
pub fn parse_or_record(
    path: &str,
    pkg: &str,
    text: &str,
    diags: &mut Diagnostics,
) -> Option<File> {
    match buildgen_syntax::parse(path, pkg, text) {
        Ok(file) => Some(file),
        Err(err) => {
            diags.record(Diagnostic::ParseFailure {
                path: path.to_string(),
                message: err.to_string(),
            });
            None
        }
    }
}
