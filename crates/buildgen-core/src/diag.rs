//! Run-wide diagnostic accumulation.
//!
//! Indexing and resolution problems are not fatal: they are recorded here,
//! logged as they happen, and reported at the end of the run. Only under
//! strict mode do accumulated diagnostics turn into a failing outcome.
//!
//! The accumulator is an explicit object threaded through the call chain,
//! scoped to a single invocation. There is deliberately no process-global
//! state.

use std::fmt;

/// One recorded problem. All variants carry enough identifying detail to
/// locate the offending rule or import without re-running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A file could not be parsed; processing of that file was skipped.
    ParseFailure { path: String, message: String },
    /// Multiple existing rules matched one generated rule; no mutation was
    /// performed for it.
    AmbiguousMatch {
        kind: String,
        name: String,
        candidates: Vec<String>,
    },
    /// Multiple distinct labels satisfy one import; the dependency was
    /// omitted rather than guessed.
    AmbiguousImport {
        lang: String,
        imp: String,
        from: String,
        candidates: Vec<String>,
    },
    /// An embed relation loops back on itself.
    EmbedCycle { chain: Vec<String> },
    /// No resolver is registered for a rule's logical kind; the rule was
    /// left unmodified.
    UnresolvedKind { kind: String, pkg: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ParseFailure { path, message } => {
                write!(f, "{}: parse failure: {}", path, message)
            }
            Diagnostic::AmbiguousMatch {
                kind,
                name,
                candidates,
            } => write!(
                f,
                "multiple rules match {}(name = {:?}): {}",
                kind,
                name,
                candidates.join(", ")
            ),
            Diagnostic::AmbiguousImport {
                lang,
                imp,
                from,
                candidates,
            } => write!(
                f,
                "{}: ambiguous import {:?} ({}): candidates {}",
                from,
                imp,
                lang,
                candidates.join(", ")
            ),
            Diagnostic::EmbedCycle { chain } => {
                write!(f, "embed cycle: {}", chain.join(" -> "))
            }
            Diagnostic::UnresolvedKind { kind, pkg } => {
                write!(f, "//{}: no resolver for kind {:?}", pkg, kind)
            }
        }
    }
}

/// Accumulator for a single run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    strict: bool,
}

impl Diagnostics {
    pub fn new(strict: bool) -> Self {
        Diagnostics {
            items: Vec::new(),
            strict,
        }
    }

    /// Record a diagnostic, logging it immediately.
    pub fn record(&mut self, diag: Diagnostic) {
        tracing::warn!("{}", diag);
        self.items.push(diag);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Whether the run as a whole succeeded. Diagnostics fail the run only
    /// under strict mode.
    pub fn run_ok(&self) -> bool {
        !self.strict || self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ok_non_strict() {
        let mut d = Diagnostics::new(false);
        d.record(Diagnostic::UnresolvedKind {
            kind: "my_rule".into(),
            pkg: "a/b".into(),
        });
        assert!(d.run_ok());
        assert_eq!(d.items().len(), 1);
    }

    #[test]
    fn test_run_fails_strict() {
        let mut d = Diagnostics::new(true);
        assert!(d.run_ok());
        d.record(Diagnostic::EmbedCycle {
            chain: vec!["//a:a".into(), "//b:b".into(), "//a:a".into()],
        });
        assert!(!d.run_ok());
    }

    #[test]
    fn test_display_ambiguous_import() {
        let d = Diagnostic::AmbiguousImport {
            lang: "go".into(),
            imp: "example.com/x".into(),
            from: "//cmd:cmd".into(),
            candidates: vec!["//a:x".into(), "//b:x".into()],
        };
        let s = d.to_string();
        assert!(s.contains("example.com/x"));
        assert!(s.contains("//a:x, //b:x"));
    }
}
