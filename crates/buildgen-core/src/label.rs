//! Labels: fully-qualified references to rules.
//!
//! A label has three forms, in sort order:
//! - relative to the current package: `:name`
//! - absolute within the main repository: `//pkg/path:name`
//! - external repository: `@repo//pkg/path:name`
//!
//! The shorthand `//pkg/path` is equivalent to `//pkg/path:path` (last
//! package segment). Sorted string lists use [`compare_strings`], which
//! ranks the three forms before comparing lexicographically, so relative
//! references always come first and external references last.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid label {0:?}")]
pub struct LabelError(pub String);

/// A reference to a rule: repository, package path, and rule name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    /// External repository name, empty for the main repository.
    pub repo: String,
    /// Package path from the repository root, empty for the root package.
    pub pkg: String,
    /// Rule name within the package.
    pub name: String,
    /// True for `:name` references that are relative to the current package.
    pub relative: bool,
}

impl Label {
    /// A label relative to the current package (`:name`).
    pub fn relative(name: impl Into<String>) -> Self {
        Label {
            repo: String::new(),
            pkg: String::new(),
            name: name.into(),
            relative: true,
        }
    }

    /// An absolute label in the main repository (`//pkg:name`).
    pub fn absolute(pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Label {
            repo: String::new(),
            pkg: pkg.into(),
            name: name.into(),
            relative: false,
        }
    }

    /// A label in an external repository (`@repo//pkg:name`).
    pub fn external(
        repo: impl Into<String>,
        pkg: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Label {
            repo: repo.into(),
            pkg: pkg.into(),
            name: name.into(),
            relative: false,
        }
    }

    /// Rewrite this label relative to the given package: a label whose
    /// package equals `pkg` (in the main repository) becomes `:name`.
    pub fn rel_to(&self, pkg: &str) -> Label {
        if self.repo.is_empty() && !self.relative && self.pkg == pkg {
            Label::relative(self.name.clone())
        } else {
            self.clone()
        }
    }

    /// Resolve a relative label against the given package.
    pub fn abs_from(&self, pkg: &str) -> Label {
        if self.relative {
            Label::absolute(pkg, self.name.clone())
        } else {
            self.clone()
        }
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repo, rest) = if let Some(after) = s.strip_prefix('@') {
            match after.find("//") {
                Some(i) => (after[..i].to_string(), &after[i..]),
                None => return Err(LabelError(s.to_string())),
            }
        } else {
            (String::new(), s)
        };

        if let Some(name) = rest.strip_prefix(':') {
            if repo.is_empty() && !name.is_empty() && !name.contains([':', '/']) {
                return Ok(Label::relative(name));
            }
            return Err(LabelError(s.to_string()));
        }

        let rest = match rest.strip_prefix("//") {
            Some(r) => r,
            None => return Err(LabelError(s.to_string())),
        };

        let (pkg, name) = match rest.split_once(':') {
            Some((pkg, name)) => (pkg.to_string(), name.to_string()),
            None => {
                // Shorthand: //pkg/path means //pkg/path:path.
                let name = rest.rsplit('/').next().unwrap_or(rest).to_string();
                (rest.to_string(), name)
            }
        };
        if name.is_empty() || name.contains(':') {
            return Err(LabelError(s.to_string()));
        }
        Ok(Label {
            repo,
            pkg,
            name,
            relative: false,
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            return write!(f, ":{}", self.name);
        }
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        // Use the shorthand form when the name repeats the last package segment.
        if !self.pkg.is_empty() && self.pkg.rsplit('/').next() == Some(self.name.as_str()) {
            write!(f, "//{}", self.pkg)
        } else {
            write!(f, "//{}:{}", self.pkg, self.name)
        }
    }
}

/// Sort rank of a string in a label-aware list: relative references and
/// plain strings first, then package-absolute labels, then external ones.
fn rank(s: &str) -> u8 {
    if s.starts_with("//") {
        1
    } else if s.starts_with('@') {
        2
    } else {
        0
    }
}

/// Label-aware comparator for sorted string lists.
pub fn compare_strings(a: &str, b: &str) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relative() {
        let l: Label = ":foo".parse().unwrap();
        assert!(l.relative);
        assert_eq!(l.name, "foo");
        assert_eq!(l.to_string(), ":foo");
    }

    #[test]
    fn test_parse_absolute() {
        let l: Label = "//pkg/sub:foo".parse().unwrap();
        assert_eq!(l.pkg, "pkg/sub");
        assert_eq!(l.name, "foo");
        assert_eq!(l.to_string(), "//pkg/sub:foo");
    }

    #[test]
    fn test_parse_shorthand() {
        let l: Label = "//pkg/sub".parse().unwrap();
        assert_eq!(l.name, "sub");
        assert_eq!(l.to_string(), "//pkg/sub");
    }

    #[test]
    fn test_parse_external() {
        let l: Label = "@rules_x//some/pkg:lib".parse().unwrap();
        assert_eq!(l.repo, "rules_x");
        assert_eq!(l.to_string(), "@rules_x//some/pkg:lib");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("pkg:foo".parse::<Label>().is_err());
        assert!("@norepo".parse::<Label>().is_err());
        assert!(":".parse::<Label>().is_err());
    }

    #[test]
    fn test_rel_abs_round_trip() {
        let l: Label = "//pkg:foo".parse().unwrap();
        assert_eq!(l.rel_to("pkg").to_string(), ":foo");
        assert_eq!(l.rel_to("other").to_string(), "//pkg:foo");
        assert_eq!(Label::relative("foo").abs_from("pkg").to_string(), "//pkg:foo");
    }

    #[test]
    fn test_compare_strings_ranks() {
        let mut v = vec!["@repo//x:y", "//a:b", ":local", "a.src"];
        v.sort_by(|a, b| compare_strings(a, b));
        assert_eq!(v, vec![":local", "a.src", "//a:b", "@repo//x:y"]);
    }
}
