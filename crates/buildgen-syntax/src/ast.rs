//! Expression tree for the configuration language.
//!
//! A deliberately small surface: string and integer literals, identifiers,
//! lists, dicts, calls, and binary `+`. Anything outside this set stays an
//! opaque statement at the file level. String literals carry an optional
//! suffix comment so `# keep` markers on list elements survive a merge.

use std::fmt::Write as _;

/// Marker comment protecting a rule, attribute, or list element from
/// automatic deletion or replacement.
pub fn is_keep(comment: &str) -> bool {
    comment.trim_start_matches('#').trim() == "keep"
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal with an optional trailing comment (e.g. `# keep`).
    Str {
        value: String,
        suffix: Option<String>,
    },
    Ident(String),
    Int(i64),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Call { func: String, args: Vec<Arg> },
    Plus(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

impl Arg {
    pub fn expr(&self) -> &Expr {
        match self {
            Arg::Positional(e) => e,
            Arg::Keyword(_, e) => e,
        }
    }
}

impl Expr {
    pub fn string(value: impl Into<String>) -> Expr {
        Expr::Str {
            value: value.into(),
            suffix: None,
        }
    }

    pub fn list_of<S: AsRef<str>>(values: &[S]) -> Expr {
        Expr::List(values.iter().map(|v| Expr::string(v.as_ref())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match self {
            Expr::List(elems) => Some(elems),
            _ => None,
        }
    }

    /// Trailing comment on this expression, if it can carry one.
    pub fn suffix(&self) -> Option<&str> {
        match self {
            Expr::Str { suffix, .. } => suffix.as_deref(),
            _ => None,
        }
    }

    /// An empty container contributes nothing to a merged rule.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Expr::List(elems) => elems.is_empty(),
            Expr::Dict(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Render this expression at the given indent level (4 spaces each).
    /// Lists and dicts with more than one entry go one entry per line.
    pub fn write(&self, out: &mut String, indent: usize) {
        match self {
            Expr::Str { value, .. } => {
                let _ = write!(out, "{:?}", value);
            }
            Expr::Ident(name) => out.push_str(name),
            Expr::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Expr::List(elems) => write_list(out, elems, indent),
            Expr::Dict(entries) => write_dict(out, entries, indent),
            Expr::Call { func, args } => {
                out.push_str(func);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match arg {
                        Arg::Positional(e) => e.write(out, indent),
                        Arg::Keyword(name, e) => {
                            out.push_str(name);
                            out.push_str(" = ");
                            e.write(out, indent);
                        }
                    }
                }
                out.push(')');
            }
            Expr::Plus(lhs, rhs) => {
                lhs.write(out, indent);
                out.push_str(" + ");
                rhs.write(out, indent);
            }
        }
    }
}

fn write_list(out: &mut String, elems: &[Expr], indent: usize) {
    match elems {
        [] => out.push_str("[]"),
        [single] if single.suffix().is_none() => {
            out.push('[');
            single.write(out, indent);
            out.push(']');
        }
        _ => {
            out.push_str("[\n");
            for elem in elems {
                push_indent(out, indent + 1);
                elem.write(out, indent + 1);
                out.push(',');
                if let Some(c) = elem.suffix() {
                    out.push_str("  ");
                    out.push_str(c);
                }
                out.push('\n');
            }
            push_indent(out, indent);
            out.push(']');
        }
    }
}

fn write_dict(out: &mut String, entries: &[(Expr, Expr)], indent: usize) {
    if entries.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    for (key, value) in entries {
        push_indent(out, indent + 1);
        key.write(out, indent + 1);
        out.push_str(": ");
        value.write(out, indent + 1);
        out.push_str(",\n");
    }
    push_indent(out, indent);
    out.push('}');
}

pub(crate) fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}
