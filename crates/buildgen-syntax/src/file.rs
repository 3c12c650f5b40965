//! In-memory representation of one configuration file.
//!
//! A `File` is an ordered statement list: load statements, rule
//! declarations, and opaque pass-through text. Mutation happens through
//! comment-preserving accessors on [`Rule`]; [`File::sync`] flushes
//! structural normalization into the tree and [`File::format`] emits
//! deterministic text. The representation never touches disk.

use std::collections::BTreeMap;

use crate::ast::{is_keep, push_indent, Expr};

/// A directive comment (`# buildgen:key value`) found anywhere in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Load(LoadStmt),
    Rule(Rule),
    /// A statement the rule model does not interpret, preserved verbatim.
    Opaque {
        comments_before: Vec<String>,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadStmt {
    pub path: String,
    pub symbols: Vec<String>,
    pub comments_before: Vec<String>,
    pub suffix: Option<String>,
}

impl LoadStmt {
    pub fn new(path: impl Into<String>, symbols: Vec<String>) -> Self {
        LoadStmt {
            path: path.into(),
            symbols,
            comments_before: Vec::new(),
            suffix: None,
        }
    }
}

/// One attribute of a rule. `suffix` and `comments_before` carry inline
/// comments; either position may hold the `# keep` marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub expr: Expr,
    pub suffix: Option<String>,
    pub comments_before: Vec<String>,
}

impl Attr {
    pub fn keep(&self) -> bool {
        self.suffix.as_deref().is_some_and(is_keep)
            || self.comments_before.iter().any(|c| is_keep(c))
    }
}

/// One named, kinded declaration.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: String,
    pub attrs: Vec<Attr>,
    pub comments_before: Vec<String>,
    pub suffix: Option<String>,
    /// Synthetic attributes (e.g. raw imports from a language scanner).
    /// Never emitted by `format`.
    private: BTreeMap<String, Vec<String>>,
}

impl Rule {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        let mut rule = Rule {
            kind: kind.into(),
            attrs: Vec::new(),
            comments_before: Vec::new(),
            suffix: None,
            private: BTreeMap::new(),
        };
        rule.set_attr("name", Expr::string(name.into()));
        rule
    }

    pub(crate) fn from_parts(
        kind: String,
        attrs: Vec<Attr>,
        comments_before: Vec<String>,
        suffix: Option<String>,
    ) -> Self {
        Rule {
            kind,
            attrs,
            comments_before,
            suffix,
            private: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.attr_expr("name").and_then(|e| e.as_str())
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn attr_mut(&mut self, name: &str) -> Option<&mut Attr> {
        self.attrs.iter_mut().find(|a| a.name == name)
    }

    pub fn attr_expr(&self, name: &str) -> Option<&Expr> {
        self.attr(name).map(|a| &a.expr)
    }

    pub fn attr_string(&self, name: &str) -> Option<&str> {
        self.attr_expr(name).and_then(|e| e.as_str())
    }

    /// String elements of a plain list attribute.
    pub fn attr_strings(&self, name: &str) -> Option<Vec<&str>> {
        let elems = self.attr_expr(name)?.as_list()?;
        Some(elems.iter().filter_map(|e| e.as_str()).collect())
    }

    /// Set an attribute, preserving any comments already attached to it.
    pub fn set_attr(&mut self, name: &str, expr: Expr) {
        match self.attr_mut(name) {
            Some(attr) => attr.expr = expr,
            None => self.attrs.push(Attr {
                name: name.to_string(),
                expr,
                suffix: None,
                comments_before: Vec::new(),
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|a| a.name != name);
        self.attrs.len() != before
    }

    /// Whether the rule itself carries a `# keep` marker.
    pub fn keep(&self) -> bool {
        self.comments_before.iter().any(|c| is_keep(c))
            || self.suffix.as_deref().is_some_and(is_keep)
    }

    pub fn set_keep(&mut self) {
        if !self.keep() {
            self.comments_before.push("# keep".to_string());
        }
    }

    pub fn set_private(&mut self, key: &str, values: Vec<String>) {
        self.private.insert(key.to_string(), values);
    }

    pub fn private(&self, key: &str) -> Option<&[String]> {
        self.private.get(key).map(|v| v.as_slice())
    }

    /// Carry another rule's synthetic attributes over, e.g. raw imports
    /// scanned from sources onto the matched existing rule.
    pub fn copy_private_from(&mut self, other: &Rule) {
        for (key, values) in &other.private {
            self.private.insert(key.clone(), values.clone());
        }
    }

    fn write(&self, out: &mut String) {
        for c in &self.comments_before {
            out.push_str(c);
            out.push('\n');
        }
        out.push_str(&self.kind);
        out.push('(');
        if self.attrs.is_empty() {
            out.push(')');
        } else {
            out.push('\n');
            let mut ordered: Vec<&Attr> = self.attrs.iter().collect();
            ordered.sort_by_key(|a| (attr_rank(&a.name), a.name.clone()));
            for attr in ordered {
                for c in &attr.comments_before {
                    push_indent(out, 1);
                    out.push_str(c);
                    out.push('\n');
                }
                push_indent(out, 1);
                out.push_str(&attr.name);
                out.push_str(" = ");
                attr.expr.write(out, 1);
                out.push(',');
                if let Some(c) = &attr.suffix {
                    out.push_str("  ");
                    out.push_str(c);
                }
                out.push('\n');
            }
            out.push(')');
        }
        if let Some(c) = &self.suffix {
            out.push_str("  ");
            out.push_str(c);
        }
        out.push('\n');
    }
}

/// Emission order of attributes within a rule. Identity first, sources
/// next, dependency-like attributes last, everything else alphabetical in
/// the middle band.
fn attr_rank(name: &str) -> i32 {
    match name {
        "name" => 0,
        "srcs" => 10,
        "hdrs" => 11,
        "embed" => 20,
        "importpath" => 30,
        "visibility" => 80,
        "deps" => 90,
        _ => 50,
    }
}

/// Parsed in-memory representation of one configuration file.
#[derive(Debug, Clone)]
pub struct File {
    pub path: String,
    pub pkg: String,
    pub stmts: Vec<Stmt>,
    pub directives: Vec<Directive>,
    pub trailing_comments: Vec<String>,
    /// Set by the merger when any statement changed; callers use it as the
    /// changed-file signal.
    pub dirty: bool,
}

impl File {
    /// An empty file for a directory that has no configuration yet.
    pub fn new(path: impl Into<String>, pkg: impl Into<String>) -> Self {
        File {
            path: path.into(),
            pkg: pkg.into(),
            stmts: Vec::new(),
            directives: Vec::new(),
            trailing_comments: Vec::new(),
            dirty: false,
        }
    }

    pub(crate) fn from_parts(
        path: &str,
        pkg: &str,
        stmts: Vec<Stmt>,
        trailing_comments: Vec<String>,
    ) -> Self {
        let mut directives = Vec::new();
        let all_comments = stmts
            .iter()
            .flat_map(|s| match s {
                Stmt::Load(l) => l.comments_before.iter(),
                Stmt::Rule(r) => r.comments_before.iter(),
                Stmt::Opaque {
                    comments_before, ..
                } => comments_before.iter(),
            })
            .chain(trailing_comments.iter());
        for comment in all_comments {
            if let Some(d) = parse_directive(comment) {
                directives.push(d);
            }
        }
        File {
            path: path.to_string(),
            pkg: pkg.to_string(),
            stmts,
            directives,
            trailing_comments,
            dirty: false,
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Rule(r) => Some(r),
            _ => None,
        })
    }

    pub fn rules_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.stmts.iter_mut().filter_map(|s| match s {
            Stmt::Rule(r) => Some(r),
            _ => None,
        })
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.stmts.push(Stmt::Rule(rule));
        self.dirty = true;
    }

    /// Flush in-memory mutations into canonical tree shape: duplicate load
    /// statements are folded together and symbol lists sorted. Formatting
    /// applies the same normalization on emission; `sync` makes it visible
    /// to further tree inspection.
    pub fn sync(&mut self) {
        let mut merged: BTreeMap<String, LoadStmt> = BTreeMap::new();
        let mut order = Vec::new();
        for stmt in &self.stmts {
            if let Stmt::Load(l) = stmt {
                match merged.get_mut(&l.path) {
                    Some(existing) => {
                        existing.symbols.extend(l.symbols.iter().cloned());
                        // A folded statement no longer matches what was
                        // written, so its comment does not carry over.
                        existing.suffix = None;
                        existing.comments_before.clear();
                    }
                    None => {
                        merged.insert(l.path.clone(), l.clone());
                        order.push(l.path.clone());
                    }
                }
            }
        }
        for load in merged.values_mut() {
            load.symbols.sort();
            load.symbols.dedup();
        }
        self.stmts.retain(|s| !matches!(s, Stmt::Load(_)));
        // Loads are re-inserted at the top, alphabetized by source path.
        for path in merged.keys().rev() {
            self.stmts.insert(0, Stmt::Load(merged[path].clone()));
        }
    }

    /// Produce deterministic text for the whole file. Byte-for-byte
    /// idempotent: formatting the parse of previous output yields the same
    /// bytes.
    pub fn format(&self) -> String {
        let mut out = String::new();

        // Loads first, alphabetized and deduplicated.
        let mut merged: BTreeMap<String, LoadStmt> = BTreeMap::new();
        for stmt in &self.stmts {
            if let Stmt::Load(l) = stmt {
                match merged.get_mut(&l.path) {
                    Some(existing) => {
                        existing.symbols.extend(l.symbols.iter().cloned());
                        existing.suffix = None;
                        existing.comments_before.clear();
                    }
                    None => {
                        merged.insert(l.path.clone(), l.clone());
                    }
                }
            }
        }
        for load in merged.values() {
            let mut symbols = load.symbols.clone();
            symbols.sort();
            symbols.dedup();
            for c in &load.comments_before {
                out.push_str(c);
                out.push('\n');
            }
            out.push_str(&format!("load({:?}", load.path));
            for sym in &symbols {
                out.push_str(&format!(", {:?}", sym));
            }
            out.push(')');
            if let Some(c) = &load.suffix {
                out.push_str("  ");
                out.push_str(c);
            }
            out.push('\n');
        }

        for stmt in &self.stmts {
            match stmt {
                Stmt::Load(_) => {}
                Stmt::Rule(r) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    r.write(&mut out);
                }
                Stmt::Opaque {
                    comments_before,
                    text,
                } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    for c in comments_before {
                        out.push_str(c);
                        out.push('\n');
                    }
                    out.push_str(text);
                    out.push('\n');
                }
            }
        }

        if !self.trailing_comments.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            for c in &self.trailing_comments {
                out.push_str(c);
                out.push('\n');
            }
        }
        out
    }
}

fn parse_directive(comment: &str) -> Option<Directive> {
    let rest = comment.trim_start_matches('#').trim_start();
    let rest = rest.strip_prefix("buildgen:")?;
    match rest.split_once(char::is_whitespace) {
        Some((key, value)) => Some(Directive {
            key: key.to_string(),
            value: value.trim().to_string(),
        }),
        None => Some(Directive {
            key: rest.to_string(),
            value: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_format_idempotent() {
        let src = "\
load(\"//tools:rules.bzl\", \"lib\")

# keep
lib(
    name = \"x\",
    srcs = [
        \"a.go\",
        \"b.go\",  # keep
    ],
)

VERSION = \"1.2\"
";
        let f = parse("BUILD", "pkg", src).unwrap();
        let once = f.format();
        let f2 = parse("BUILD", "pkg", &once).unwrap();
        assert_eq!(f2.format(), once);
    }

    #[test]
    fn test_format_orders_loads_and_attrs() {
        let src = "load(\"//z:z.bzl\", \"zlib\")\nload(\"//a:a.bzl\", \"b\", \"a\")\nlib(deps = [\":d\"], name = \"x\")\n";
        let f = parse("BUILD", "pkg", src).unwrap();
        let text = f.format();
        let a_pos = text.find("//a:a.bzl").unwrap();
        let z_pos = text.find("//z:z.bzl").unwrap();
        assert!(a_pos < z_pos);
        assert!(text.contains("load(\"//a:a.bzl\", \"a\", \"b\")"));
        let name_pos = text.find("name = ").unwrap();
        let deps_pos = text.find("deps = ").unwrap();
        assert!(name_pos < deps_pos);
    }

    #[test]
    fn test_set_attr_preserves_comment() {
        let src = "lib(\n    name = \"x\",\n    deps = [\":a\"],  # keep\n)\n";
        let mut f = parse("BUILD", "pkg", src).unwrap();
        let r = f.rules_mut().next().unwrap();
        r.set_attr("deps", Expr::list_of(&[":b"]));
        assert!(r.attr("deps").unwrap().keep());
        assert_eq!(r.attr_strings("deps").unwrap(), vec![":b"]);
    }

    #[test]
    fn test_private_attrs_not_formatted() {
        let mut r = Rule::new("lib", "x");
        r.set_private("_imports", vec!["example.com/a".into()]);
        let mut f = File::new("BUILD", "pkg");
        f.add_rule(r);
        let text = f.format();
        assert!(!text.contains("_imports"));
        assert!(!text.contains("example.com"));
    }

    #[test]
    fn test_empty_file_formats_empty() {
        let f = File::new("BUILD", "pkg");
        assert_eq!(f.format(), "");
    }

    #[test]
    fn test_sync_folds_duplicate_loads() {
        let src = "load(\"//a:a.bzl\", \"x\")\nload(\"//a:a.bzl\", \"y\")\nlib(name = \"l\")\n";
        let mut f = parse("BUILD", "pkg", src).unwrap();
        f.sync();
        let loads: Vec<&LoadStmt> = f
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Load(l) => Some(l),
                _ => None,
            })
            .collect();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].symbols, vec!["x", "y"]);
    }
}
