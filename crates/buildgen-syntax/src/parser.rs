//! Recursive-descent parser producing a [`File`](crate::file::File).
//!
//! Malformed syntax (unbalanced brackets, unterminated strings) fails the
//! whole file with a [`ParseError`]; there is no partial recovery. Balanced
//! constructs the rule model does not understand (assignments, macros with
//! positional arguments, comprehensions) are preserved verbatim as opaque
//! statements and re-emitted unchanged.

use thiserror::Error;

use crate::ast::{Arg, Expr};
use crate::file::{Attr, File, LoadStmt, Rule, Stmt};
use crate::lexer::{lex, Tok, TokKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{path}:{line}: unexpected {found:?}")]
    Unexpected {
        path: String,
        line: usize,
        found: String,
    },
    #[error("{path}:{line}: unterminated string")]
    UnterminatedString { path: String, line: usize },
}

/// Parse configuration file text. `pkg` is the package path of the
/// directory containing the file, used when labels are relativized.
pub fn parse(path: &str, pkg: &str, text: &str) -> Result<File, ParseError> {
    let toks = lex(path, text)?;
    let mut p = Parser {
        path,
        text,
        toks,
        pos: 0,
    };
    p.parse_file(pkg)
}

struct Parser<'a> {
    path: &'a str,
    text: &'a str,
    toks: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn peek_kind(&self) -> &TokKind {
        &self.toks[self.pos].kind
    }

    fn peek2_kind(&self) -> &TokKind {
        let i = (self.pos + 1).min(self.toks.len() - 1);
        &self.toks[i].kind
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn at_punct(&self, c: char) -> bool {
        matches!(self.peek_kind(), TokKind::Punct(p) if *p == c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokKind::Newline) {
            self.bump();
        }
    }

    fn err_here(&self, found: &str) -> ParseError {
        ParseError::Unexpected {
            path: self.path.to_string(),
            line: self.peek().line,
            found: found.to_string(),
        }
    }

    fn parse_file(&mut self, pkg: &str) -> Result<File, ParseError> {
        let mut stmts = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        loop {
            match self.peek_kind().clone() {
                TokKind::Eof => break,
                TokKind::Newline => {
                    self.bump();
                }
                TokKind::Comment(c) => {
                    self.bump();
                    if matches!(self.peek_kind(), TokKind::Newline) {
                        self.bump();
                    }
                    pending.push(c);
                }
                TokKind::Ident(name) if matches!(self.peek2_kind(), TokKind::Punct('(')) => {
                    let comments = std::mem::take(&mut pending);
                    let start = self.pos;
                    if name == "load" {
                        match self.parse_load(comments.clone())? {
                            Some(load) => stmts.push(Stmt::Load(load)),
                            None => {
                                self.pos = start;
                                stmts.push(self.parse_opaque(comments)?);
                            }
                        }
                    } else {
                        match self.parse_rule(name, comments.clone())? {
                            Some(rule) => stmts.push(Stmt::Rule(rule)),
                            None => {
                                self.pos = start;
                                stmts.push(self.parse_opaque(comments)?);
                            }
                        }
                    }
                }
                _ => {
                    let comments = std::mem::take(&mut pending);
                    stmts.push(self.parse_opaque(comments)?);
                }
            }
        }

        Ok(File::from_parts(self.path, pkg, stmts, pending))
    }

    /// Parse one rule declaration: `kind(attr = value, ...)` with only
    /// keyword arguments. Returns None if the call uses any construct the
    /// rule model cannot represent, in which case the caller rewinds and
    /// keeps the statement opaque.
    fn parse_rule(
        &mut self,
        kind: String,
        comments: Vec<String>,
    ) -> Result<Option<Rule>, ParseError> {
        self.bump(); // kind
        self.bump(); // '('

        let mut attrs = Vec::new();
        let mut attr_comments: Vec<String> = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokKind::Newline => {
                    self.bump();
                }
                TokKind::Comment(c) => {
                    self.bump();
                    attr_comments.push(c);
                }
                TokKind::Punct(')') => {
                    self.bump();
                    break;
                }
                TokKind::Ident(attr_name)
                    if matches!(self.peek2_kind(), TokKind::Punct('=')) =>
                {
                    self.bump();
                    self.bump();
                    let Some(expr) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    self.eat_punct(',');
                    let mut suffix = None;
                    if let TokKind::Comment(c) = self.peek_kind() {
                        suffix = Some(c.clone());
                        self.bump();
                    }
                    attrs.push(Attr {
                        name: attr_name,
                        expr,
                        suffix,
                        comments_before: std::mem::take(&mut attr_comments),
                    });
                }
                _ => return Ok(None),
            }
        }

        let mut suffix = None;
        if let TokKind::Comment(c) = self.peek_kind() {
            suffix = Some(c.clone());
            self.bump();
        }
        if !matches!(self.peek_kind(), TokKind::Newline | TokKind::Eof) {
            return Ok(None);
        }

        Ok(Some(Rule::from_parts(kind, attrs, comments, suffix)))
    }

    /// Parse `load("path", "sym", ...)`. Aliased symbols (keyword form) are
    /// passed through opaque.
    fn parse_load(&mut self, comments: Vec<String>) -> Result<Option<LoadStmt>, ParseError> {
        self.bump(); // load
        self.bump(); // '('
        self.skip_newlines();

        let path = match self.peek_kind().clone() {
            TokKind::Str(s) => {
                self.bump();
                s
            }
            _ => return Ok(None),
        };

        let mut symbols = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokKind::Newline | TokKind::Comment(_) => {
                    self.bump();
                }
                TokKind::Punct(',') => {
                    self.bump();
                }
                TokKind::Punct(')') => {
                    self.bump();
                    break;
                }
                TokKind::Str(s) => {
                    self.bump();
                    symbols.push(s);
                }
                _ => return Ok(None),
            }
        }

        let mut suffix = None;
        if let TokKind::Comment(c) = self.peek_kind() {
            suffix = Some(c.clone());
            self.bump();
        }
        if !matches!(self.peek_kind(), TokKind::Newline | TokKind::Eof) {
            return Ok(None);
        }

        Ok(Some(LoadStmt {
            path,
            symbols,
            comments_before: comments,
            suffix,
        }))
    }

    /// Consume a balanced statement verbatim: everything up to the first
    /// newline at bracket depth zero.
    fn parse_opaque(&mut self, comments: Vec<String>) -> Result<Stmt, ParseError> {
        let start_off = self.peek().start;
        let mut end_off = start_off;
        let mut depth = 0i32;

        loop {
            match self.peek_kind() {
                TokKind::Eof => {
                    if depth > 0 {
                        return Err(self.err_here("end of file"));
                    }
                    break;
                }
                TokKind::Newline => {
                    if depth == 0 {
                        self.bump();
                        break;
                    }
                    self.bump();
                }
                TokKind::Punct(c) => {
                    match c {
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' | '}' => depth -= 1,
                        _ => {}
                    }
                    if depth < 0 {
                        return Err(self.err_here(&c.to_string()));
                    }
                    end_off = self.peek().end;
                    self.bump();
                }
                _ => {
                    end_off = self.peek().end;
                    self.bump();
                }
            }
        }

        let text = self.text[start_off..end_off].trim_end().to_string();
        tracing::trace!(path = self.path, stmt = %text.lines().next().unwrap_or(""), "passing statement through verbatim");
        Ok(Stmt::Opaque {
            comments_before: comments,
            text,
        })
    }

    fn parse_expr(&mut self) -> Result<Option<Expr>, ParseError> {
        let Some(mut e) = self.parse_primary()? else {
            return Ok(None);
        };
        loop {
            let save = self.pos;
            self.skip_newlines();
            if self.eat_punct('+') {
                self.skip_newlines();
                let Some(rhs) = self.parse_primary()? else {
                    return Ok(None);
                };
                e = Expr::Plus(Box::new(e), Box::new(rhs));
            } else {
                self.pos = save;
                break;
            }
        }
        Ok(Some(e))
    }

    fn parse_primary(&mut self) -> Result<Option<Expr>, ParseError> {
        match self.peek_kind().clone() {
            TokKind::Str(value) => {
                self.bump();
                Ok(Some(Expr::Str {
                    value,
                    suffix: None,
                }))
            }
            TokKind::Int(n) => {
                self.bump();
                Ok(Some(Expr::Int(n)))
            }
            TokKind::Ident(name) => {
                self.bump();
                if self.eat_punct('(') {
                    let Some(args) = self.parse_call_args()? else {
                        return Ok(None);
                    };
                    Ok(Some(Expr::Call { func: name, args }))
                } else {
                    Ok(Some(Expr::Ident(name)))
                }
            }
            TokKind::Punct('[') => self.parse_list(),
            TokKind::Punct('{') => self.parse_dict(),
            TokKind::Punct('(') => {
                self.bump();
                self.skip_newlines();
                let Some(inner) = self.parse_expr()? else {
                    return Ok(None);
                };
                self.skip_newlines();
                if !self.eat_punct(')') {
                    return Ok(None);
                }
                Ok(Some(inner))
            }
            _ => Ok(None),
        }
    }

    fn parse_list(&mut self) -> Result<Option<Expr>, ParseError> {
        self.bump(); // '['
        let mut elems: Vec<Expr> = Vec::new();
        let mut pending: Option<String> = None;

        loop {
            match self.peek_kind().clone() {
                TokKind::Newline => {
                    self.bump();
                }
                TokKind::Comment(c) => {
                    // Own-line comment inside the list: attaches to the
                    // element that follows (or the last one at the end).
                    self.bump();
                    pending = Some(join_comment(pending.take(), c));
                }
                TokKind::Punct(']') => {
                    self.bump();
                    if let Some(c) = pending.take() {
                        if let Some(last) = elems.last_mut() {
                            attach_suffix(last, c);
                        }
                    }
                    break;
                }
                _ => {
                    let Some(mut e) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    if let Some(c) = pending.take() {
                        attach_suffix(&mut e, c);
                    }
                    self.eat_punct(',');
                    if let TokKind::Comment(c) = self.peek_kind() {
                        let c = c.clone();
                        self.bump();
                        attach_suffix(&mut e, c);
                    }
                    elems.push(e);
                }
            }
        }
        Ok(Some(Expr::List(elems)))
    }

    fn parse_dict(&mut self) -> Result<Option<Expr>, ParseError> {
        self.bump(); // '{'
        let mut entries = Vec::new();

        loop {
            match self.peek_kind().clone() {
                TokKind::Newline | TokKind::Comment(_) => {
                    self.bump();
                }
                TokKind::Punct('}') => {
                    self.bump();
                    break;
                }
                _ => {
                    let Some(key) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    if !self.eat_punct(':') {
                        return Ok(None);
                    }
                    self.skip_newlines();
                    let Some(mut value) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    self.eat_punct(',');
                    if let TokKind::Comment(c) = self.peek_kind() {
                        let c = c.clone();
                        self.bump();
                        attach_suffix(&mut value, c);
                    }
                    entries.push((key, value));
                }
            }
        }
        Ok(Some(Expr::Dict(entries)))
    }

    fn parse_call_args(&mut self) -> Result<Option<Vec<Arg>>, ParseError> {
        let mut args = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokKind::Newline | TokKind::Comment(_) => {
                    self.bump();
                }
                TokKind::Punct(')') => {
                    self.bump();
                    break;
                }
                TokKind::Punct(',') => {
                    self.bump();
                }
                TokKind::Ident(name) if matches!(self.peek2_kind(), TokKind::Punct('=')) => {
                    self.bump();
                    self.bump();
                    let Some(e) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    args.push(Arg::Keyword(name, e));
                }
                _ => {
                    let Some(e) = self.parse_expr()? else {
                        return Ok(None);
                    };
                    args.push(Arg::Positional(e));
                }
            }
        }
        Ok(Some(args))
    }
}

fn attach_suffix(e: &mut Expr, c: String) {
    if let Expr::Str { suffix, .. } = e {
        *suffix = Some(join_comment(suffix.take(), c));
    }
}

fn join_comment(old: Option<String>, new: String) -> String {
    match old {
        Some(old) => format!("{} {}", old, new),
        None => new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_rule() {
        let f = parse("BUILD", "pkg", "lib(\n    name = \"x\",\n    srcs = [\"a.go\"],\n)\n")
            .unwrap();
        assert_eq!(f.rules().count(), 1);
        let r = f.rules().next().unwrap();
        assert_eq!(r.kind, "lib");
        assert_eq!(r.name(), Some("x"));
        assert_eq!(r.attr_strings("srcs").unwrap(), vec!["a.go"]);
    }

    #[test]
    fn test_parse_keep_markers() {
        let src = "\
# keep
lib(
    name = \"x\",
    srcs = [
        \"a.go\",
        \"b.go\",  # keep
    ],
    deps = [\":y\"],  # keep
)
";
        let f = parse("BUILD", "pkg", src).unwrap();
        let r = f.rules().next().unwrap();
        assert!(r.keep());
        assert!(r.attr("deps").unwrap().keep());
        let srcs = r.attr_expr("srcs").unwrap().as_list().unwrap();
        assert_eq!(srcs[1].suffix(), Some("# keep"));
        assert_eq!(srcs[0].suffix(), None);
    }

    #[test]
    fn test_parse_load() {
        let f = parse(
            "BUILD",
            "pkg",
            "load(\"//tools:rules.bzl\", \"lib\", \"bin\")\n",
        )
        .unwrap();
        match &f.stmts[0] {
            Stmt::Load(l) => {
                assert_eq!(l.path, "//tools:rules.bzl");
                assert_eq!(l.symbols, vec!["lib", "bin"]);
            }
            other => panic!("expected load, got {:?}", other),
        }
    }

    #[test]
    fn test_opaque_passthrough() {
        let src = "SRCS = glob([\"**/*.c\"])\n\nconfig_setting(\"weird\", {\"a\": 1})\n";
        let f = parse("BUILD", "pkg", src).unwrap();
        let opaque: Vec<&str> = f
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Opaque { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(opaque.len(), 2);
        assert_eq!(opaque[0], "SRCS = glob([\"**/*.c\"])");
    }

    #[test]
    fn test_unbalanced_is_parse_error() {
        assert!(parse("BUILD", "pkg", "lib(name = \"x\"\n").is_err());
        assert!(parse("BUILD", "pkg", "x = [1, 2\n").is_err());
    }

    #[test]
    fn test_parse_select_expr() {
        let src = "lib(\n    name = \"x\",\n    srcs = [\"a.go\"] + select({\n        \"//:linux\": [\"l.go\"],\n        \"//conditions:default\": [],\n    }),\n)\n";
        let f = parse("BUILD", "pkg", src).unwrap();
        let r = f.rules().next().unwrap();
        match r.attr_expr("srcs").unwrap() {
            Expr::Plus(lhs, rhs) => {
                assert!(matches!(**lhs, Expr::List(_)));
                assert!(matches!(**rhs, Expr::Call { ref func, .. } if func == "select"));
            }
            other => panic!("expected plus, got {:?}", other),
        }
    }

    #[test]
    fn test_directives_collected() {
        let src = "# buildgen:map_kind lib my_lib //tools:my.bzl\n\nlib(name = \"x\")\n";
        let f = parse("BUILD", "pkg", src).unwrap();
        assert_eq!(f.directives.len(), 1);
        assert_eq!(f.directives[0].key, "map_kind");
        assert_eq!(f.directives[0].value, "lib my_lib //tools:my.bzl");
    }
}
