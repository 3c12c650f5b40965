//! Conversion between native values and expressions, and the merge matrix.
//!
//! Native containers form a closed set:
//! - **SortedStrings** — set-union merge, label-aware lexicographic order
//!   (relative < package-absolute < external-repository references).
//! - **UnsortedStrings** — append-only union, original order preserved.
//! - **GlobValue** — include/exclude pattern pairs rendered as a `glob`
//!   call; parsing accepts the historical call shapes (positional
//!   include/exclude, named `include =`, named `exclude =`, mixed) and
//!   silently skips non-literal arguments.
//! - **SelectStringListValue** — condition label to string list, rendered
//!   as a `select` call with branches sorted and the default branch last.
//!
//! Merging works over sums of terms (`plain + select(...) + select(...)`).
//! Each term is one of the closed variants `{Plain, Conditional}`, giving a
//! four-case matrix:
//!
//! | generated \ existing | Plain               | Conditional          |
//! |----------------------|---------------------|----------------------|
//! | Plain                | union honoring keep | kept side by side    |
//! | Conditional          | kept side by side   | same axis: per-branch union; disjoint axes: additional term |
//!
//! Conditional terms share an axis iff their non-default condition keys
//! intersect. Disjoint axes (say OS-keyed vs architecture-keyed) accumulate
//! additively; collapsing them would change which sources build under which
//! configuration.

use std::collections::BTreeMap;

use thiserror::Error;

use buildgen_core::label::compare_strings;

use crate::ast::{is_keep, Arg, Expr};

pub const DEFAULT_CONDITION: &str = "//conditions:default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The expression is outside the closed value set.
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),
    /// The existing expression cannot be interpreted as a string list sum;
    /// merging leaves the old value untouched.
    #[error("expression cannot be merged as a string list")]
    Unmergeable,
}

/// A native value convertible to and from an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    /// Label-aware sorted, deduplicated string list.
    Sorted(Vec<String>),
    /// Order-preserving string list.
    Unsorted(Vec<String>),
    Glob(GlobValue),
    Select(SelectValue),
}

impl Value {
    pub fn to_expr(&self) -> Expr {
        match self {
            Value::Str(s) => Expr::string(s.clone()),
            Value::Sorted(items) => {
                let mut items = items.clone();
                items.sort_by(|a, b| compare_strings(a, b));
                items.dedup();
                Expr::List(items.into_iter().map(Expr::string).collect())
            }
            Value::Unsorted(items) => {
                Expr::List(items.iter().cloned().map(Expr::string).collect())
            }
            Value::Glob(g) => g.to_expr(),
            Value::Select(s) => s.to_expr(),
        }
    }

    /// Interpret an expression as a native value. Anything outside the
    /// closed set is an unsupported-type error.
    pub fn from_expr(expr: &Expr) -> Result<Value, ValueError> {
        match expr {
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::List(elems) => {
                let mut items = Vec::with_capacity(elems.len());
                for e in elems {
                    match e.as_str() {
                        Some(s) => items.push(s.to_string()),
                        None => {
                            return Err(ValueError::UnsupportedType(describe(e).to_string()))
                        }
                    }
                }
                Ok(Value::Unsorted(items))
            }
            Expr::Call { func, .. } if func == "glob" => match GlobValue::from_expr(expr) {
                Some(g) => Ok(Value::Glob(g)),
                None => Err(ValueError::UnsupportedType("glob".to_string())),
            },
            Expr::Call { func, .. } if func == "select" => match SelectValue::from_expr(expr) {
                Some(s) => Ok(Value::Select(s)),
                None => Err(ValueError::UnsupportedType("select".to_string())),
            },
            other => Err(ValueError::UnsupportedType(describe(other).to_string())),
        }
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Str { .. } => "string",
        Expr::Ident(_) => "identifier",
        Expr::Int(_) => "integer",
        Expr::List(_) => "list",
        Expr::Dict(_) => "dict",
        Expr::Call { .. } => "call",
        Expr::Plus(..) => "binary expression",
    }
}

/// Include/exclude pattern pairs for a `glob` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobValue {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl GlobValue {
    pub fn to_expr(&self) -> Expr {
        let mut args = vec![Arg::Positional(Expr::list_of(&self.includes))];
        if !self.excludes.is_empty() {
            args.push(Arg::Keyword(
                "exclude".to_string(),
                Expr::list_of(&self.excludes),
            ));
        }
        Expr::Call {
            func: "glob".to_string(),
            args,
        }
    }

    /// Recognize the historical glob call shapes. Non-literal arguments
    /// (identifiers, nested calls) are silently skipped.
    pub fn from_expr(expr: &Expr) -> Option<GlobValue> {
        let Expr::Call { func, args } = expr else {
            return None;
        };
        if func != "glob" {
            return None;
        }
        let mut includes: Option<Vec<String>> = None;
        let mut excludes: Option<Vec<String>> = None;
        for arg in args {
            let strings = match string_list(arg.expr()) {
                Some(s) => s,
                None => continue,
            };
            match arg {
                Arg::Positional(_) => {
                    if includes.is_none() {
                        includes = Some(strings);
                    } else if excludes.is_none() {
                        excludes = Some(strings);
                    }
                }
                Arg::Keyword(name, _) if name == "include" => includes = Some(strings),
                Arg::Keyword(name, _) if name == "exclude" => excludes = Some(strings),
                Arg::Keyword(..) => {}
            }
        }
        Some(GlobValue {
            includes: includes.unwrap_or_default(),
            excludes: excludes.unwrap_or_default(),
        })
    }
}

fn string_list(expr: &Expr) -> Option<Vec<String>> {
    let elems = expr.as_list()?;
    Some(
        elems
            .iter()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect(),
    )
}

/// Mapping from condition label to string list, one `select` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectValue {
    pub entries: BTreeMap<String, Vec<String>>,
}

impl SelectValue {
    pub fn to_expr(&self) -> Expr {
        let elems: BTreeMap<String, Vec<Elem>> = self
            .entries
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    v.iter()
                        .map(|s| Elem {
                            value: s.clone(),
                            suffix: None,
                        })
                        .collect(),
                )
            })
            .collect();
        conditional_to_expr(&elems, true)
    }

    pub fn from_expr(expr: &Expr) -> Option<SelectValue> {
        let map = parse_conditional(expr)?;
        Some(SelectValue {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(|e| e.value).collect()))
                .collect(),
        })
    }
}

/// One string element of a list, carrying its protective comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Elem {
    pub value: String,
    pub suffix: Option<String>,
}

impl Elem {
    pub fn keep(&self) -> bool {
        self.suffix.as_deref().is_some_and(is_keep)
    }

    fn to_expr(&self) -> Expr {
        Expr::Str {
            value: self.value.clone(),
            suffix: self.suffix.clone(),
        }
    }
}

/// One term in a sum-of-terms attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ListTerm {
    Plain(Vec<Elem>),
    Conditional(BTreeMap<String, Vec<Elem>>),
}

/// Decompose an expression into the sum of terms it represents.
pub fn parse_terms(expr: &Expr) -> Result<Vec<ListTerm>, ValueError> {
    match expr {
        Expr::List(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for e in elems {
                match e {
                    Expr::Str { value, suffix } => out.push(Elem {
                        value: value.clone(),
                        suffix: suffix.clone(),
                    }),
                    _ => return Err(ValueError::Unmergeable),
                }
            }
            Ok(vec![ListTerm::Plain(out)])
        }
        Expr::Call { .. } => match parse_conditional(expr) {
            Some(map) => Ok(vec![ListTerm::Conditional(map)]),
            None => Err(ValueError::Unmergeable),
        },
        Expr::Plus(lhs, rhs) => {
            let mut terms = parse_terms(lhs)?;
            terms.extend(parse_terms(rhs)?);
            Ok(terms)
        }
        _ => Err(ValueError::Unmergeable),
    }
}

fn parse_conditional(expr: &Expr) -> Option<BTreeMap<String, Vec<Elem>>> {
    let Expr::Call { func, args } = expr else {
        return None;
    };
    if func != "select" || args.len() != 1 {
        return None;
    }
    let Expr::Dict(entries) = args[0].expr() else {
        return None;
    };
    let mut map = BTreeMap::new();
    for (key, value) in entries {
        let key = key.as_str()?.to_string();
        let elems = value.as_list()?;
        let mut branch = Vec::with_capacity(elems.len());
        for e in elems {
            match e {
                Expr::Str { value, suffix } => branch.push(Elem {
                    value: value.clone(),
                    suffix: suffix.clone(),
                }),
                _ => return None,
            }
        }
        map.insert(key, branch);
    }
    Some(map)
}

/// Merge a generated expression into an existing one.
///
/// `gen` of `None` stands for "nothing generated" (deletion merge-down).
/// Returns `Ok(None)` when the merged value is empty and the attribute
/// should be dropped. An existing expression outside the mergeable set
/// yields [`ValueError::Unmergeable`]; callers keep the old value.
pub fn merge_exprs(
    gen: Option<&Expr>,
    old: &Expr,
    sorted: bool,
) -> Result<Option<Expr>, ValueError> {
    let old_terms = parse_terms(old)?;
    let gen_terms = match gen {
        Some(e) => parse_terms(e)?,
        None => Vec::new(),
    };
    let merged = merge_terms(&gen_terms, &old_terms);
    Ok(terms_to_expr(&merged, sorted))
}

/// The term-level merge: plain terms union with plain terms, conditional
/// terms union per branch with the first generated term sharing their
/// condition axis, everything unmatched is kept side by side.
fn merge_terms(gen: &[ListTerm], old: &[ListTerm]) -> Vec<ListTerm> {
    let gen_plain: Vec<Elem> = gen
        .iter()
        .filter_map(|t| match t {
            ListTerm::Plain(e) => Some(e.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    let old_plain: Vec<Elem> = old
        .iter()
        .filter_map(|t| match t {
            ListTerm::Plain(e) => Some(e.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    let had_plain = gen.iter().any(|t| matches!(t, ListTerm::Plain(_)))
        || old.iter().any(|t| matches!(t, ListTerm::Plain(_)));

    let mut out = Vec::new();
    if had_plain {
        out.push(ListTerm::Plain(merge_plain_plain(&gen_plain, &old_plain)));
    }

    let gen_conds: Vec<&BTreeMap<String, Vec<Elem>>> = gen
        .iter()
        .filter_map(|t| match t {
            ListTerm::Conditional(m) => Some(m),
            _ => None,
        })
        .collect();
    let mut used = vec![false; gen_conds.len()];

    for term in old {
        let ListTerm::Conditional(oc) = term else {
            continue;
        };
        let matched = gen_conds
            .iter()
            .enumerate()
            .find(|(i, gc)| !used[*i] && axes_intersect(gc, oc));
        match matched {
            Some((i, gc)) => {
                used[i] = true;
                out.push(ListTerm::Conditional(merge_cond_cond(gc, oc)));
            }
            // No generated term on this axis: the existing conditional is
            // kept as written.
            None => out.push(ListTerm::Conditional(oc.clone())),
        }
    }

    for (i, gc) in gen_conds.iter().enumerate() {
        if !used[i] {
            out.push(ListTerm::Conditional((*gc).clone()));
        }
    }
    out
}

/// Plain × Plain: generated elements union existing keep-marked ones.
/// Existing elements survive if protected or regenerated; order follows
/// the existing list, with new elements appended.
fn merge_plain_plain(gen: &[Elem], old: &[Elem]) -> Vec<Elem> {
    let mut out: Vec<Elem> = Vec::new();
    for oe in old {
        if (oe.keep() || gen.iter().any(|ge| ge.value == oe.value))
            && !out.iter().any(|e| e.value == oe.value)
        {
            out.push(oe.clone());
        }
    }
    for ge in gen {
        if !out.iter().any(|e| e.value == ge.value) {
            out.push(ge.clone());
        }
    }
    out
}

/// Conditional × Conditional on a shared axis: per-branch plain union.
/// Branches that end up empty are dropped, except the default branch,
/// which is kept whenever either side declared it.
fn merge_cond_cond(
    gen: &BTreeMap<String, Vec<Elem>>,
    old: &BTreeMap<String, Vec<Elem>>,
) -> BTreeMap<String, Vec<Elem>> {
    let mut out = BTreeMap::new();
    let empty: Vec<Elem> = Vec::new();
    let keys: std::collections::BTreeSet<&String> = gen.keys().chain(old.keys()).collect();
    for key in keys {
        let merged = merge_plain_plain(
            gen.get(key).unwrap_or(&empty),
            old.get(key).unwrap_or(&empty),
        );
        if !merged.is_empty() || key == DEFAULT_CONDITION {
            out.insert(key.clone(), merged);
        }
    }
    out
}

/// The condition axis of a conditional term is its set of non-default
/// condition labels. Two terms merge only when those sets intersect.
fn axes_intersect(a: &BTreeMap<String, Vec<Elem>>, b: &BTreeMap<String, Vec<Elem>>) -> bool {
    a.keys()
        .filter(|k| *k != DEFAULT_CONDITION)
        .any(|k| b.contains_key(k))
}

/// Render a sum of terms back to an expression. Empty terms vanish; an
/// entirely empty sum is `None` (the attribute should be dropped).
pub fn terms_to_expr(terms: &[ListTerm], sorted: bool) -> Option<Expr> {
    let mut exprs: Vec<Expr> = Vec::new();
    for term in terms {
        match term {
            ListTerm::Plain(elems) => {
                if elems.is_empty() {
                    continue;
                }
                let mut elems = elems.clone();
                if sorted {
                    elems.sort_by(|a, b| compare_strings(&a.value, &b.value));
                }
                exprs.push(Expr::List(elems.iter().map(Elem::to_expr).collect()));
            }
            ListTerm::Conditional(map) => {
                if map.values().all(|v| v.is_empty()) {
                    continue;
                }
                exprs.push(conditional_to_expr(map, sorted));
            }
        }
    }
    exprs
        .into_iter()
        .reduce(|acc, e| Expr::Plus(Box::new(acc), Box::new(e)))
}

/// Branches sorted alphabetically, default branch always last.
fn conditional_to_expr(map: &BTreeMap<String, Vec<Elem>>, sorted: bool) -> Expr {
    let mut entries: Vec<(Expr, Expr)> = Vec::new();
    let mut emit = |key: &String, branch: &Vec<Elem>| {
        let mut branch = branch.clone();
        if sorted {
            branch.sort_by(|a, b| compare_strings(&a.value, &b.value));
        }
        entries.push((
            Expr::string(key.clone()),
            Expr::List(branch.iter().map(Elem::to_expr).collect()),
        ));
    };
    for (key, branch) in map {
        if key != DEFAULT_CONDITION {
            emit(key, branch);
        }
    }
    if let Some(branch) = map.get(DEFAULT_CONDITION) {
        emit(&DEFAULT_CONDITION.to_string(), branch);
    }
    Expr::Call {
        func: "select".to_string(),
        args: vec![Arg::Positional(Expr::Dict(entries))],
    }
}
