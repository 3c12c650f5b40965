//! Reconciliation of generated rules into an existing file.
//!
//! For each generated rule the merger finds the existing rule it stands
//! for (by declared identity attributes, by name, or for sole-output
//! kinds by kind alone), merges attribute values honoring `# keep`
//! protection, and adds rules with no counterpart. Existing rules the
//! generator no longer produces are merged down and deleted once every
//! load-bearing attribute is empty, unless protected. When matching pairs
//! a generated rule with an existing rule of a different name, the
//! existing name wins and references in the rest of the generated set are
//! rewritten to it, transitively.

use std::collections::HashMap;

use buildgen_core::{Diagnostic, Diagnostics};
use buildgen_syntax::ast::is_keep;
use buildgen_syntax::values::merge_exprs;
use buildgen_syntax::{Arg, Expr, File, Rule, Stmt};

use crate::kinds::{KindInfo, KindRegistry, PackageKinds};
use crate::meta::logical_kind;

pub struct Merger<'a> {
    registry: &'a KindRegistry,
    pkg: &'a PackageKinds,
}

impl<'a> Merger<'a> {
    pub fn new(registry: &'a KindRegistry, pkg: &'a PackageKinds) -> Self {
        Merger { registry, pkg }
    }

    /// Reconcile `gen` into `file`. Ambiguous matches are diagnosed and the
    /// affected generated rule is skipped without touching the file.
    pub fn merge_file(&self, file: &mut File, mut gen: Vec<Rule>, diags: &mut Diagnostics) {
        let before = file.format();

        // Pair each generated rule with the existing rule it stands for.
        // Contested candidates of an ambiguous match stay untouched, which
        // also shields them from stale deletion below.
        let mut taken: Vec<usize> = Vec::new();
        let mut contested: Vec<usize> = Vec::new();
        let mut pairs: Vec<(usize, Option<usize>)> = Vec::new();
        for (g, rule) in gen.iter().enumerate() {
            match self.find_match(file, rule, &taken, diags) {
                MatchResult::Found(i) => {
                    taken.push(i);
                    pairs.push((g, Some(i)));
                }
                MatchResult::None => pairs.push((g, None)),
                MatchResult::Ambiguous(candidates) => contested.extend(candidates),
            }
        }

        // Where a match crossed names, the existing name wins; rewrite
        // references among the generated rules, closing chains.
        let mut renames: HashMap<String, String> = HashMap::new();
        for (g, stmt) in &pairs {
            let Some(i) = stmt else { continue };
            let Stmt::Rule(existing) = &file.stmts[*i] else {
                continue;
            };
            if let (Some(from), Some(to)) = (gen[*g].name(), existing.name()) {
                if from != to {
                    renames.insert(from.to_string(), to.to_string());
                }
            }
        }
        close_renames(&mut renames);
        if !renames.is_empty() {
            for rule in &mut gen {
                for attr in &mut rule.attrs {
                    if attr.name != "name" {
                        rewrite_labels(&mut attr.expr, &renames);
                    }
                }
            }
        }

        for (g, stmt) in &pairs {
            let Some(i) = stmt else { continue };
            let info = self.info_for(&gen[*g].kind);
            let Stmt::Rule(existing) = &mut file.stmts[*i] else {
                continue;
            };
            merge_rule(existing, &gen[*g], &info);
        }

        // Deletion runs before additions so a freshly added rule is never
        // mistaken for a stale one.
        taken.extend(contested);
        self.delete_stale(file, &taken);

        for (g, stmt) in pairs {
            if stmt.is_some() {
                continue;
            }
            let mut rule = gen[g].clone();
            // Kind mapping changes the emitted (surface) kind.
            if let Some(mapped) = self.pkg.mapping_for_generated(&rule.kind) {
                rule.kind = mapped.kind_name.clone();
            }
            file.add_rule(rule);
        }

        if file.format() != before {
            file.dirty = true;
        }
    }

    fn info_for(&self, kind: &str) -> KindInfo {
        self.registry.kind(kind).cloned().unwrap_or_default()
    }

    fn find_match(
        &self,
        file: &File,
        gen: &Rule,
        taken: &[usize],
        diags: &mut Diagnostics,
    ) -> MatchResult {
        let info = self.info_for(&gen.kind);
        let candidates: Vec<usize> = file
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Stmt::Rule(r)
                    if !taken.contains(&i) && logical_kind(self.pkg, &r.kind) == gen.kind =>
                {
                    Some(i)
                }
                _ => None,
            })
            .collect();

        if info.match_any {
            return match candidates.as_slice() {
                [] => MatchResult::None,
                [single] => MatchResult::Found(*single),
                many => {
                    diags.record(self.ambiguity(file, gen, many));
                    MatchResult::Ambiguous(many.to_vec())
                }
            };
        }

        // Identity attributes outrank the name; the name is the fallback.
        // A kept rule still matches its own name (so it wins outright and
        // is never duplicated) but never a different generated identity.
        let by_attr: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| {
                let r = rule_at(file, *i);
                !r.keep()
                    && info.match_attrs.iter().any(|a| {
                        matches!((r.attr_expr(a), gen.attr_expr(a)), (Some(x), Some(y)) if x == y)
                    })
            })
            .collect();
        let matched = if !by_attr.is_empty() {
            by_attr
        } else {
            candidates
                .iter()
                .copied()
                .filter(|i| rule_at(file, *i).name() == gen.name())
                .collect()
        };

        match matched.as_slice() {
            [] => MatchResult::None,
            [single] => MatchResult::Found(*single),
            many => {
                diags.record(self.ambiguity(file, gen, many));
                MatchResult::Ambiguous(many.to_vec())
            }
        }
    }

    fn ambiguity(&self, file: &File, gen: &Rule, candidates: &[usize]) -> Diagnostic {
        Diagnostic::AmbiguousMatch {
            kind: gen.kind.clone(),
            name: gen.name().unwrap_or_default().to_string(),
            candidates: candidates
                .iter()
                .map(|i| rule_at(file, *i).name().unwrap_or_default().to_string())
                .collect(),
        }
    }

    /// Existing rules of registry-known kinds with no generated
    /// counterpart are merged down and removed once every load-bearing
    /// attribute is gone. Any `# keep` marker on the rule, an attribute,
    /// or a list element retains the rule as written.
    fn delete_stale(&self, file: &mut File, matched: &[usize]) {
        let mut remove: Vec<usize> = Vec::new();
        for (i, stmt) in file.stmts.iter_mut().enumerate() {
            if matched.contains(&i) {
                continue;
            }
            let Stmt::Rule(rule) = stmt else { continue };
            let logical = logical_kind(self.pkg, &rule.kind);
            let Some(info) = self.registry.kind(&logical) else {
                continue;
            };
            if rule_protected(rule) {
                continue;
            }
            for name in &info.mergeable_attrs {
                merge_down(rule, name, !info.unsorted_attrs.contains(name));
            }
            let empty = info.non_empty_attrs.iter().all(|a| {
                rule.attr_expr(a)
                    .is_none_or(|e| e.is_empty_container())
            });
            if empty {
                remove.push(i);
            }
        }
        for i in remove.into_iter().rev() {
            file.stmts.remove(i);
        }
    }
}

enum MatchResult {
    Found(usize),
    None,
    Ambiguous(Vec<usize>),
}

fn rule_at(file: &File, i: usize) -> &Rule {
    match &file.stmts[i] {
        Stmt::Rule(r) => r,
        _ => unreachable!("candidate index always points at a rule"),
    }
}

/// Merge a generated rule into its matched existing rule. Identity
/// attributes and `# keep`-protected attributes are never touched; a kept
/// rule wins outright.
fn merge_rule(existing: &mut Rule, gen: &Rule, info: &KindInfo) {
    if existing.keep() {
        return;
    }
    for gattr in &gen.attrs {
        if gattr.name == "name" || info.match_attrs.contains(&gattr.name) {
            continue;
        }
        if existing.attr(&gattr.name).is_some_and(|a| a.keep()) {
            continue;
        }
        if info.mergeable_attrs.contains(&gattr.name) {
            let sorted = !info.unsorted_attrs.contains(&gattr.name);
            match existing.attr(&gattr.name) {
                Some(old) => match merge_exprs(Some(&gattr.expr), &old.expr, sorted) {
                    Ok(Some(e)) => existing.set_attr(&gattr.name, e),
                    Ok(None) => {
                        existing.remove_attr(&gattr.name);
                    }
                    Err(err) => {
                        tracing::debug!(attr = %gattr.name, %err, "keeping unmergeable value");
                    }
                },
                None => {
                    if !gattr.expr.is_empty_container() {
                        existing.set_attr(&gattr.name, gattr.expr.clone());
                    }
                }
            }
        } else if gattr.expr.is_empty_container() {
            existing.remove_attr(&gattr.name);
        } else {
            existing.set_attr(&gattr.name, gattr.expr.clone());
        }
    }

    // Mergeable attributes the generator no longer produces shed their
    // unprotected elements.
    for name in &info.mergeable_attrs {
        if gen.attr(name).is_none() {
            merge_down(existing, name, !info.unsorted_attrs.contains(name));
        }
    }

    existing.copy_private_from(gen);
}

fn merge_down(rule: &mut Rule, name: &str, sorted: bool) {
    let Some(attr) = rule.attr(name) else { return };
    if attr.keep() {
        return;
    }
    match merge_exprs(None, &attr.expr, sorted) {
        Ok(Some(e)) => rule.set_attr(name, e),
        Ok(None) => {
            rule.remove_attr(name);
        }
        Err(err) => {
            tracing::debug!(attr = %name, %err, "keeping unmergeable value");
        }
    }
}

fn rule_protected(rule: &Rule) -> bool {
    rule.keep() || rule.attrs.iter().any(|a| a.keep() || expr_has_keep(&a.expr))
}

fn expr_has_keep(expr: &Expr) -> bool {
    match expr {
        Expr::Str { suffix, .. } => suffix.as_deref().is_some_and(is_keep),
        Expr::Ident(_) | Expr::Int(_) => false,
        Expr::List(elems) => elems.iter().any(expr_has_keep),
        Expr::Dict(entries) => entries
            .iter()
            .any(|(k, v)| expr_has_keep(k) || expr_has_keep(v)),
        Expr::Call { args, .. } => args.iter().any(|a| expr_has_keep(a.expr())),
        Expr::Plus(lhs, rhs) => expr_has_keep(lhs) || expr_has_keep(rhs),
    }
}

/// Close rename chains: with a→b and b→c, references to a end up at c.
/// Bounded by the map size so a swap cycle cannot spin.
fn close_renames(renames: &mut HashMap<String, String>) {
    for _ in 0..renames.len() {
        let mut changed = false;
        let keys: Vec<String> = renames.keys().cloned().collect();
        for k in keys {
            let v = renames[&k].clone();
            if let Some(next) = renames.get(&v) {
                if *next != v && *next != k && renames[&k] != *next {
                    let next = next.clone();
                    renames.insert(k, next);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Rewrite relative label strings (`:name`) per the rename map, anywhere
/// in the expression tree.
fn rewrite_labels(expr: &mut Expr, renames: &HashMap<String, String>) {
    match expr {
        Expr::Str { value, .. } => {
            if let Some(rest) = value.strip_prefix(':') {
                if let Some(to) = renames.get(rest) {
                    *value = format!(":{}", to);
                }
            }
        }
        Expr::Ident(_) | Expr::Int(_) => {}
        Expr::List(elems) => {
            for e in elems {
                rewrite_labels(e, renames);
            }
        }
        Expr::Dict(entries) => {
            for (k, v) in entries {
                rewrite_labels(k, renames);
                rewrite_labels(v, renames);
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                match arg {
                    Arg::Positional(e) | Arg::Keyword(_, e) => rewrite_labels(e, renames),
                }
            }
        }
        Expr::Plus(lhs, rhs) => {
            rewrite_labels(lhs, renames);
            rewrite_labels(rhs, renames);
        }
    }
}
