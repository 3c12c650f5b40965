//! Repository-wide import index.
//!
//! During indexing, every directory contributes its rules to a
//! [`RuleIndexBuilder`]; contributions may come from parallel workers, so
//! the builder takes `&self`. [`RuleIndexBuilder::finish`] is a hard
//! barrier: embeds are closed transitively (cycles reported once),
//! candidate lists are sorted for reproducible ambiguity decisions, and
//! the resulting [`RuleIndex`] is read-only. The type split guarantees no
//! rule can be added after any lookup has happened.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dashmap::DashMap;

use buildgen_core::{Diagnostic, Diagnostics, Label};
use buildgen_syntax::Rule;

/// One importable identifier in one language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImportSpec {
    pub lang: String,
    pub imp: String,
}

impl ImportSpec {
    pub fn new(lang: impl Into<String>, imp: impl Into<String>) -> Self {
        ImportSpec {
            lang: lang.into(),
            imp: imp.into(),
        }
    }
}

/// One rule satisfying an import, with its transitive embeds flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub label: Label,
    pub embeds: Vec<Label>,
}

#[derive(Debug)]
struct IndexedRule {
    label: Label,
    provides: Vec<ImportSpec>,
    embeds: Vec<Label>,
}

/// Accumulates rule contributions until frozen by [`finish`].
///
/// [`finish`]: RuleIndexBuilder::finish
#[derive(Debug, Default)]
pub struct RuleIndexBuilder {
    rules: DashMap<String, IndexedRule>,
}

impl RuleIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contribute one rule. Unnamed rules are skipped; relative embed
    /// labels are resolved against the contributing package.
    pub fn add_rule(&self, pkg: &str, rule: &Rule, provides: Vec<ImportSpec>, embeds: Vec<Label>) {
        let Some(name) = rule.name() else { return };
        let label = Label::absolute(pkg, name);
        let embeds = embeds.into_iter().map(|e| e.abs_from(pkg)).collect();
        self.rules.insert(
            label.to_string(),
            IndexedRule {
                label,
                provides,
                embeds,
            },
        );
    }

    /// Freeze the index. Embeds are closed transitively: an embedding rule
    /// satisfies every import its embedded rules satisfy. Each embed cycle
    /// is reported exactly once, regardless of entry point.
    pub fn finish(self, diags: &mut Diagnostics) -> RuleIndex {
        let rules: HashMap<String, IndexedRule> = self.rules.into_iter().collect();

        let mut done: HashMap<String, Closure> = HashMap::new();
        let mut cycles: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
        let mut keys: Vec<&String> = rules.keys().collect();
        keys.sort();
        for key in &keys {
            let mut stack = Vec::new();
            close(key, &rules, &mut done, &mut stack, &mut cycles);
        }
        for chain in cycles.into_values() {
            diags.record(Diagnostic::EmbedCycle { chain });
        }

        let mut by_import: BTreeMap<ImportSpec, Vec<FindResult>> = BTreeMap::new();
        for key in &keys {
            let rule = &rules[*key];
            let closure = &done[*key];
            // A cycle puts the rule into its own closure; it is not its
            // own embed.
            let embeds: Vec<Label> = closure
                .embeds
                .iter()
                .filter(|e| **e != rule.label)
                .cloned()
                .collect();
            for spec in rule.provides.iter().chain(closure.provides.iter()) {
                let results = by_import.entry(spec.clone()).or_default();
                if !results.iter().any(|r| r.label == rule.label) {
                    results.push(FindResult {
                        label: rule.label.clone(),
                        embeds: embeds.clone(),
                    });
                }
            }
        }

        // A rule embedded by another candidate is shadowed by it: the
        // embedder is the one to depend on. Mutual embeds (a cycle) shadow
        // neither side, so the ambiguity stays visible.
        for results in by_import.values_mut() {
            let snapshot = results.clone();
            results.retain(|r| {
                !snapshot.iter().any(|other| {
                    other.label != r.label
                        && other.embeds.contains(&r.label)
                        && !r.embeds.contains(&other.label)
                })
            });
            results.sort_by(|a, b| a.label.cmp(&b.label));
        }

        RuleIndex { by_import }
    }
}

#[derive(Debug, Default)]
struct Closure {
    embeds: BTreeSet<Label>,
    provides: BTreeSet<ImportSpec>,
}

fn close(
    key: &str,
    rules: &HashMap<String, IndexedRule>,
    done: &mut HashMap<String, Closure>,
    stack: &mut Vec<String>,
    cycles: &mut BTreeMap<Vec<String>, Vec<String>>,
) {
    if done.contains_key(key) {
        return;
    }
    if let Some(pos) = stack.iter().position(|k| k == key) {
        // Canonical form (sorted members) dedups the cycle across entry
        // points; the chain keeps traversal order for the report.
        let mut chain: Vec<String> = stack[pos..].to_vec();
        chain.push(key.to_string());
        let mut canon = stack[pos..].to_vec();
        canon.sort();
        cycles.entry(canon).or_insert(chain);
        return;
    }

    stack.push(key.to_string());
    let mut closure = Closure::default();
    for embed in &rules[key].embeds {
        let ekey = embed.to_string();
        closure.embeds.insert(embed.clone());
        if let Some(target) = rules.get(&ekey) {
            close(&ekey, rules, done, stack, cycles);
            if let Some(sub) = done.get(&ekey) {
                closure.embeds.extend(sub.embeds.iter().cloned());
                closure.provides.extend(sub.provides.iter().cloned());
            }
            closure.provides.extend(target.provides.iter().cloned());
        }
    }
    stack.pop();
    done.insert(key.to_string(), closure);
}

/// The frozen, read-only import index.
#[derive(Debug, Default)]
pub struct RuleIndex {
    by_import: BTreeMap<ImportSpec, Vec<FindResult>>,
}

impl RuleIndex {
    /// All rules satisfying an import, sorted by label. Empty when nothing
    /// in the repository provides it.
    pub fn find(&self, spec: &ImportSpec) -> &[FindResult] {
        self.by_import
            .get(spec)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(imp: &str) -> ImportSpec {
        ImportSpec::new("go", imp)
    }

    fn add(b: &RuleIndexBuilder, pkg: &str, name: &str, provides: &[&str], embeds: &[&str]) {
        let rule = Rule::new("lib", name);
        b.add_rule(
            pkg,
            &rule,
            provides.iter().map(|i| spec(i)).collect(),
            embeds.iter().map(|e| e.parse().unwrap()).collect(),
        );
    }

    fn finish(b: RuleIndexBuilder) -> (RuleIndex, Diagnostics) {
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);
        (ix, diags)
    }

    #[test]
    fn test_find_single_provider() {
        let b = RuleIndexBuilder::new();
        add(&b, "lib/a", "a", &["example.com/m/a"], &[]);
        let (ix, diags) = finish(b);
        assert!(diags.is_empty());
        let results = ix.find(&spec("example.com/m/a"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label.to_string(), "//lib/a");
        assert!(ix.find(&spec("example.com/other")).is_empty());
    }

    #[test]
    fn test_ambiguous_providers_sorted() {
        let b = RuleIndexBuilder::new();
        add(&b, "z", "z", &["example.com/m"], &[]);
        add(&b, "a", "a", &["example.com/m"], &[]);
        let (ix, _) = finish(b);
        let results = ix.find(&spec("example.com/m"));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label.to_string(), "//a");
        assert_eq!(results[1].label.to_string(), "//z");
    }

    #[test]
    fn test_embedder_shadows_embedded() {
        let b = RuleIndexBuilder::new();
        add(&b, "p", "p_lib", &["example.com/m/p"], &[]);
        add(&b, "p", "wrapper", &[], &["//p:p_lib"]);
        let (ix, diags) = finish(b);
        assert!(diags.is_empty());
        let results = ix.find(&spec("example.com/m/p"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label.to_string(), "//p:wrapper");
    }

    #[test]
    fn test_embeds_close_transitively() {
        let b = RuleIndexBuilder::new();
        add(&b, "a", "a", &["example.com/a"], &[]);
        add(&b, "b", "b", &[], &["//a"]);
        add(&b, "c", "c", &[], &["//b"]);
        let (ix, _) = finish(b);
        let results = ix.find(&spec("example.com/a"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label.to_string(), "//c");
        assert!(results[0].embeds.contains(&"//a".parse().unwrap()));
    }

    #[test]
    fn test_relative_embed_resolved_against_package() {
        let b = RuleIndexBuilder::new();
        add(&b, "p", "inner", &["example.com/p"], &[]);
        add(&b, "p", "outer", &[], &[":inner"]);
        let (ix, _) = finish(b);
        let results = ix.find(&spec("example.com/p"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label.to_string(), "//p:outer");
    }

    #[test]
    fn test_embed_cycle_reported_once() {
        let b = RuleIndexBuilder::new();
        add(&b, "a", "a", &["example.com/a"], &["//b"]);
        add(&b, "b", "b", &["example.com/b"], &["//a"]);
        let (ix, diags) = finish(b);
        let cycles = diags
            .items()
            .iter()
            .filter(|d| matches!(d, Diagnostic::EmbedCycle { .. }))
            .count();
        assert_eq!(cycles, 1);
        // Both rules stay usable for their own imports.
        assert!(!ix.find(&spec("example.com/a")).is_empty());
        assert!(!ix.find(&spec("example.com/b")).is_empty());
    }

    #[test]
    fn test_unnamed_rule_skipped() {
        let b = RuleIndexBuilder::new();
        let mut rule = Rule::new("lib", "x");
        rule.remove_attr("name");
        b.add_rule("p", &rule, vec![spec("example.com/p")], vec![]);
        let (ix, _) = finish(b);
        assert!(ix.find(&spec("example.com/p")).is_empty());
    }
}
