//! Per-language dependency resolution.
//!
//! A [`Resolver`] is the seam a language extension implements: what a
//! rule provides, what it embeds, and what its sources import. The free
//! function [`resolve_rule`] turns those imports into labels via the
//! frozen [`RuleIndex`], honoring user overrides and configured
//! cross-language fallbacks, and merges the result into the rule's
//! dependency attribute.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use buildgen_core::config::Settings;
use buildgen_core::{Diagnostic, Diagnostics, Label};
use buildgen_syntax::values::{merge_exprs, Value};
use buildgen_syntax::{Directive, Rule};

use crate::index::{FindResult, ImportSpec, RuleIndex};

/// What a language extension knows about its rules.
pub trait Resolver: Send + Sync {
    /// Language name, used as the import namespace.
    fn name(&self) -> &str;

    /// Import specs this rule satisfies.
    fn provides(&self, rule: &Rule, pkg: &str) -> Vec<ImportSpec>;

    /// Labels of rules whose provides this rule re-exports.
    fn embeds(&self, rule: &Rule, pkg: &str) -> Vec<Label>;

    /// Raw import strings this rule's sources require.
    fn imports(&self, rule: &Rule) -> Vec<String>;

    /// The attribute resolved labels are written to.
    fn deps_attr(&self) -> &str {
        "deps"
    }
}

/// Registered resolvers, keyed by the rule kind they handle.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    by_kind: HashMap<String, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.by_kind.insert(kind.into(), resolver);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Resolver>> {
        self.by_kind.get(kind).cloned()
    }
}

/// A user-declared import-to-label mapping that bypasses the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOverride {
    pub lang: String,
    pub imp: String,
    pub label: Label,
}

impl ResolveOverride {
    /// Parse a `resolve <lang> <import> <label>` directive. Malformed
    /// directives are logged and skipped.
    pub fn from_directive(d: &Directive) -> Option<Self> {
        if d.key != "resolve" {
            return None;
        }
        let fields: Vec<&str> = d.value.split_whitespace().collect();
        let parsed = match fields.as_slice() {
            [lang, imp, label] => label.parse().ok().map(|label| ResolveOverride {
                lang: lang.to_string(),
                imp: imp.to_string(),
                label,
            }),
            _ => None,
        };
        if parsed.is_none() {
            tracing::warn!(value = %d.value, "malformed resolve directive");
        }
        parsed
    }
}

/// Which languages may satisfy another language's imports when the
/// importing language has no provider of its own.
#[derive(Debug, Clone, Default)]
pub struct CrossResolver {
    allowed: Vec<(String, String)>,
}

impl CrossResolver {
    /// `pairs` are (importing language, providing language).
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        CrossResolver { allowed: pairs }
    }

    pub fn providers_for<'a>(&'a self, lang: &'a str) -> impl Iterator<Item = &'a str> {
        self.allowed
            .iter()
            .filter(move |(l, _)| l == lang)
            .map(|(_, p)| p.as_str())
    }
}

/// Everything resolution needs besides the index itself.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub overrides: Vec<ResolveOverride>,
    pub cross: CrossResolver,
    /// With indexing disabled only overrides produce dependencies.
    pub index: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ResolveConfig {
            overrides: Vec::new(),
            cross: CrossResolver::default(),
            index: true,
        }
    }
}

impl ResolveConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        ResolveConfig {
            overrides: Vec::new(),
            cross: CrossResolver::new(settings.resolve.cross_languages.clone()),
            index: settings.resolve.index,
        }
    }

    /// Collect `resolve` override directives from a file's directive list.
    pub fn add_directives(&mut self, directives: &[Directive]) {
        self.overrides
            .extend(directives.iter().filter_map(ResolveOverride::from_directive));
    }
}

/// Resolve one rule's imports into its dependency attribute.
///
/// Per import: overrides win; otherwise the index is consulted, falling
/// back to configured cross-language providers when the import's own
/// language has none. A lone candidate becomes a dependency, several
/// become an [`Diagnostic::AmbiguousImport`] and no dependency, none is
/// logged and skipped. Imports the rule itself satisfies, and candidates
/// pointing back at the rule, are dropped silently.
pub fn resolve_rule(
    resolver: &dyn Resolver,
    rule: &mut Rule,
    pkg: &str,
    ix: &RuleIndex,
    cfg: &ResolveConfig,
    diags: &mut Diagnostics,
) {
    let attr_name = resolver.deps_attr().to_string();
    if rule.attr(&attr_name).is_some_and(|a| a.keep()) {
        return;
    }

    let from = Label::absolute(pkg, rule.name().unwrap_or_default());
    let own: HashSet<ImportSpec> = resolver.provides(rule, pkg).into_iter().collect();

    let mut deps: Vec<String> = Vec::new();
    for imp in resolver.imports(rule) {
        let spec = ImportSpec::new(resolver.name(), imp.as_str());
        if own.contains(&spec) {
            continue;
        }
        if let Some(ov) = cfg
            .overrides
            .iter()
            .find(|o| o.lang == spec.lang && o.imp == spec.imp)
        {
            deps.push(ov.label.rel_to(pkg).to_string());
            continue;
        }

        if !cfg.index {
            continue;
        }

        let mut candidates: Vec<&FindResult> = ix.find(&spec).iter().collect();
        if candidates.is_empty() {
            for provider in cfg.cross.providers_for(&spec.lang) {
                let alt = ImportSpec::new(provider, imp.as_str());
                candidates = ix.find(&alt).iter().collect();
                if !candidates.is_empty() {
                    break;
                }
            }
        }
        candidates.retain(|c| c.label != from);

        match candidates.as_slice() {
            [] => {
                tracing::debug!(lang = %spec.lang, imp = %imp, rule = %from, "no rule provides import");
            }
            [single] => deps.push(single.label.rel_to(pkg).to_string()),
            many => diags.record(Diagnostic::AmbiguousImport {
                lang: spec.lang.clone(),
                imp: imp.clone(),
                from: from.to_string(),
                candidates: many.iter().map(|c| c.label.to_string()).collect(),
            }),
        }
    }

    let have_deps = !deps.is_empty();
    let generated = Value::Sorted(deps).to_expr();
    match rule.attr_expr(&attr_name).cloned() {
        Some(old) => match merge_exprs(Some(&generated), &old, true) {
            Ok(Some(e)) => rule.set_attr(&attr_name, e),
            Ok(None) => {
                rule.remove_attr(&attr_name);
            }
            Err(err) => {
                tracing::debug!(attr = %attr_name, %err, "keeping unmergeable value");
            }
        },
        None => {
            if have_deps {
                rule.set_attr(&attr_name, generated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RuleIndexBuilder;
    use buildgen_syntax::Expr;

    /// Test resolver: provides come from `importpath`, imports from the
    /// `_imports` private attribute, embeds from the `embed` attribute.
    struct FakeResolver;

    impl Resolver for FakeResolver {
        fn name(&self) -> &str {
            "go"
        }

        fn provides(&self, rule: &Rule, _pkg: &str) -> Vec<ImportSpec> {
            rule.attr_string("importpath")
                .map(|p| vec![ImportSpec::new("go", p)])
                .unwrap_or_default()
        }

        fn embeds(&self, rule: &Rule, _pkg: &str) -> Vec<Label> {
            rule.attr_strings("embed")
                .unwrap_or_default()
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect()
        }

        fn imports(&self, rule: &Rule) -> Vec<String> {
            rule.private("_imports").unwrap_or_default().to_vec()
        }
    }

    fn provider(b: &RuleIndexBuilder, pkg: &str, name: &str, importpath: &str) {
        let mut r = Rule::new("lib", name);
        r.set_attr("importpath", Expr::string(importpath));
        let provides = FakeResolver.provides(&r, pkg);
        b.add_rule(pkg, &r, provides, vec![]);
    }

    fn importer(imports: &[&str]) -> Rule {
        let mut r = Rule::new("lib", "x");
        r.set_private("_imports", imports.iter().map(|s| s.to_string()).collect());
        r
    }

    fn resolve(rule: &mut Rule, pkg: &str, ix: &RuleIndex, cfg: &ResolveConfig) -> Diagnostics {
        let mut diags = Diagnostics::new(false);
        resolve_rule(&FakeResolver, rule, pkg, ix, cfg, &mut diags);
        diags
    }

    #[test]
    fn test_resolves_import_to_label() {
        let b = RuleIndexBuilder::new();
        provider(&b, "lib/a", "a", "example.com/m/a");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let mut rule = importer(&["example.com/m/a"]);
        let diags = resolve(&mut rule, "cmd", &ix, &ResolveConfig::default());
        assert!(diags.is_empty());
        assert_eq!(rule.attr_strings("deps").unwrap(), vec!["//lib/a"]);
    }

    #[test]
    fn test_same_package_label_relative() {
        let b = RuleIndexBuilder::new();
        provider(&b, "p", "dep", "example.com/m/p");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let mut rule = importer(&["example.com/m/p"]);
        resolve(&mut rule, "p", &ix, &ResolveConfig::default());
        assert_eq!(rule.attr_strings("deps").unwrap(), vec![":dep"]);
    }

    #[test]
    fn test_self_import_dropped() {
        let b = RuleIndexBuilder::new();
        provider(&b, "p", "x", "example.com/m/p");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        // The importing rule is the sole provider of its own import.
        let mut rule = importer(&["example.com/m/p"]);
        let diags = resolve(&mut rule, "p", &ix, &ResolveConfig::default());
        assert!(diags.is_empty());
        assert!(rule.attr("deps").is_none());
    }

    #[test]
    fn test_own_provides_skipped() {
        let ix = RuleIndex::default();
        let mut rule = importer(&["example.com/m/self"]);
        rule.set_attr("importpath", Expr::string("example.com/m/self"));
        let diags = resolve(&mut rule, "p", &ix, &ResolveConfig::default());
        assert!(diags.is_empty());
        assert!(rule.attr("deps").is_none());
    }

    #[test]
    fn test_ambiguous_import_omitted_and_diagnosed() {
        let b = RuleIndexBuilder::new();
        provider(&b, "a", "a", "example.com/m");
        provider(&b, "b", "b", "example.com/m");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let mut rule = importer(&["example.com/m"]);
        let diags = resolve(&mut rule, "cmd", &ix, &ResolveConfig::default());
        assert_eq!(diags.items().len(), 1);
        assert!(matches!(
            diags.items()[0],
            Diagnostic::AmbiguousImport { .. }
        ));
        assert!(rule.attr("deps").is_none());
    }

    #[test]
    fn test_unknown_import_skipped_silently() {
        let ix = RuleIndex::default();
        let mut rule = importer(&["example.com/vendor/dep"]);
        let diags = resolve(&mut rule, "p", &ix, &ResolveConfig::default());
        assert!(diags.is_empty());
        assert!(rule.attr("deps").is_none());
    }

    #[test]
    fn test_override_beats_index() {
        let b = RuleIndexBuilder::new();
        provider(&b, "wrong", "wrong", "example.com/m");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let cfg = ResolveConfig {
            overrides: vec![ResolveOverride {
                lang: "go".into(),
                imp: "example.com/m".into(),
                label: "//right:lbl".parse().unwrap(),
            }],
            ..Default::default()
        };
        let mut rule = importer(&["example.com/m"]);
        resolve(&mut rule, "p", &ix, &cfg);
        assert_eq!(rule.attr_strings("deps").unwrap(), vec!["//right:lbl"]);
    }

    #[test]
    fn test_override_from_directive() {
        let mut cfg = ResolveConfig::default();
        cfg.add_directives(&[
            Directive {
                key: "resolve".into(),
                value: "go example.com/m //right:lbl".into(),
            },
            Directive {
                key: "resolve".into(),
                value: "too few".into(),
            },
            Directive {
                key: "map_kind".into(),
                value: "lib my_lib //tools:my.bzl".into(),
            },
        ]);
        assert_eq!(
            cfg.overrides,
            vec![ResolveOverride {
                lang: "go".into(),
                imp: "example.com/m".into(),
                label: "//right:lbl".parse().unwrap(),
            }]
        );
    }

    #[test]
    fn test_index_disabled_leaves_imports_alone() {
        let b = RuleIndexBuilder::new();
        provider(&b, "lib/a", "a", "example.com/m/a");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let cfg = ResolveConfig {
            index: false,
            ..Default::default()
        };
        let mut rule = importer(&["example.com/m/a"]);
        let diags = resolve(&mut rule, "cmd", &ix, &cfg);
        assert!(diags.is_empty());
        assert!(rule.attr("deps").is_none());
    }

    #[test]
    fn test_cross_language_fallback() {
        let b = RuleIndexBuilder::new();
        let r = Rule::new("proto_lib", "msgs");
        b.add_rule(
            "api",
            &r,
            vec![ImportSpec::new("proto", "example.com/api")],
            vec![],
        );
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let cfg = ResolveConfig {
            cross: CrossResolver::new(vec![("go".into(), "proto".into())]),
            ..Default::default()
        };
        let mut rule = importer(&["example.com/api"]);
        let diags = resolve(&mut rule, "cmd", &ix, &cfg);
        assert!(diags.is_empty());
        assert_eq!(rule.attr_strings("deps").unwrap(), vec!["//api:msgs"]);
    }

    #[test]
    fn test_stale_resolved_deps_replaced_keeping_protected() {
        let b = RuleIndexBuilder::new();
        provider(&b, "lib/a", "a", "example.com/m/a");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let mut rule = importer(&["example.com/m/a"]);
        rule.set_attr(
            "deps",
            Expr::List(vec![
                Expr::string("//stale:dep"),
                Expr::Str {
                    value: "//manual:dep".into(),
                    suffix: Some("# keep".into()),
                },
            ]),
        );
        resolve(&mut rule, "cmd", &ix, &ResolveConfig::default());
        let deps = rule.attr_strings("deps").unwrap();
        assert!(deps.contains(&"//lib/a"));
        assert!(deps.contains(&"//manual:dep"));
        assert!(!deps.contains(&"//stale:dep"));
    }

    #[test]
    fn test_kept_deps_attr_untouched() {
        let b = RuleIndexBuilder::new();
        provider(&b, "lib/a", "a", "example.com/m/a");
        let mut diags = Diagnostics::new(false);
        let ix = b.finish(&mut diags);

        let mut rule = importer(&["example.com/m/a"]);
        rule.set_attr("deps", Expr::list_of(&["//manual:only"]));
        rule.attr_mut("deps").unwrap().suffix = Some("# keep".into());
        resolve(&mut rule, "cmd", &ix, &ResolveConfig::default());
        assert_eq!(rule.attr_strings("deps").unwrap(), vec!["//manual:only"]);
    }
}
