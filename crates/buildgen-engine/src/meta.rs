//! Kind indirection in front of the per-language resolvers.
//!
//! Users rename kinds two ways: aliasing (a wrapper macro that behaves
//! like an underlying kind) and kind mapping (generated rules emitted
//! under a different kind and load). Both are resolved to a logical kind
//! by the pure [`logical_kind`], and the matching resolver is wrapped in
//! a decorator that presents rules to it under that logical kind. The
//! resolvers themselves never learn about the indirection.

use std::sync::Arc;

use buildgen_core::{Diagnostic, Diagnostics, Label};
use buildgen_syntax::{File, Rule};

use crate::index::{ImportSpec, RuleIndex, RuleIndexBuilder};
use crate::kinds::PackageKinds;
use crate::resolver::{resolve_rule, ResolveConfig, Resolver, ResolverRegistry};

/// The logical kind behind a surface kind: alias substitution first, then
/// a reverse lookup through the kind map. A kind that is neither aliased
/// nor mapped is its own logical kind.
pub fn logical_kind(pkg: &PackageKinds, surface: &str) -> String {
    let kind = pkg
        .aliases
        .get(surface)
        .map(String::as_str)
        .unwrap_or(surface);
    match pkg.kind_map.get(kind) {
        Some(mapped) => mapped.from_kind.clone(),
        None => kind.to_string(),
    }
}

/// Decorator presenting rules to the inner resolver under their logical
/// kind.
struct KindRewrite {
    inner: Arc<dyn Resolver>,
    logical: String,
}

impl KindRewrite {
    fn relabel(&self, rule: &Rule) -> Rule {
        let mut r = rule.clone();
        r.kind = self.logical.clone();
        r
    }
}

impl Resolver for KindRewrite {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn provides(&self, rule: &Rule, pkg: &str) -> Vec<ImportSpec> {
        self.inner.provides(&self.relabel(rule), pkg)
    }

    fn embeds(&self, rule: &Rule, pkg: &str) -> Vec<Label> {
        self.inner.embeds(&self.relabel(rule), pkg)
    }

    fn imports(&self, rule: &Rule) -> Vec<String> {
        self.inner.imports(&self.relabel(rule))
    }

    fn deps_attr(&self) -> &str {
        self.inner.deps_attr()
    }
}

/// Dispatches indexing and resolution through the kind indirection.
pub struct MetaResolver {
    registry: ResolverRegistry,
}

impl MetaResolver {
    pub fn new(registry: ResolverRegistry) -> Self {
        MetaResolver { registry }
    }

    /// The resolver handling a surface kind, wrapped when the surface and
    /// logical kinds differ.
    pub fn resolver_for(&self, pkg: &PackageKinds, surface: &str) -> Option<Arc<dyn Resolver>> {
        let logical = logical_kind(pkg, surface);
        let inner = self.registry.get(&logical)?;
        if logical == surface {
            Some(inner)
        } else {
            Some(Arc::new(KindRewrite { inner, logical }))
        }
    }

    /// Contribute every resolvable rule of a file to the index.
    pub fn index_file(&self, file: &File, pkg_kinds: &PackageKinds, builder: &RuleIndexBuilder) {
        for rule in file.rules() {
            let Some(resolver) = self.resolver_for(pkg_kinds, &rule.kind) else {
                continue;
            };
            let provides = resolver.provides(rule, &file.pkg);
            let embeds = resolver.embeds(rule, &file.pkg);
            builder.add_rule(&file.pkg, rule, provides, embeds);
        }
    }

    /// Resolve every rule of a file against the frozen index. A kind the
    /// user explicitly aliased or mapped but no resolver handles is a
    /// diagnostic; other unknown kinds are skipped quietly.
    pub fn resolve_file(
        &self,
        file: &mut File,
        pkg_kinds: &PackageKinds,
        ix: &RuleIndex,
        cfg: &ResolveConfig,
        diags: &mut Diagnostics,
    ) {
        let pkg = file.pkg.clone();
        for rule in file.rules_mut() {
            let surface = rule.kind.clone();
            match self.resolver_for(pkg_kinds, &surface) {
                Some(resolver) => {
                    resolve_rule(resolver.as_ref(), rule, &pkg, ix, cfg, diags);
                }
                None => {
                    let declared = pkg_kinds.aliases.contains_key(&surface)
                        || pkg_kinds.kind_map.contains_key(&surface);
                    if declared {
                        diags.record(Diagnostic::UnresolvedKind {
                            kind: surface,
                            pkg: pkg.clone(),
                        });
                    } else {
                        tracing::debug!(kind = %surface, pkg = %pkg, "no resolver for kind");
                    }
                }
            }
        }
    }
}
