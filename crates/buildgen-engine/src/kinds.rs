//! Per-kind merge policy tables and kind indirection records.
//!
//! Language extensions contribute a [`KindInfo`] per rule kind plus the
//! load statements providing those kinds. Everything is serde-deserializable
//! so policy tables can ship as data.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use buildgen_syntax::Directive;

/// Merge policy for one rule kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindInfo {
    /// "Sole output" kind: matches the single existing rule of the kind
    /// regardless of name.
    #[serde(default)]
    pub match_any: bool,
    /// Identity attributes compared during matching; immutable once
    /// matched.
    #[serde(default)]
    pub match_attrs: Vec<String>,
    /// Attributes eligible for union-merge instead of replacement.
    #[serde(default)]
    pub mergeable_attrs: HashSet<String>,
    /// Mergeable attributes whose element order is preserved as written
    /// instead of label-sorted.
    #[serde(default)]
    pub unsorted_attrs: HashSet<String>,
    /// Attributes that block rule deletion while non-empty.
    #[serde(default)]
    pub non_empty_attrs: HashSet<String>,
    /// Attributes populated by the resolution pass.
    #[serde(default)]
    pub resolve_attrs: HashSet<String>,
}

/// A load statement a language extension's kinds come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadInfo {
    pub path: String,
    pub symbols: Vec<String>,
}

/// The builtin table of known kinds and their source loads.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, KindInfo>,
    loads: Vec<LoadInfo>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_kind(&mut self, name: impl Into<String>, info: KindInfo) {
        self.kinds.insert(name.into(), info);
    }

    pub fn register_load(&mut self, load: LoadInfo) {
        self.loads.push(load);
    }

    pub fn kind(&self, name: &str) -> Option<&KindInfo> {
        self.kinds.get(name)
    }

    /// The load path providing a kind, if it is not builtin.
    pub fn load_for(&self, kind: &str) -> Option<&str> {
        self.loads
            .iter()
            .find(|l| l.symbols.iter().any(|s| s == kind))
            .map(|l| l.path.as_str())
    }
}

/// One user-declared kind mapping: generated rules of `from_kind` are
/// emitted as `kind_name`, loaded from `kind_load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedKind {
    pub from_kind: String,
    pub kind_name: String,
    pub kind_load: String,
}

/// Kind indirection in effect for one package: mapping and aliasing,
/// already flattened by the directive-loading scaffolding (inheritance
/// across directories happens there).
#[derive(Debug, Clone, Default)]
pub struct PackageKinds {
    /// Keyed by the mapping's target (surface) kind name.
    pub kind_map: HashMap<String, MappedKind>,
    /// Surface kind to underlying kind.
    pub aliases: HashMap<String, String>,
}

impl PackageKinds {
    /// Build from directive comments:
    /// `# buildgen:map_kind <from_kind> <kind_name> <kind_load>` and
    /// `# buildgen:alias <surface> <underlying>`. Malformed directives are
    /// logged and skipped.
    pub fn from_directives(directives: &[Directive]) -> Self {
        let mut out = PackageKinds::default();
        for d in directives {
            let fields: Vec<&str> = d.value.split_whitespace().collect();
            match (d.key.as_str(), fields.as_slice()) {
                ("map_kind", [from_kind, kind_name, kind_load]) => {
                    out.kind_map.insert(
                        kind_name.to_string(),
                        MappedKind {
                            from_kind: from_kind.to_string(),
                            kind_name: kind_name.to_string(),
                            kind_load: kind_load.to_string(),
                        },
                    );
                }
                ("alias", [surface, underlying]) => {
                    out.aliases
                        .insert(surface.to_string(), underlying.to_string());
                }
                ("map_kind", _) | ("alias", _) => {
                    tracing::warn!(key = %d.key, value = %d.value, "malformed directive");
                }
                _ => {}
            }
        }
        out
    }

    /// The mapping entry applied when emitting a generated rule of the
    /// given (logical) kind, if any.
    pub fn mapping_for_generated(&self, kind: &str) -> Option<&MappedKind> {
        self.kind_map.values().find(|m| m.from_kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_info_from_json() {
        let info: KindInfo = serde_json::from_str(
            r#"{"match_attrs": ["importpath"], "mergeable_attrs": ["srcs", "deps"], "unsorted_attrs": ["deps"], "non_empty_attrs": ["srcs"], "resolve_attrs": ["deps"]}"#,
        )
        .unwrap();
        assert_eq!(info.match_attrs, vec!["importpath"]);
        assert!(info.mergeable_attrs.contains("srcs"));
        assert!(info.unsorted_attrs.contains("deps"));
        assert!(!info.match_any);
    }

    #[test]
    fn test_from_directives() {
        let directives = vec![
            Directive {
                key: "map_kind".into(),
                value: "lib my_lib //tools:my.bzl".into(),
            },
            Directive {
                key: "alias".into(),
                value: "their_lib lib".into(),
            },
            Directive {
                key: "map_kind".into(),
                value: "too few".into(),
            },
        ];
        let pk = PackageKinds::from_directives(&directives);
        assert_eq!(pk.kind_map["my_lib"].from_kind, "lib");
        assert_eq!(pk.aliases["their_lib"], "lib");
        assert_eq!(pk.kind_map.len(), 1);
        assert_eq!(pk.mapping_for_generated("lib").unwrap().kind_name, "my_lib");
    }

    #[test]
    fn test_registry_load_for() {
        let mut reg = KindRegistry::new();
        reg.register_load(LoadInfo {
            path: "//tools:rules.bzl".into(),
            symbols: vec!["lib".into(), "bin".into()],
        });
        assert_eq!(reg.load_for("lib"), Some("//tools:rules.bzl"));
        assert_eq!(reg.load_for("native_thing"), None);
    }
}
