//! Load statement reconciliation.
//!
//! After merging, the file's load statements are rewritten to exactly the
//! symbols it uses: one statement per source path, alphabetized, unused
//! symbols pruned. A symbol already loaded keeps its original path even if
//! the registry knows another source for it, and symbols referenced only
//! from opaque statements are treated as used.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use buildgen_syntax::{File, LoadStmt, Stmt};

use crate::kinds::{KindRegistry, PackageKinds};

pub fn fix_loads(file: &mut File, registry: &KindRegistry, pkg: &PackageKinds) {
    let before = file.format();

    let existing: HashMap<String, LoadStmt> = file
        .stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Load(l) => Some((l.path.clone(), l.clone())),
            _ => None,
        })
        .collect();
    let loaded_from: HashMap<String, String> = existing
        .values()
        .flat_map(|l| l.symbols.iter().map(|s| (s.clone(), l.path.clone())))
        .collect();

    let mut needed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for rule in file.rules() {
        let kind = rule.kind.as_str();
        let path = loaded_from
            .get(kind)
            .cloned()
            .or_else(|| pkg.kind_map.get(kind).map(|m| m.kind_load.clone()))
            .or_else(|| registry.load_for(kind).map(str::to_string));
        if let Some(path) = path {
            needed.entry(path).or_default().insert(kind.to_string());
        }
    }

    // Symbols only opaque statements reference stay loaded.
    let opaques: Vec<&str> = file
        .stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Opaque { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    for (sym, path) in &loaded_from {
        if needed.values().any(|syms| syms.contains(sym)) {
            continue;
        }
        if opaques.iter().any(|t| mentions(t, sym)) {
            needed
                .entry(path.clone())
                .or_default()
                .insert(sym.clone());
        }
    }

    file.stmts.retain(|s| !matches!(s, Stmt::Load(_)));
    for (path, symbols) in needed.iter().rev() {
        let symbols: Vec<String> = symbols.iter().cloned().collect();
        let stmt = match existing.get(path) {
            // Only a statement emitted exactly as written keeps its
            // comments; a reordered symbol list counts as a change.
            Some(orig) if orig.symbols == symbols => orig.clone(),
            _ => LoadStmt::new(path.clone(), symbols),
        };
        file.stmts.insert(0, Stmt::Load(stmt));
    }

    if file.format() != before {
        file.dirty = true;
    }
}

/// Whole-word occurrence of an identifier in opaque statement text.
fn mentions(text: &str, symbol: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut from = 0;
    while let Some(i) = text[from..].find(symbol) {
        let start = from + i;
        let end = start + symbol.len();
        let before_ok = !text[..start].chars().next_back().is_some_and(is_ident);
        let after_ok = !text[end..].chars().next().is_some_and(is_ident);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::LoadInfo;
    use buildgen_syntax::parse;

    fn registry() -> KindRegistry {
        let mut reg = KindRegistry::new();
        reg.register_load(LoadInfo {
            path: "//tools:rules.bzl".into(),
            symbols: vec!["lib".into(), "bin".into()],
        });
        reg
    }

    fn fix(src: &str) -> File {
        let mut file = parse("BUILD", "pkg", src).unwrap();
        fix_loads(&mut file, &registry(), &PackageKinds::default());
        file
    }

    #[test]
    fn test_missing_load_added() {
        let file = fix("lib(\n    name = \"x\",\n    srcs = [\"a.go\"],\n)\n");
        assert!(file
            .format()
            .starts_with("load(\"//tools:rules.bzl\", \"lib\")"));
        assert!(file.dirty);
    }

    #[test]
    fn test_unused_symbol_pruned() {
        let file = fix("load(\"//tools:rules.bzl\", \"bin\", \"lib\")\n\nlib(\n    name = \"x\",\n)\n");
        let text = file.format();
        assert!(text.contains("load(\"//tools:rules.bzl\", \"lib\")"));
        assert!(!text.contains("\"bin\""));
    }

    #[test]
    fn test_fully_unused_load_dropped() {
        let file = fix("load(\"//other:defs.bzl\", \"thing\")\n");
        assert!(!file.format().contains("load("));
    }

    #[test]
    fn test_opaque_usage_keeps_symbol() {
        // The assignment is outside the rule model, so the reference lives
        // in an opaque statement.
        let src = "load(\"//other:defs.bzl\", \"my_macro\")\n\nVERSIONS = my_macro(\"1.2\")\n";
        let file = fix(src);
        assert!(file
            .format()
            .contains("load(\"//other:defs.bzl\", \"my_macro\")"));
    }

    #[test]
    fn test_existing_path_preferred_over_registry() {
        let src = "load(\"//custom:wrappers.bzl\", \"lib\")\n\nlib(\n    name = \"x\",\n)\n";
        let file = fix(src);
        let text = file.format();
        assert!(text.contains("load(\"//custom:wrappers.bzl\", \"lib\")"));
        assert!(!text.contains("//tools:rules.bzl"));
    }

    #[test]
    fn test_mapped_kind_load_added() {
        let pkg = PackageKinds::from_directives(&[buildgen_syntax::Directive {
            key: "map_kind".into(),
            value: "lib my_lib //tools:my.bzl".into(),
        }]);
        let mut file = parse("BUILD", "pkg", "my_lib(\n    name = \"x\",\n)\n").unwrap();
        fix_loads(&mut file, &registry(), &pkg);
        assert!(file
            .format()
            .contains("load(\"//tools:my.bzl\", \"my_lib\")"));
    }

    #[test]
    fn test_unchanged_load_keeps_comment_and_dirty_unset() {
        let src = "# needed here\nload(\"//tools:rules.bzl\", \"lib\")\n\nlib(\n    name = \"x\",\n)\n";
        let file = fix(src);
        assert!(file.format().contains("# needed here"));
        assert!(!file.dirty);
    }

    #[test]
    fn test_reordered_load_drops_comment() {
        let src = "\
# toolchain macros
load(\"//tools:rules.bzl\", \"lib\", \"bin\")

lib(
    name = \"x\",
)

bin(
    name = \"b\",
)
";
        let file = fix(src);
        let text = file.format();
        assert!(text.contains("load(\"//tools:rules.bzl\", \"bin\", \"lib\")"));
        assert!(!text.contains("# toolchain macros"));
        assert!(file.dirty);
    }

    #[test]
    fn test_mentions_whole_word_only() {
        assert!(mentions("my_macro(name = \"x\")", "my_macro"));
        assert!(!mentions("my_macro_v2(name = \"x\")", "my_macro"));
        assert!(!mentions("xmy_macro(name = \"x\")", "my_macro"));
    }
}
