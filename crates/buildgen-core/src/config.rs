use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub resolve: ResolveSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict: false,
            log_dir: default_log_dir(),
            resolve: ResolveSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveSettings {
    /// Language pairs (importer, provider) for which cross-language
    /// resolution is allowed when same-language lookup fails.
    #[serde(default)]
    pub cross_languages: Vec<(String, String)>,
    /// Disable repository-wide indexing entirely; only overrides apply.
    #[serde(default = "default_index")]
    pub index: bool,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            cross_languages: Vec::new(),
            index: default_index(),
        }
    }
}

fn default_log_dir() -> String {
    "logs".into()
}
fn default_index() -> bool {
    true
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert!(!s.strict);
        assert_eq!(s.log_dir, "logs");
        assert!(s.resolve.index);
        assert!(s.resolve.cross_languages.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.strict = true;
        s.resolve.cross_languages.push(("go".into(), "proto".into()));
        s.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.strict);
        assert_eq!(loaded.resolve.cross_languages.len(), 1);
    }
}
