//! Translator configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Destination language tag sent to the orchestrator.
    pub target_language: String,
    /// Source language tag.
    pub source_language: String,
    /// Master switch; disabled means every translate call is a passthrough.
    pub enabled: bool,
    /// Consult the in-memory cache.
    pub cache_enabled: bool,
    /// Eviction threshold for the cache.
    pub max_cache_size: usize,
    /// Persistent cache file path; empty disables persistence.
    pub cache_path: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            target_language: "it".to_string(),
            source_language: "en".to_string(),
            enabled: true,
            cache_enabled: true,
            max_cache_size: DEFAULT_MAX_ENTRIES,
            cache_path: String::new(),
        }
    }
}

impl TranslatorConfig {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The persistent cache file, when persistence is enabled.
    pub fn persistence_path(&self) -> Option<PathBuf> {
        if self.cache_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.cache_path))
        }
    }

    /// Apply a CONFIG_UPDATE document: recognized keys override the current
    /// values, everything else is ignored.
    pub fn apply_update(&mut self, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)?;

        if let Some(lang) = value.get("target_language").and_then(Value::as_str) {
            self.target_language = lang.to_string();
        }
        if let Some(lang) = value.get("source_language").and_then(Value::as_str) {
            self.source_language = lang.to_string();
        }
        if let Some(enabled) = value.get("enabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        if let Some(enabled) = value.get("cache_enabled").and_then(Value::as_bool) {
            self.cache_enabled = enabled;
        }
        if let Some(size) = value.get("max_cache_size").and_then(Value::as_u64) {
            self.max_cache_size = size as usize;
        }
        if let Some(path) = value.get("cache_path").and_then(Value::as_str) {
            self.cache_path = path.to_string();
        }

        debug!("configuration updated: {:?}", self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = TranslatorConfig::default();
        assert_eq!(config.target_language, "it");
        assert_eq!(config.source_language, "en");
        assert!(config.enabled);
        assert!(config.cache_enabled);
        assert_eq!(config.max_cache_size, 10_000);
        assert_eq!(config.persistence_path(), None);
    }

    #[test]
    fn test_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = TranslatorConfig::default();
        config.target_language = "de".to_string();
        config.cache_path = "cache.dat".to_string();
        config.save_to(file.path()).unwrap();

        let loaded = TranslatorConfig::load_from(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.persistence_path(), Some(PathBuf::from("cache.dat")));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"target_language":"fr"}"#).unwrap();

        let loaded = TranslatorConfig::load_from(file.path()).unwrap();
        assert_eq!(loaded.target_language, "fr");
        assert_eq!(loaded.source_language, "en");
        assert!(loaded.enabled);
    }

    #[test]
    fn test_apply_update_overrides_only_present_keys() {
        let mut config = TranslatorConfig::default();
        config
            .apply_update(r#"{"enabled":false,"max_cache_size":50,"unknown":"ignored"}"#)
            .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.max_cache_size, 50);
        assert_eq!(config.target_language, "it");
    }
}
