//! Runtime configuration: where dictionaries come from and where they are kept

use crate::error::OrdbokError;
use crate::trie::Collation;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://ordbok.example.org/";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
const CATALOG_FILE: &str = "dict_metas.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Holds the cache store and, by default, the catalog
    pub data_dir: PathBuf,
    /// Tries are fetched from `<base_url>tries/<file>`
    pub base_url: String,
    pub catalog_path: PathBuf,
    pub fetch_timeout: Duration,
    pub collation: Collation,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            catalog_path: data_dir.join(CATALOG_FILE),
            data_dir,
            base_url: DEFAULT_BASE_URL.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            collation: Collation::default(),
        }
    }

    /// Defaults overridden by `ORDBOK_DATA_DIR`, `ORDBOK_BASE_URL`,
    /// `ORDBOK_CATALOG`, `ORDBOK_FETCH_TIMEOUT` and `ORDBOK_COLLATION`.
    /// A value that does not parse is an error.
    pub fn from_env() -> Result<Self, OrdbokError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, OrdbokError> {
        let data_dir = var("ORDBOK_DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(get_data_dir);
        let mut config = Self::new(data_dir);
        if let Some(url) = var("ORDBOK_BASE_URL").filter(|v| !v.is_empty()) {
            config.base_url = url;
        }
        if let Some(path) = var("ORDBOK_CATALOG").filter(|v| !v.is_empty()) {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(secs) = var("ORDBOK_FETCH_TIMEOUT").filter(|v| !v.is_empty()) {
            let secs: u64 = secs.parse().map_err(|e: std::num::ParseIntError| invalid("ORDBOK_FETCH_TIMEOUT", e))?;
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(collation) = var("ORDBOK_COLLATION").filter(|v| !v.is_empty()) {
            config.collation = collation.parse().map_err(|e: String| invalid("ORDBOK_COLLATION", e))?;
        }
        Ok(config)
    }

    /// URL of a trie file on the dictionary server
    pub fn trie_url(&self, file: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/tries/{}", base, file)
    }
}

fn invalid(var: &str, reason: impl ToString) -> OrdbokError {
    OrdbokError::Config {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

/// Default data directory
///
/// - Linux: ~/.local/share/ordbok
/// - macOS: ~/Library/Application Support/ordbok
/// - Windows: %APPDATA%\ordbok
/// - Fallback: ./data
pub fn get_data_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("ordbok"),
        None => PathBuf::from("data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ORDBOK_DATA_DIR", "/tmp/ordbok-test"),
            ("ORDBOK_BASE_URL", "http://localhost:8080"),
            ("ORDBOK_FETCH_TIMEOUT", "5"),
            ("ORDBOK_COLLATION", "nordic"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ordbok-test"));
        assert_eq!(config.catalog_path, PathBuf::from("/tmp/ordbok-test/dict_metas.json"));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.collation, Collation::Nordic);
        assert_eq!(config.trie_url("nob-sme.json.gz"), "http://localhost:8080/tries/nob-sme.json.gz");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.data_dir, get_data_dir());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            config.trie_url("sme-nob.json.gz"),
            "https://ordbok.example.org/tries/sme-nob.json.gz"
        );
    }

    #[test]
    fn test_unparsable_values_are_rejected() {
        let err = Config::from_lookup(|k| (k == "ORDBOK_FETCH_TIMEOUT").then(|| "soon".to_string())).unwrap_err();
        assert!(matches!(err, OrdbokError::Config { ref var, .. } if var == "ORDBOK_FETCH_TIMEOUT"));

        let err = Config::from_lookup(|k| (k == "ORDBOK_COLLATION").then(|| "icu".to_string())).unwrap_err();
        assert!(matches!(err, OrdbokError::Config { ref var, .. } if var == "ORDBOK_COLLATION"));
    }
}
