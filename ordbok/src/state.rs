//! Application state shared by the front ends

use crate::cache::DictionaryCache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::OrdbokError;
use crate::session::Loader;
use std::sync::Arc;
use tracing::info;

/// Catalog, cache and loader, built once at startup
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<Catalog>,
    pub loader: Arc<Loader>,
}

impl AppState {
    /// Load the catalog and open the cache store under `config.data_dir`
    pub fn new(config: Config) -> Result<Self, OrdbokError> {
        let catalog = Arc::new(Catalog::load(&config.catalog_path)?);
        let cache = DictionaryCache::open(&config.data_dir)?;
        info!(
            data_dir = %config.data_dir.display(),
            dictionaries = catalog.len(),
            "Initialised application state"
        );
        let loader = Arc::new(Loader::new(config.clone(), catalog.clone(), cache)?);
        Ok(Self { config, catalog, loader })
    }

    pub fn cache(&self) -> &DictionaryCache {
        self.loader.cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_reads_catalog_and_opens_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("dict_metas.json"),
            r#"[{"l1":"nob","l2":"sme","h":"aaa111","n":3,"ds":80}]"#,
        )
        .unwrap();
        let state = AppState::new(Config::new(dir.path().to_path_buf())).unwrap();
        assert_eq!(state.catalog.len(), 1);
        assert!(state.cache().saved().await.unwrap().is_empty());
        assert!(dir.path().join("dictionaries.sqlite3").exists());
    }

    #[test]
    fn test_missing_catalog_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = AppState::new(Config::new(dir.path().to_path_buf())).err().unwrap();
        assert!(matches!(err, OrdbokError::Catalog(CatalogError::Io(_))));
    }
}
