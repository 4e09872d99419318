//! Loading a dictionary for a language pair and searching it

use crate::cache::{CachedDictionary, DictionaryCache};
use crate::catalog::{Catalog, DictionaryMeta, LangPair};
use crate::codec::decode_with;
use crate::config::Config;
use crate::downloader::{verify_hash, Downloads, FetchProgress, Fetcher};
use crate::error::{DecodeError, FetchError, OrdbokError, SearchError, StoreError};
use crate::search::{PrefixSearch, SearchHit};
use crate::trie::{Collation, Trie};
use crate::util::gunzip;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Where a session's trie came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cache,
    Network,
    /// Read from a local trie file, as the HTTP service does
    File,
}

/// A decoded dictionary, owned by whoever loaded it
#[derive(Debug)]
pub struct Session {
    pub meta: DictionaryMeta,
    pub source: Source,
    trie: Trie,
}

impl Session {
    pub fn new(meta: DictionaryMeta, trie: Trie, source: Source) -> Self {
        Self { meta, source, trie }
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn search(&self, prefix: &str) -> PrefixSearch<'_> {
        self.trie.prefix_search(prefix)
    }

    /// First `limit` hits for what the user typed
    pub fn lookup(&self, query: &str, limit: usize) -> Result<Vec<SearchHit<'_>>, SearchError> {
        self.trie.lookup(query.trim(), limit)
    }
}

/// Produces sessions, from the cache when possible and the network otherwise
pub struct Loader {
    catalog: Arc<Catalog>,
    cache: DictionaryCache,
    fetcher: Fetcher,
    downloads: Downloads,
    config: Config,
}

impl Loader {
    pub fn new(config: Config, catalog: Arc<Catalog>, cache: DictionaryCache) -> Result<Self, OrdbokError> {
        let fetcher = Fetcher::new(config.fetch_timeout)?;
        Ok(Self {
            catalog,
            cache,
            fetcher,
            downloads: Downloads::new(),
            config,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &DictionaryCache {
        &self.cache
    }

    pub fn collation(&self) -> Collation {
        self.config.collation
    }

    pub fn trie_url(&self, meta: &DictionaryMeta) -> String {
        self.config.trie_url(&meta.trie_file())
    }

    /// Load the dictionary for `pair`.
    ///
    /// A cached copy that no longer decodes is deleted and fetched again. A
    /// cached copy whose hash differs from the catalog's is replaced by a fresh
    /// download, and only served when the server cannot be reached.
    /// Starting a load cancels any download still running for an earlier one.
    pub async fn load(
        &self,
        pair: &LangPair,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
    ) -> Result<Session, OrdbokError> {
        let meta = self.catalog.get(pair)?.clone();

        let outdated = match self.cache.get(&meta).await? {
            Some(cached) if cached.meta.hash == meta.hash => {
                let hash = cached.meta.hash.clone();
                match self.decode_cached(cached).await {
                    Ok(session) => return Ok(session),
                    Err(OrdbokError::Decode(e)) => {
                        warn!(%pair, hash = %hash, error = %e, "Cached dictionary is unreadable, fetching again");
                        match self.cache.delete(&hash).await {
                            Ok(()) | Err(StoreError::NotFound(_)) => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                    Err(e) => return Err(e),
                }
                None
            }
            Some(cached) => {
                info!(%pair, cached = %cached.meta.hash, current = %meta.hash, "Cached dictionary is outdated");
                Some(cached)
            }
            None => None,
        };

        match (self.fetch(meta, progress_tx).await, outdated) {
            (Err(OrdbokError::Fetch(FetchError::Network(e))), Some(cached)) => {
                warn!(%pair, error = %e, "Server unreachable, using outdated cached dictionary");
                self.decode_cached(cached)
                    .await
                    .map_err(|_| FetchError::Network(e).into())
            }
            (result, _) => result,
        }
    }

    /// Fetch `pair` from the server even when a cached copy exists
    pub async fn download(
        &self,
        pair: &LangPair,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
    ) -> Result<Session, OrdbokError> {
        let meta = self.catalog.get(pair)?.clone();
        self.fetch(meta, progress_tx).await
    }

    /// Cancel the running download, if any
    pub fn cancel(&self) -> bool {
        self.downloads.cancel()
    }

    async fn decode_cached(&self, cached: CachedDictionary) -> Result<Session, OrdbokError> {
        let collation = self.config.collation;
        let CachedDictionary { meta, blob } = cached;
        let trie = tokio::task::spawn_blocking(move || {
            let bytes = gunzip(&blob).map_err(DecodeError::from)?;
            decode_with(&bytes, collation)
        })
        .await
        .map_err(|e| OrdbokError::Task(e.to_string()))??;
        info!(pair = %meta.pair(), headwords = trie.len(), "Loaded dictionary from cache");
        Ok(Session::new(meta, trie, Source::Cache))
    }

    async fn fetch(
        &self,
        meta: DictionaryMeta,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
    ) -> Result<Session, OrdbokError> {
        let mut ticket = self.downloads.begin();
        // the ticket stays registered until the result is persisted, so a
        // newer load can still cancel this one up to the save
        let saved = async {
            let (trie, bytes) = self.fetch_and_decode(&meta, progress_tx, &mut ticket.cancel_rx).await?;
            if *ticket.cancel_rx.borrow() {
                return Err(OrdbokError::from(FetchError::Cancelled));
            }
            let stored = self.cache.save(&meta, bytes, true).await?;
            self.drop_stale_copies(&stored).await?;
            Ok::<_, OrdbokError>((stored, trie))
        }
        .await;
        self.downloads.finish(ticket.id);
        let (stored, trie) = saved?;

        info!(pair = %stored.pair(), headwords = trie.len(), "Loaded dictionary from network");
        Ok(Session::new(stored, trie, Source::Network))
    }

    async fn fetch_and_decode(
        &self,
        meta: &DictionaryMeta,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<(Trie, Vec<u8>), OrdbokError> {
        let url = self.trie_url(meta);
        let bytes = self.fetcher.fetch(&url, progress_tx, cancel_rx).await?;

        if meta.hash.starts_with("sha256:") {
            verify_hash(&bytes, &meta.hash)?;
        }

        let collation = self.config.collation;
        let decoded = tokio::task::spawn_blocking(move || {
            let trie = decode_with(&bytes, collation)?;
            Ok::<_, OrdbokError>((trie, bytes))
        })
        .await
        .map_err(|e| OrdbokError::Task(e.to_string()))??;

        // a newer load may have superseded this one while it was decoding
        if *cancel_rx.borrow() {
            return Err(FetchError::Cancelled.into());
        }
        Ok(decoded)
    }

    /// Remove older cached versions of the same language pair
    async fn drop_stale_copies(&self, current: &DictionaryMeta) -> Result<(), StoreError> {
        for old in self.cache.saved().await? {
            if old.is_pair(&current.l1, &current.l2) && old.hash != current.hash {
                info!(pair = %old.pair(), hash = %old.hash, "Removing superseded dictionary");
                self.cache.delete(&old.hash).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::tests::serve;
    use crate::codec::encode;
    use crate::downloader::DownloadState;
    use crate::trie::Entry;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;

    const TEST_CATALOG: &str = r#"[
        {"l1":"nob","l2":"sme","h":"aaa111","n":3,"ds":80},
        {"l1":"sme","l2":"nob","h":"bbb222","n":3,"ds":80,"f":"slow"},
        {"l1":"fin","l2":"sme","h":"ccc333","n":3,"ds":80,"f":"plain"}
    ]"#;

    fn loader(dir: &TempDir, addr: SocketAddr) -> Loader {
        let mut config = Config::new(dir.path().to_path_buf());
        config.base_url = format!("http://{}/", addr);
        config.fetch_timeout = Duration::from_secs(10);
        let catalog = Arc::new(Catalog::from_json(TEST_CATALOG).unwrap());
        let cache = DictionaryCache::open(dir.path()).unwrap();
        Loader::new(config, catalog, cache).unwrap()
    }

    fn nob_sme() -> LangPair {
        "nob-sme".parse().unwrap()
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_is_offline() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let online = loader(&dir, addr);

        let session = online.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Network);
        assert!(session.meta.date.is_some());
        let words: Vec<String> = session.lookup("  ca ", 10).unwrap().into_iter().map(|h| h.word).collect();
        assert_eq!(words, vec!["cat"]);
        drop(online);

        // nothing listens here, so only the cache can answer
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let offline = loader(&dir, dead);
        let session = offline.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Cache);
        assert_eq!(session.trie().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_is_replaced() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = loader(&dir, addr);
        let meta = loader.catalog().lookup("nob", "sme").unwrap().clone();
        loader.cache().save(&meta, b"not a trie".to_vec(), false).await.unwrap();

        let session = loader.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Network);
        let cached = loader.cache().get(&meta).await.unwrap().unwrap();
        assert!(decode_with(&cached.decompress().unwrap(), Collation::Codepoint).is_ok());
    }

    #[tokio::test]
    async fn test_newer_copy_replaces_stale_one() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = loader(&dir, addr);
        let mut stale = loader.catalog().lookup("nob", "sme").unwrap().clone();
        stale.hash = "old-hash".to_string();
        loader.cache().save(&stale, b"[null,{}]".to_vec(), false).await.unwrap();

        loader.download(&nob_sme(), None).await.unwrap();
        let hashes: Vec<String> = loader.cache().saved().await.unwrap().into_iter().map(|m| m.hash).collect();
        assert_eq!(hashes, vec!["aaa111"]);
    }

    fn stale_payload() -> Vec<u8> {
        let mut trie = Trie::new(Collation::Codepoint);
        trie.insert("dog", Entry::new("N", ["beana"]));
        encode(&trie).unwrap()
    }

    #[tokio::test]
    async fn test_outdated_hash_is_refetched() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = loader(&dir, addr);
        let mut old = loader.catalog().lookup("nob", "sme").unwrap().clone();
        old.hash = "old-hash".to_string();
        loader.cache().save(&old, stale_payload(), false).await.unwrap();

        let session = loader.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Network);
        assert_eq!(session.meta.hash, "aaa111");
        assert!(session.trie().find_exact("cat").is_some());
        let hashes: Vec<String> = loader.cache().saved().await.unwrap().into_iter().map(|m| m.hash).collect();
        assert_eq!(hashes, vec!["aaa111"]);
    }

    #[tokio::test]
    async fn test_outdated_copy_serves_when_offline() {
        let dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let loader = loader(&dir, dead);
        let mut old = loader.catalog().lookup("nob", "sme").unwrap().clone();
        old.hash = "old-hash".to_string();
        loader.cache().save(&old, stale_payload(), false).await.unwrap();

        let session = loader.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Cache);
        assert_eq!(session.meta.hash, "old-hash");
        assert!(session.trie().find_exact("dog").is_some());
    }

    #[tokio::test]
    async fn test_new_load_cancels_running_one() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = Arc::new(loader(&dir, addr));
        let (tx, mut rx) = mpsc::channel(64);

        let slow = {
            let loader = loader.clone();
            tokio::spawn(async move {
                let pair: LangPair = "sme-nob".parse().unwrap();
                loader.load(&pair, Some(&tx)).await.map(|s| s.meta)
            })
        };
        while let Some(p) = rx.recv().await {
            if p.state == DownloadState::Downloading {
                break;
            }
        }

        let session = loader.load(&nob_sme(), None).await.unwrap();
        assert_eq!(session.source, Source::Network);

        let err = tokio::time::timeout(Duration::from_secs(5), slow)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        let hashes: Vec<String> = loader.cache().saved().await.unwrap().into_iter().map(|m| m.hash).collect();
        assert_eq!(hashes, vec!["aaa111"]);
    }

    #[tokio::test]
    async fn test_cancelled_load_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = Arc::new(loader(&dir, addr));
        let (tx, mut rx) = mpsc::channel(64);

        let task = {
            let loader = loader.clone();
            tokio::spawn(async move {
                let pair: LangPair = "sme-nob".parse().unwrap();
                loader.load(&pair, Some(&tx)).await.map(|s| s.meta)
            })
        };
        while let Some(p) = rx.recv().await {
            if p.state == DownloadState::Downloading {
                break;
            }
        }
        assert!(loader.cancel());

        let err = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(loader.cache().saved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pair_and_plain_payload() {
        let dir = TempDir::new().unwrap();
        let addr = serve().await;
        let loader = loader(&dir, addr);

        let err = loader.load(&"sme-fin".parse().unwrap(), None).await.unwrap_err();
        assert!(matches!(err, OrdbokError::Catalog(_)));

        let session = loader.load(&"fin-sme".parse().unwrap(), None).await.unwrap();
        assert!(session.trie().find_exact("cat").is_some());
        assert_eq!(session.search("").count(), 1);
    }
}
