//! Offline copies of downloaded dictionaries, kept in the local store

use crate::catalog::DictionaryMeta;
use crate::error::{DecodeError, StoreError};
use crate::store::{CollectionSpec, Mode, Store, StoreSpec};
use crate::util::{gunzip, gzip};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

pub const STORE_NAME: &str = "dictionaries";
/// Version 2 keys `metas` by content hash; version 1 keyed it by language pair
pub const STORE_VERSION: u32 = 2;

const METAS: &str = "metas";
const BLOBS: &str = "blobs";

pub fn store_spec() -> StoreSpec {
    StoreSpec {
        name: STORE_NAME.to_string(),
        version: STORE_VERSION,
        collections: vec![
            CollectionSpec::in_line(METAS, "h"),
            CollectionSpec::out_of_line(BLOBS),
        ],
    }
}

/// A cached dictionary: its stored metadata and the gzip blob
#[derive(Debug, Clone)]
pub struct CachedDictionary {
    pub meta: DictionaryMeta,
    pub blob: Vec<u8>,
}

impl CachedDictionary {
    /// The trie payload as it was fetched
    pub fn decompress(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(gunzip(&self.blob)?)
    }
}

/// Dictionary-level operations over the `metas` and `blobs` collections
#[derive(Clone)]
pub struct DictionaryCache {
    store: Store,
}

impl DictionaryCache {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Store::open(dir, store_spec())?))
    }

    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Freshest cached copy of the dictionary for `meta`'s language pair
    pub async fn get(&self, meta: &DictionaryMeta) -> Result<Option<CachedDictionary>, StoreError> {
        let (l1, l2) = (meta.l1.clone(), meta.l2.clone());
        let found = self
            .store
            .transaction(&[METAS, BLOBS], Mode::ReadOnly, move |tx| {
                let metas: Vec<(String, DictionaryMeta)> = tx.collection(METAS)?.get_all_json(None)?;
                let mut candidates: Vec<DictionaryMeta> = metas
                    .into_iter()
                    .map(|(_, meta)| meta)
                    .filter(|m| m.is_pair(&l1, &l2))
                    .collect();
                candidates.sort_by_key(|m| std::cmp::Reverse(saved_at(m)));
                let blobs = tx.collection(BLOBS)?;
                for meta in candidates {
                    match blobs.get(&meta.hash)? {
                        Some(blob) => return Ok(Some(CachedDictionary { meta, blob })),
                        None => debug!(hash = %meta.hash, "Skipping metadata without a blob"),
                    }
                }
                Ok(None)
            })
            .await?;

        match &found {
            Some(cached) => debug!(pair = %cached.meta.pair(), hash = %cached.meta.hash, "Cache hit"),
            None => debug!(pair = %meta.pair(), "Cache miss"),
        }
        Ok(found)
    }

    /// Store `buffer` (the decompressed trie payload) with `meta`, stamped with
    /// the current time. Returns the metadata as stored.
    pub async fn save(&self, meta: &DictionaryMeta, buffer: Vec<u8>, allow_replace: bool) -> Result<DictionaryMeta, StoreError> {
        self.save_at(meta, buffer, allow_replace, Utc::now()).await
    }

    pub(crate) async fn save_at(
        &self,
        meta: &DictionaryMeta,
        buffer: Vec<u8>,
        allow_replace: bool,
        date: DateTime<Utc>,
    ) -> Result<DictionaryMeta, StoreError> {
        let mut stored = meta.clone();
        stored.date = Some(date.to_rfc3339());
        let record = stored.clone();
        self.store
            .transaction(&[METAS, BLOBS], Mode::ReadWrite, move |tx| {
                let blob = gzip(&buffer)?;
                tx.collection(METAS)?.add_json(&record, None, allow_replace)?;
                tx.collection(BLOBS)?.add(&record.hash, &blob, allow_replace)?;
                Ok(())
            })
            .await?;
        info!(pair = %stored.pair(), hash = %stored.hash, "Saved dictionary");
        Ok(stored)
    }

    /// Remove the dictionary stored under `hash`, metadata and blob together
    pub async fn delete(&self, hash: &str) -> Result<(), StoreError> {
        let key = hash.to_string();
        self.store
            .transaction(&[METAS, BLOBS], Mode::ReadWrite, move |tx| {
                let meta_removed = tx.collection(METAS)?.delete(&key)?;
                let blob_removed = tx.collection(BLOBS)?.delete(&key)?;
                if meta_removed || blob_removed {
                    Ok(())
                } else {
                    Err(StoreError::NotFound(key))
                }
            })
            .await?;
        info!(hash, "Deleted cached dictionary");
        Ok(())
    }

    /// Metadata of every cached dictionary, in hash order
    pub async fn saved(&self) -> Result<Vec<DictionaryMeta>, StoreError> {
        self.store
            .transaction(&[METAS], Mode::ReadOnly, |tx| {
                let metas: Vec<(String, DictionaryMeta)> = tx.collection(METAS)?.get_all_json(None)?;
                Ok(metas.into_iter().map(|(_, meta)| meta).collect())
            })
            .await
    }

    /// Delete the whole store from disk
    pub async fn purge(&self) -> Result<(), StoreError> {
        self.store.delete_store().await
    }
}

fn saved_at(meta: &DictionaryMeta) -> Option<DateTime<Utc>> {
    meta.date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn meta(l1: &str, l2: &str, hash: &str) -> DictionaryMeta {
        DictionaryMeta {
            l1: l1.to_string(),
            l2: l2.to_string(),
            hash: hash.to_string(),
            lemmas: 3,
            size: 100,
            compressed_size: None,
            file: None,
            date: None,
        }
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let m = meta("nob", "sme", "h1");
        assert!(cache.get(&m).await.unwrap().is_none());

        let stored = cache.save(&m, b"[null,{}]".to_vec(), false).await.unwrap();
        assert!(stored.date.is_some());

        let cached = cache.get(&m).await.unwrap().unwrap();
        assert_eq!(cached.meta, stored);
        assert_eq!(cached.decompress().unwrap(), b"[null,{}]");
        assert!(cache.get(&meta("sme", "nob", "other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_twice_with_replace_keeps_second() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let m = meta("nob", "sme", "h1");
        cache.save(&m, b"first".to_vec(), true).await.unwrap();
        cache.save(&m, b"second".to_vec(), true).await.unwrap();

        assert_eq!(cache.saved().await.unwrap().len(), 1);
        let cached = cache.get(&m).await.unwrap().unwrap();
        assert_eq!(cached.decompress().unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_original_kept() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let m = meta("nob", "sme", "h1");
        cache.save(&m, b"first".to_vec(), false).await.unwrap();

        let err = cache.save(&m, b"second".to_vec(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        let cached = cache.get(&m).await.unwrap().unwrap();
        assert_eq!(cached.decompress().unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_freshest_copy_wins() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let now = Utc::now();
        cache
            .save_at(&meta("nob", "sme", "new"), b"new".to_vec(), false, now)
            .await
            .unwrap();
        cache
            .save_at(&meta("nob", "sme", "old"), b"old".to_vec(), false, now - Duration::days(3))
            .await
            .unwrap();

        let cached = cache.get(&meta("nob", "sme", "whatever")).await.unwrap().unwrap();
        assert_eq!(cached.meta.hash, "new");
        assert_eq!(cached.decompress().unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_metadata_without_blob_falls_back_to_older_copy() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let now = Utc::now();
        cache
            .save_at(&meta("nob", "sme", "new"), b"new".to_vec(), false, now)
            .await
            .unwrap();
        cache
            .save_at(&meta("nob", "sme", "old"), b"old".to_vec(), false, now - Duration::days(3))
            .await
            .unwrap();
        cache
            .store()
            .transaction(&[BLOBS], Mode::ReadWrite, |tx| {
                assert!(tx.collection(BLOBS)?.delete("new")?);
                Ok(())
            })
            .await
            .unwrap();

        let cached = cache.get(&meta("nob", "sme", "whatever")).await.unwrap().unwrap();
        assert_eq!(cached.meta.hash, "old");
        assert_eq!(cached.decompress().unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_delete_by_hash() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        let m = meta("nob", "sme", "h1");
        cache.save(&m, b"x".to_vec(), false).await.unwrap();
        cache.save(&meta("sme", "nob", "h2"), b"y".to_vec(), false).await.unwrap();

        cache.delete("h1").await.unwrap();
        assert!(cache.get(&m).await.unwrap().is_none());
        let left: Vec<String> = cache.saved().await.unwrap().into_iter().map(|m| m.hash).collect();
        assert_eq!(left, vec!["h2"]);

        assert!(matches!(cache.delete("h1").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_purge_removes_store() {
        let dir = TempDir::new().unwrap();
        let cache = DictionaryCache::open(dir.path()).unwrap();
        cache.save(&meta("nob", "sme", "h1"), b"x".to_vec(), false).await.unwrap();
        let path = cache.store().path().to_path_buf();

        cache.purge().await.unwrap();
        assert!(!path.exists());
        assert!(matches!(cache.saved().await, Err(StoreError::Closed)));

        // reopening starts empty
        let cache = DictionaryCache::open(dir.path()).unwrap();
        assert!(cache.saved().await.unwrap().is_empty());
    }
}
