//! Versioned key/value store over SQLite.
//!
//! A store is a named, versioned set of collections. Each collection maps a
//! text key to an opaque value and declares where its key comes from: either
//! a field of a JSON record (in-line) or the caller (out-of-line). All reads
//! and writes happen inside [`Store::transaction`], which commits only when
//! the body returns `Ok` and rolls back on every other exit path.

use crate::error::StoreError;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SCHEMA_TABLE: &str = "_collections";

/// Where a collection's keys come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
    /// Keys are supplied by the caller
    OutOfLine,
    /// Keys are read from this field of each JSON record
    Field(String),
}

impl KeyPath {
    fn encode(&self) -> String {
        match self {
            KeyPath::OutOfLine => String::new(),
            KeyPath::Field(field) => field.clone(),
        }
    }

    fn decode(raw: &str) -> Self {
        if raw.is_empty() {
            KeyPath::OutOfLine
        } else {
            KeyPath::Field(raw.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub key: KeyPath,
}

impl CollectionSpec {
    pub fn in_line(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            key: KeyPath::Field(field.to_string()),
        }
    }

    pub fn out_of_line(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: KeyPath::OutOfLine,
        }
    }

    fn table(&self) -> String {
        format!("\"c_{}\"", self.name)
    }
}

/// Name, version and collections of a store.
///
/// Opening a store whose on-disk version is older drops every collection and
/// recreates them from this spec. The content is a re-fetchable cache, so no
/// data is migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub name: String,
    pub version: u32,
    pub collections: Vec<CollectionSpec>,
}

impl StoreSpec {
    fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn validate(&self) -> Result<(), StoreError> {
        let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid(&self.name) {
            return Err(StoreError::SchemaMismatch(format!("invalid store name {:?}", self.name)));
        }
        for (i, c) in self.collections.iter().enumerate() {
            if !valid(&c.name) {
                return Err(StoreError::SchemaMismatch(format!("invalid collection name {:?}", c.name)));
            }
            if self.collections[..i].iter().any(|other| other.name == c.name) {
                return Err(StoreError::SchemaMismatch(format!("collection {:?} declared twice", c.name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

struct Inner {
    spec: StoreSpec,
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

/// Handle to an open store.
///
/// Open it once at startup and clone the handle to share it; every clone
/// multiplexes through the same connection, and transactions run one at a
/// time in the order they were submitted. [`Store::delete_store`] tears the
/// store down for every clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open (creating or upgrading) `<dir>/<name>.sqlite3`
    pub fn open(dir: &Path, spec: StoreSpec) -> Result<Self, StoreError> {
        spec.validate()?;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.sqlite3", spec.name));
        let mut conn = Connection::open(&path)?;

        let on_disk: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if on_disk > spec.version {
            return Err(StoreError::SchemaMismatch(format!(
                "store {} is at version {}, newer than requested {}",
                spec.name, on_disk, spec.version
            )));
        }
        if on_disk < spec.version {
            upgrade(&mut conn, &spec, on_disk)?;
        } else {
            verify(&conn, &spec)?;
        }
        debug!(path = %path.display(), version = spec.version, "Opened store");

        Ok(Self {
            inner: Arc::new(Inner {
                spec,
                path,
                conn: Arc::new(Mutex::new(Some(conn))),
            }),
        })
    }

    pub fn spec(&self) -> &StoreSpec {
        &self.inner.spec
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `body` against the named collections in one SQLite transaction.
    ///
    /// Writes commit together when `body` returns `Ok`; any error, or a panic,
    /// rolls all of them back.
    pub async fn transaction<T, F>(&self, collections: &[&str], mode: Mode, body: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let mut scope = Vec::with_capacity(collections.len());
        for name in collections {
            let spec = self
                .inner
                .spec
                .collection(name)
                .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
            scope.push(spec.clone());
        }

        // tokio's mutex is fair, so transactions start in submission order
        let guard = self.inner.conn.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            run_transaction(conn, scope, mode, body)
        })
        .await
        .map_err(|e| StoreError::TransactionFailed(format!("transaction task failed: {}", e)))?
    }

    /// Close the store and delete it from disk.
    ///
    /// Waits for transactions submitted before it to finish; transactions
    /// submitted afterwards fail with [`StoreError::Closed`]. The database file
    /// is renamed out of the way before removal, so a crash mid-delete never
    /// leaves a half-deleted store that would be opened again.
    pub async fn delete_store(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        }
        drop(guard);

        let path = self.inner.path.clone();
        tokio::task::spawn_blocking(move || remove_store_files(&path))
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("delete task failed: {}", e)))??;
        info!(store = %self.inner.spec.name, "Deleted store");
        Ok(())
    }
}

fn remove_store_files(path: &Path) -> Result<(), StoreError> {
    let tombstone = path.with_extension("sqlite3.deleting");
    match fs::rename(path, &tombstone) {
        Ok(()) => fs::remove_file(&tombstone)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // a previous delete may have crashed after the rename
            if tombstone.exists() {
                fs::remove_file(&tombstone)?;
            }
        }
        Err(e) => return Err(e.into()),
    }
    let journal = path.with_extension("sqlite3-journal");
    if journal.exists() {
        fs::remove_file(journal)?;
    }
    Ok(())
}

fn upgrade(conn: &mut Connection, spec: &StoreSpec, from: u32) -> Result<(), StoreError> {
    info!(store = %spec.name, from, to = spec.version, "Upgrading store, dropping cached collections");
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, key_path TEXT NOT NULL)",
        SCHEMA_TABLE
    ))?;

    let existing: Vec<String> = {
        let mut stmt = tx.prepare(&format!("SELECT name FROM {}", SCHEMA_TABLE))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };
    for name in &existing {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"c_{}\"", name))?;
    }
    tx.execute(&format!("DELETE FROM {}", SCHEMA_TABLE), [])?;

    for collection in &spec.collections {
        tx.execute_batch(&format!(
            "CREATE TABLE {} (key TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL) WITHOUT ROWID",
            collection.table()
        ))?;
        tx.execute(
            &format!("INSERT INTO {} (name, key_path) VALUES (?1, ?2)", SCHEMA_TABLE),
            params![collection.name, collection.key.encode()],
        )?;
    }
    tx.pragma_update(None, "user_version", spec.version)?;
    tx.commit()?;
    Ok(())
}

fn verify(conn: &Connection, spec: &StoreSpec) -> Result<(), StoreError> {
    for collection in &spec.collections {
        let stored: Option<String> = conn
            .query_row(
                &format!("SELECT key_path FROM {} WHERE name = ?1", SCHEMA_TABLE),
                [&collection.name],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(raw) if KeyPath::decode(&raw) == collection.key => {}
            Some(raw) => {
                return Err(StoreError::SchemaMismatch(format!(
                    "collection {} is keyed by {:?} on disk but {:?} was requested at the same version",
                    collection.name,
                    KeyPath::decode(&raw),
                    collection.key
                )))
            }
            None => {
                return Err(StoreError::SchemaMismatch(format!(
                    "collection {} is missing; bump the store version to create it",
                    collection.name
                )))
            }
        }
    }
    Ok(())
}

fn run_transaction<T, F>(conn: &mut Connection, scope: Vec<CollectionSpec>, mode: Mode, body: F) -> Result<T, StoreError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
{
    let behavior = match mode {
        Mode::ReadOnly => TransactionBehavior::Deferred,
        Mode::ReadWrite => TransactionBehavior::Immediate,
    };
    let tx = conn.transaction_with_behavior(behavior)?;
    let value = {
        let handle = Transaction {
            conn: &tx,
            scope: &scope,
            mode,
        };
        body(&handle)
    };
    match value {
        Ok(value) => {
            tx.commit()
                .map_err(|e| StoreError::TransactionFailed(format!("commit failed: {}", e)))?;
            Ok(value)
        }
        Err(e) => {
            if mode == Mode::ReadWrite {
                debug!(error = %e, "Rolling back transaction");
            }
            // dropping `tx` rolls back
            Err(e)
        }
    }
}

/// Collections available to one transaction body
pub struct Transaction<'t> {
    conn: &'t Connection,
    scope: &'t [CollectionSpec],
    mode: Mode,
}

impl<'t> Transaction<'t> {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn collection(&self, name: &str) -> Result<Collection<'t>, StoreError> {
        let spec = self
            .scope
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::NotInScope(name.to_string()))?;
        Ok(Collection {
            conn: self.conn,
            spec,
            table: spec.table(),
            mode: self.mode,
        })
    }
}

/// A collection handle valid for the enclosing transaction only
pub struct Collection<'t> {
    conn: &'t Connection,
    spec: &'t CollectionSpec,
    table: String,
    mode: Mode,
}

impl<'t> Collection<'t> {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.spec.key
    }

    /// Value stored under `key`; a missing key is `Ok(None)`
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every `(key, value)` pair in key order, optionally only keys starting with `prefix`
    pub fn get_all(&self, prefix: Option<&str>) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, Vec<u8>)> { Ok((row.get(0)?, row.get(1)?)) };
        let rows = match prefix {
            Some(prefix) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT key, value FROM {} WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                    self.table
                ))?;
                let rows = stmt.query_map([prefix], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT key, value FROM {} ORDER BY key", self.table))?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    pub fn get_all_json<T: DeserializeOwned>(&self, prefix: Option<&str>) -> Result<Vec<(String, T)>, StoreError> {
        self.get_all(prefix)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, serde_json::from_slice(&bytes)?)))
            .collect()
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Store raw bytes under `key` in an out-of-line collection
    pub fn add(&self, key: &str, value: &[u8], allow_replace: bool) -> Result<(), StoreError> {
        if let KeyPath::Field(field) = &self.spec.key {
            return Err(StoreError::Unsupported(format!(
                "collection {} takes its keys from field {:?}; raw bytes carry no key",
                self.spec.name, field
            )));
        }
        self.insert(key, value, allow_replace)
    }

    /// Store a JSON record. In-line collections read the key from the record
    /// and reject an explicit `key`; out-of-line collections require one.
    /// Returns the key used.
    pub fn add_json<T: Serialize>(&self, value: &T, key: Option<&str>, allow_replace: bool) -> Result<String, StoreError> {
        let record = serde_json::to_value(value)?;
        let key = match (&self.spec.key, key) {
            (KeyPath::Field(field), None) => match record.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(StoreError::InvalidKey(format!(
                        "record has no string or number field {:?}",
                        field
                    )))
                }
            },
            (KeyPath::Field(_), Some(_)) => {
                return Err(StoreError::InvalidKey(format!(
                    "collection {} uses in-line keys; an explicit key is not allowed",
                    self.spec.name
                )))
            }
            (KeyPath::OutOfLine, Some(key)) => key.to_string(),
            (KeyPath::OutOfLine, None) => {
                return Err(StoreError::InvalidKey(format!(
                    "collection {} needs an explicit key",
                    self.spec.name
                )))
            }
        };
        let bytes = serde_json::to_vec(&record)?;
        self.insert(&key, &bytes, allow_replace)?;
        Ok(key)
    }

    fn insert(&self, key: &str, value: &[u8], allow_replace: bool) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let sql = format!("INSERT INTO {} (key, value) VALUES (?1, ?2)", self.table);
        match self.conn.execute(&sql, params![key, value]) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                if !allow_replace {
                    return Err(StoreError::DuplicateKey {
                        collection: self.spec.name.clone(),
                        key: key.to_string(),
                    });
                }
                debug!(collection = %self.spec.name, key, "Replacing existing record");
                self.conn
                    .execute(&format!("DELETE FROM {} WHERE key = ?1", self.table), [key])?;
                self.conn.execute(&sql, params![key, value]).map_err(|e| {
                    warn!(collection = %self.spec.name, key, error = %e, "Insert failed after replacing");
                    StoreError::TransactionFailed(format!("insert of {:?} failed after delete: {}", key, e))
                })?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `key`; returns whether a record was removed
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE key = ?1", self.table), [key])?;
        Ok(removed > 0)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(StoreError::ReadOnly(self.spec.name.clone())),
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}
