//! Error types for Ordbok

use thiserror::Error;

/// Failure to turn a raw dictionary payload into a trie.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed trie payload: {0}")]
    Malformed(String),

    #[error("Truncated trie payload")]
    Truncated,

    #[error("Unrecognised trie format (payload starts with {0:?})")]
    UnknownFormat(String),

    #[error("Decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Internal invariant violation found while walking a trie.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Corrupt trie below {path:?}: {reason}")]
    CorruptTrie { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate key {key:?} in collection {collection}")]
    DuplicateKey { collection: String, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Store has no collection named {0:?}")]
    UnknownCollection(String),

    #[error("Collection {0:?} was not declared for this transaction")]
    NotInScope(String),

    #[error("Write attempted in a readonly transaction on {0}")]
    ReadOnly(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Store has been deleted")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid language pair {0:?}")]
    InvalidPair(String),

    #[error("No dictionary {0}-{1}")]
    NoDictionary(String, String),

    #[error("Catalog lists {0}-{1} more than once")]
    DuplicatePair(String, String),

    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum OrdbokError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Invalid {var}: {reason}")]
    Config { var: String, reason: String },

    #[error("Task join error: {0}")]
    Task(String),
}

impl OrdbokError {
    /// Cancellation is an expected outcome, not something to show the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrdbokError::Fetch(FetchError::Cancelled))
    }
}

impl serde::Serialize for OrdbokError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
