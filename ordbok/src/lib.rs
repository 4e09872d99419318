//! Ordbok - offline bilingual dictionary lookup
//!
//! Core library: trie wire formats and decoding, incremental prefix search,
//! the local cache store for downloaded dictionaries, and the byte fetcher.

pub mod trie;
pub mod search;
pub mod codec;
mod legacy;
pub mod store;
pub mod cache;
pub mod catalog;
pub mod downloader;
pub mod session;
pub mod config;
pub mod error;
pub mod state;
pub mod util;

pub use error::{CatalogError, DecodeError, FetchError, OrdbokError, SearchError, StoreError};
pub use state::AppState;
pub use trie::{Collation, Entry, Node, Trie};
pub use search::{PrefixSearch, SearchHit};
pub use codec::{decode, decode_as, decode_with, encode, TrieFormat};
pub use store::{CollectionSpec, KeyPath, Mode, Store, StoreSpec};
pub use cache::{CachedDictionary, DictionaryCache};
pub use catalog::{Catalog, DictionaryMeta, LangPair};
pub use downloader::{verify_hash, DownloadState, Downloads, FetchProgress, Fetcher};
pub use session::{Loader, Session, Source};
pub use config::{get_data_dir, Config};
pub use util::{fmt_filesize, human_filesize, FilesizeFormat};
