//! Static dictionary catalog: which directed dictionaries exist and their metadata

use crate::error::CatalogError;
use crate::util::order_in_groups;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Metadata for one directed dictionary, using the catalog's short keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryMeta {
    /// Source language (ISO 639-3)
    pub l1: String,
    /// Target language (ISO 639-3)
    pub l2: String,
    /// Content hash; the cache key once stored
    #[serde(rename = "h")]
    pub hash: String,
    /// Approximate number of lemmas
    #[serde(rename = "n")]
    pub lemmas: u64,
    /// Decompressed size in bytes
    #[serde(rename = "ds", alias = "s")]
    pub size: u64,
    #[serde(rename = "cs", default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// RFC 3339 timestamp, set only once the dictionary has been cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl DictionaryMeta {
    pub fn pair(&self) -> LangPair {
        LangPair {
            from: self.l1.clone(),
            to: self.l2.clone(),
        }
    }

    pub fn is_pair(&self, from: &str, to: &str) -> bool {
        self.l1 == from && self.l2 == to
    }

    /// File name of the gzip trie blob on the dictionary server
    pub fn trie_file(&self) -> String {
        match &self.file {
            Some(f) if !f.is_empty() => f.clone(),
            _ => format!("{}-{}.json.gz", self.l1, self.l2),
        }
    }
}

/// Directed language pair, written `nob-sme`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LangPair {
    pub from: String,
    pub to: String,
}

impl LangPair {
    pub fn new(from: &str, to: &str) -> Result<Self, CatalogError> {
        if !is_iso6393(from) || !is_iso6393(to) {
            return Err(CatalogError::InvalidPair(format!("{}-{}", from, to)));
        }
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Three lowercase ASCII letters
pub fn is_iso6393(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase())
}

impl FromStr for LangPair {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((from, to)) => LangPair::new(from, to).map_err(|_| CatalogError::InvalidPair(s.to_string())),
            None => Err(CatalogError::InvalidPair(s.to_string())),
        }
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Read-only table of known dictionaries. (l1, l2) is unique.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    metas: Vec<DictionaryMeta>,
}

impl Catalog {
    pub fn new(metas: Vec<DictionaryMeta>) -> Result<Self, CatalogError> {
        for (i, meta) in metas.iter().enumerate() {
            LangPair::new(&meta.l1, &meta.l2)?;
            if metas[..i].iter().any(|m| m.is_pair(&meta.l1, &meta.l2)) {
                return Err(CatalogError::DuplicatePair(meta.l1.clone(), meta.l2.clone()));
            }
        }
        Ok(Self { metas })
    }

    /// Parse a JSON array of metadata records
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let metas: Vec<DictionaryMeta> = serde_json::from_str(json)?;
        Self::new(metas)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn lookup(&self, from: &str, to: &str) -> Option<&DictionaryMeta> {
        self.metas.iter().find(|m| m.is_pair(from, to))
    }

    /// Like [`Catalog::lookup`] but a missing pair is an error
    pub fn get(&self, pair: &LangPair) -> Result<&DictionaryMeta, CatalogError> {
        self.lookup(&pair.from, &pair.to)
            .ok_or_else(|| CatalogError::NoDictionary(pair.from.clone(), pair.to.clone()))
    }

    /// Every dictionary from `from` to `to`; `None` matches any language
    pub fn list(&self, from: Option<&str>, to: Option<&str>) -> Vec<&DictionaryMeta> {
        self.metas
            .iter()
            .filter(|m| from.map_or(true, |l| m.l1 == l))
            .filter(|m| to.map_or(true, |l| m.l2 == l))
            .collect()
    }

    /// All dictionaries, those involving `lang` first, then the rest
    pub fn list_preferred(&self, lang: &str) -> Vec<&DictionaryMeta> {
        let mut metas: Vec<&DictionaryMeta> = self.metas.iter().collect();
        let from_lang = |m: &&DictionaryMeta| m.l1 == lang;
        let to_lang = |m: &&DictionaryMeta| m.l2 == lang;
        order_in_groups(&mut metas, &[&from_lang, &to_lang]);
        metas
    }

    /// Sum of lemma counts of dictionaries touching `lang` on either side
    pub fn total_lemmas(&self, lang: &str) -> u64 {
        self.metas
            .iter()
            .filter(|m| m.l1 == lang || m.l2 == lang)
            .map(|m| m.lemmas)
            .sum()
    }

    /// Every language code in the catalog, sorted
    pub fn languages(&self) -> Vec<&str> {
        let langs: BTreeSet<&str> = self
            .metas
            .iter()
            .flat_map(|m| [m.l1.as_str(), m.l2.as_str()])
            .collect();
        langs.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DictionaryMeta> {
        self.metas.iter()
    }
}
