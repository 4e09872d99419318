//! Wire formats for dictionary tries.
//!
//! The canonical (compact) payload is a JSON nested structure
//! `node := [entries | null, {char: node, ...}]` where `entries` is
//! `[[pos, [translation, ...]], ...]`. The older XML payload is handled by
//! [`crate::legacy`] and is read-only.

use crate::error::DecodeError;
use crate::legacy;
use crate::trie::{Collation, Entry, Node, Trie};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Deepest node accepted, in edges from the root. Decoding recurses once per
/// level, so deeper payloads are rejected instead of exhausting the stack.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrieFormat {
    Compact,
    LegacyXml,
}

impl TrieFormat {
    /// Sniff the format from the first non-whitespace byte
    pub fn detect(bytes: &[u8]) -> Option<TrieFormat> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        match bytes.iter().copied().find(|b| !b.is_ascii_whitespace())? {
            b'[' => Some(TrieFormat::Compact),
            b'<' => Some(TrieFormat::LegacyXml),
            _ => None,
        }
    }
}

/// Decode with the default collation, detecting the format
pub fn decode(bytes: &[u8]) -> Result<Trie, DecodeError> {
    decode_with(bytes, Collation::default())
}

pub fn decode_with(bytes: &[u8], collation: Collation) -> Result<Trie, DecodeError> {
    match TrieFormat::detect(bytes) {
        Some(format) => decode_as(format, bytes, collation),
        None if bytes.iter().all(|b| b.is_ascii_whitespace()) => Err(DecodeError::Truncated),
        None => {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(16)]).into_owned();
            Err(DecodeError::UnknownFormat(head))
        }
    }
}

pub fn decode_as(format: TrieFormat, bytes: &[u8], collation: Collation) -> Result<Trie, DecodeError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let started = std::time::Instant::now();
    let trie = match format {
        TrieFormat::Compact => decode_compact(bytes, collation)?,
        TrieFormat::LegacyXml => legacy::decode_xml(bytes, collation)?,
    };
    debug!(
        ?format,
        bytes = bytes.len(),
        headwords = trie.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Decoded trie"
    );
    Ok(trie)
}

fn decode_compact(bytes: &[u8], collation: Collation) -> Result<Trie, DecodeError> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    // trie depth follows headword length, which can exceed serde_json's default
    // limit; NodeSeed enforces MAX_DEPTH instead
    deserializer.disable_recursion_limit();
    let root = NodeSeed { collation, depth: 0 }
        .deserialize(&mut deserializer)
        .map_err(json_error)?;
    deserializer.end().map_err(json_error)?;
    Ok(Trie::from_root(root, collation))
}

fn json_error(e: serde_json::Error) -> DecodeError {
    if e.is_eof() {
        DecodeError::Truncated
    } else {
        DecodeError::Malformed(e.to_string())
    }
}

/// `[pos, [translation, ...]]`; a null pos is kept as an empty tag
#[derive(Deserialize)]
struct WireEntry(Option<String>, Vec<String>);

impl From<WireEntry> for Entry {
    fn from(WireEntry(pos, translations): WireEntry) -> Self {
        Entry {
            pos: pos.unwrap_or_default(),
            translations,
        }
    }
}

#[derive(Clone, Copy)]
struct NodeSeed {
    collation: Collation,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for NodeSeed {
    type Value = Node;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        if self.depth > MAX_DEPTH {
            return Err(de::Error::custom(format!("trie nested deeper than {} levels", MAX_DEPTH)));
        }
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for NodeSeed {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a trie node [entries or null, {char: node}]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let entries: Option<Vec<WireEntry>> = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let children = seq
            .next_element_seed(ChildrenSeed {
                collation: self.collation,
                depth: self.depth + 1,
            })?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok(Node {
            entries: entries.unwrap_or_default().into_iter().map(Entry::from).collect(),
            children,
        })
    }
}

struct ChildrenSeed {
    collation: Collation,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ChildrenSeed {
    type Value = Vec<(char, Node)>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ChildrenSeed {
    type Value = Vec<(char, Node)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from single characters to trie nodes")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut children: Vec<(char, Node)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(key) = map.next_key::<String>()? {
            let mut chars = key.chars();
            let edge = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(de::Error::custom(format!(
                        "child key {:?} is not a single character",
                        key
                    )))
                }
            };
            let child = map.next_value_seed(NodeSeed {
                collation: self.collation,
                depth: self.depth,
            })?;
            children.push((edge, child));
        }

        let collation = self.collation;
        children.sort_by(|a, b| collation.compare(a.0, b.0));
        if let Some(pair) = children
            .windows(2)
            .find(|pair| collation.compare(pair[0].0, pair[1].0) == Ordering::Equal)
        {
            return Err(de::Error::custom(format!("duplicate child key {:?}", pair[1].0)));
        }
        Ok(children)
    }
}

struct WireNode<'a>(&'a Node);
struct WireEntries<'a>(&'a [Entry]);
struct WireChildren<'a>(&'a [(char, Node)]);

impl Serialize for WireNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        if self.0.entries.is_empty() {
            tuple.serialize_element(&Option::<()>::None)?;
        } else {
            tuple.serialize_element(&WireEntries(&self.0.entries))?;
        }
        tuple.serialize_element(&WireChildren(&self.0.children))?;
        tuple.end()
    }
}

impl Serialize for WireEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|e| (&e.pos, &e.translations)))
    }
}

impl Serialize for WireChildren<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (edge, child) in self.0 {
            map.serialize_entry(edge, &WireNode(child))?;
        }
        map.end()
    }
}

/// Compact JSON encoding of `trie`. Fails for tries deeper than [`MAX_DEPTH`],
/// which [`decode`] would refuse.
pub fn encode(trie: &Trie) -> Result<Vec<u8>, serde_json::Error> {
    if depth(trie.root()) > MAX_DEPTH {
        return Err(serde::ser::Error::custom(format!(
            "trie nested deeper than {} levels",
            MAX_DEPTH
        )));
    }
    serde_json::to_vec(&WireNode(trie.root()))
}

fn depth(root: &Node) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(root, 0)];
    while let Some((node, level)) = stack.pop() {
        deepest = deepest.max(level);
        stack.extend(node.children.iter().map(|(_, child)| (child, level + 1)));
    }
    deepest
}
