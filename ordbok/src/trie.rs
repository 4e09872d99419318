//! Character-indexed prefix trie holding dictionary entries

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One translation group for a headword
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub pos: String,
    pub translations: Vec<String>,
}

impl Entry {
    pub fn new(pos: impl Into<String>, translations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            pos: pos.into(),
            translations: translations.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordering applied to sibling edges.
///
/// Fixed when the trie is built or decoded; descent and enumeration both use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collation {
    /// Unicode scalar value order
    #[default]
    Codepoint,
    /// Latin letters with accented variants next to their base letter
    /// (Sámi `á`, `č`, `đ`, `ŋ`, `š`, `ŧ`, `ž` follow `a`, `c`, `d`, `n`, `s`, `t`, `z`),
    /// and `æ`/`ä`, `ø`/`ö`, `å` after `z`.
    Nordic,
}

impl Collation {
    pub fn compare(self, a: char, b: char) -> Ordering {
        match self {
            Collation::Codepoint => a.cmp(&b),
            Collation::Nordic => nordic_key(a).cmp(&nordic_key(b)),
        }
    }

    /// Lexicographic comparison of whole strings, one character at a time
    pub fn compare_str(self, a: &str, b: &str) -> Ordering {
        let mut left = a.chars();
        let mut right = b.chars();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => match self.compare(x, y) {
                    Ordering::Equal => continue,
                    other => return other,
                },
            }
        }
    }
}

impl FromStr for Collation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "codepoint" => Ok(Collation::Codepoint),
            "nordic" => Ok(Collation::Nordic),
            other => Err(format!("unknown collation {:?}", other)),
        }
    }
}

/// (base letter, tier after the base, codepoint). The codepoint keeps the order total.
fn nordic_key(c: char) -> (u32, u8, u32) {
    let lower = c.to_lowercase().next().unwrap_or(c);
    let (base, tier) = match lower {
        'æ' | 'ä' => ('z', 1),
        'ø' | 'ö' => ('z', 2),
        'å' => ('z', 3),
        'á' | 'à' | 'â' | 'ã' => ('a', 0),
        'č' | 'ç' => ('c', 0),
        'đ' | 'ð' => ('d', 0),
        'é' | 'è' | 'ê' | 'ë' => ('e', 0),
        'í' | 'ì' | 'î' | 'ï' => ('i', 0),
        'ŋ' | 'ñ' => ('n', 0),
        'ó' | 'ò' | 'ô' | 'õ' => ('o', 0),
        'š' => ('s', 0),
        'ŧ' => ('t', 0),
        'ú' | 'ù' | 'û' => ('u', 0),
        'ü' | 'ý' => ('y', 0),
        'ž' => ('z', 0),
        other => (other, 0),
    };
    (base as u32, tier, c as u32)
}

/// A position in the trie: entries for the exact prefix spelled so far, plus
/// outgoing edges sorted by the trie's collation.
///
/// Drop, equality and counting walk the subtree with an explicit stack, so a
/// trie as deep as its longest headword never recurses.
#[derive(Default)]
pub struct Node {
    pub(crate) entries: Vec<Entry>,
    pub(crate) children: Vec<(char, Node)>,
}

impl Node {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn children(&self) -> impl Iterator<Item = (char, &Node)> {
        self.children.iter().map(|(c, node)| (*c, node))
    }

    pub fn is_headword(&self) -> bool {
        !self.entries.is_empty()
    }

    fn child(&self, c: char, collation: Collation) -> Option<&Node> {
        self.children
            .binary_search_by(|(edge, _)| collation.compare(*edge, c))
            .ok()
            .map(|idx| &self.children[idx].1)
    }

    fn child_or_insert(&mut self, c: char, collation: Collation) -> &mut Node {
        let idx = match self
            .children
            .binary_search_by(|(edge, _)| collation.compare(*edge, c))
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.children.insert(idx, (c, Node::default()));
                idx
            }
        };
        &mut self.children[idx].1
    }

    fn count_headwords(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += usize::from(node.is_headword());
            stack.extend(node.children.iter().map(|(_, child)| child));
        }
        count
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some((_, mut node)) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.entries != b.entries || a.children.len() != b.children.len() {
                return false;
            }
            for ((ca, na), (cb, nb)) in a.children.iter().zip(&b.children) {
                if ca != cb {
                    return false;
                }
                stack.push((na, nb));
            }
        }
        true
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("entries", &self.entries)
            .field("edges", &self.children.iter().map(|(c, _)| *c).collect::<String>())
            .finish()
    }
}

/// Immutable-after-construction dictionary trie
#[derive(Debug, Default, PartialEq)]
pub struct Trie {
    pub(crate) root: Node,
    pub(crate) collation: Collation,
    len: usize,
}

impl Trie {
    pub fn new(collation: Collation) -> Self {
        Self {
            root: Node::default(),
            collation,
            len: 0,
        }
    }

    /// Wrap an already-ordered root node (used by the decoders)
    pub(crate) fn from_root(root: Node, collation: Collation) -> Self {
        let len = root.count_headwords();
        Self { root, collation, len }
    }

    /// Attach `entry` to `word`, creating the path as needed
    pub fn insert(&mut self, word: &str, entry: Entry) {
        let collation = self.collation;
        let mut node = &mut self.root;
        for c in word.chars() {
            node = node.child_or_insert(c, collation);
        }
        if node.entries.is_empty() {
            self.len += 1;
        }
        node.entries.push(entry);
    }

    /// Node spelling exactly `prefix`, if any
    pub fn descend(&self, prefix: &str) -> Option<&Node> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.child(c, self.collation)?;
        }
        Some(node)
    }

    pub fn find_exact(&self, word: &str) -> Option<&[Entry]> {
        self.descend(word)
            .filter(|node| node.is_headword())
            .map(|node| node.entries())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Number of headwords
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> FromIterator<(&'a str, Entry)> for Trie {
    fn from_iter<I: IntoIterator<Item = (&'a str, Entry)>>(iter: I) -> Self {
        let mut trie = Trie::new(Collation::default());
        for (word, entry) in iter {
            trie.insert(word, entry);
        }
        trie
    }
}
