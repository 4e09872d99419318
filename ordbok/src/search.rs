//! Incremental prefix search over a decoded trie

use crate::error::SearchError;
use crate::trie::{Collation, Node, Trie};
use serde::Serialize;
use std::cmp::Ordering;

/// One `(word, pos, translations)` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit<'t> {
    pub word: String,
    pub pos: &'t str,
    pub translations: &'t [String],
}

struct Frame<'t> {
    node: &'t Node,
    next_entry: usize,
    next_child: usize,
    /// Bytes the edge into this node added to the current word
    edge_len: usize,
}

/// Lazy pre-order walk of the subtree under a prefix.
///
/// A node's own entries come before its children's, and children are visited
/// in collation order. Nothing past the last consumed hit is computed.
pub struct PrefixSearch<'t> {
    collation: Collation,
    word: String,
    stack: Vec<Frame<'t>>,
}

impl<'t> PrefixSearch<'t> {
    pub(crate) fn new(trie: &'t Trie, prefix: &str) -> Self {
        let stack = match trie.descend(prefix) {
            Some(node) => vec![Frame {
                node,
                next_entry: 0,
                next_child: 0,
                edge_len: 0,
            }],
            None => Vec::new(),
        };
        Self {
            collation: trie.collation(),
            word: prefix.to_string(),
            stack,
        }
    }

    fn corrupt(&mut self, reason: String) -> SearchError {
        let path = self.word.clone();
        self.stack.clear();
        SearchError::CorruptTrie { path, reason }
    }
}

impl<'t> Iterator for PrefixSearch<'t> {
    type Item = Result<SearchHit<'t>, SearchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let node: &'t Node = frame.node;

            if let Some(entry) = node.entries.get(frame.next_entry) {
                frame.next_entry += 1;
                return Some(Ok(SearchHit {
                    word: self.word.clone(),
                    pos: &entry.pos,
                    translations: &entry.translations,
                }));
            }

            let idx = frame.next_child;
            if let Some((edge, child)) = node.children.get(idx) {
                frame.next_child += 1;
                if idx > 0 {
                    let previous = node.children[idx - 1].0;
                    if self.collation.compare(previous, *edge) != Ordering::Less {
                        let reason = format!(
                            "sibling edges {:?} and {:?} are duplicated or out of order",
                            previous, edge
                        );
                        return Some(Err(self.corrupt(reason)));
                    }
                }
                self.word.push(*edge);
                self.stack.push(Frame {
                    node: child,
                    next_entry: 0,
                    next_child: 0,
                    edge_len: edge.len_utf8(),
                });
                continue;
            }

            let edge_len = frame.edge_len;
            self.stack.pop();
            let keep = self.word.len() - edge_len;
            self.word.truncate(keep);
        }
    }
}

impl Trie {
    /// Every entry at or below `prefix`, lazily, in alphabetical order.
    ///
    /// An unknown prefix gives an empty sequence.
    pub fn prefix_search(&self, prefix: &str) -> PrefixSearch<'_> {
        PrefixSearch::new(self, prefix)
    }

    /// First `limit` hits of [`Trie::prefix_search`]
    pub fn lookup(&self, prefix: &str, limit: usize) -> Result<Vec<SearchHit<'_>>, SearchError> {
        self.prefix_search(prefix).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::Entry;

    fn sample() -> Trie {
        let mut trie = Trie::new(Collation::Codepoint);
        trie.insert("cat", Entry::new("N", ["katt"]));
        trie.insert("car", Entry::new("N", ["bil"]));
        trie.insert("carpet", Entry::new("N", ["golvteppe"]));
        trie
    }

    fn triples(trie: &Trie, prefix: &str) -> Vec<(String, String, Vec<String>)> {
        trie.prefix_search(prefix)
            .map(|hit| {
                let hit = hit.unwrap();
                (hit.word, hit.pos.to_string(), hit.translations.to_vec())
            })
            .collect()
    }

    #[test]
    fn test_prefix_search_ca() {
        let trie = sample();
        assert_eq!(
            triples(&trie, "ca"),
            vec![
                ("car".to_string(), "N".to_string(), vec!["bil".to_string()]),
                ("carpet".to_string(), "N".to_string(), vec!["golvteppe".to_string()]),
                ("cat".to_string(), "N".to_string(), vec!["katt".to_string()]),
            ]
        );
    }

    #[test]
    fn test_unknown_prefix_is_empty() {
        let trie = sample();
        assert!(triples(&trie, "dog").is_empty());
        assert!(triples(&trie, "cart").is_empty());
    }

    #[test]
    fn test_exact_word_comes_before_extensions() {
        let trie = sample();
        let words: Vec<String> = triples(&trie, "car").into_iter().map(|t| t.0).collect();
        assert_eq!(words, vec!["car", "carpet"]);
    }

    #[test]
    fn test_empty_prefix_is_sorted_and_complete() {
        let mut trie = Trie::new(Collation::Nordic);
        let words = ["år", "ære", "zoo", "bil", "bilde", "øl", "a", "ánde"];
        for w in words {
            trie.insert(w, Entry::new("N", [w]));
        }
        let found: Vec<String> = triples(&trie, "").into_iter().map(|t| t.0).collect();
        assert_eq!(found.len(), words.len());
        for pair in found.windows(2) {
            assert_ne!(
                Collation::Nordic.compare_str(&pair[0], &pair[1]),
                Ordering::Greater,
                "{} sorted after {}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(found.last().map(String::as_str), Some("år"));
    }

    #[test]
    fn test_every_prefix_of_every_headword_finds_it() {
        let trie = sample();
        for word in ["cat", "car", "carpet"] {
            let chars: Vec<char> = word.chars().collect();
            for end in 0..=chars.len() {
                let prefix: String = chars[..end].iter().collect();
                let hits = triples(&trie, &prefix);
                assert!(hits.iter().any(|t| t.0 == word), "{} missing under {:?}", word, prefix);
            }
        }
    }

    #[test]
    fn test_multiple_entries_per_word_and_multibyte_edges() {
        let mut trie = Trie::new(Collation::Codepoint);
        trie.insert("gåte", Entry::new("N", ["arvvádus"]));
        trie.insert("gå", Entry::new("V", ["vázzit"]));
        trie.insert("gå", Entry::new("V", ["mannat"]));
        let hits = triples(&trie, "g");
        let words: Vec<&str> = hits.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(words, vec!["gå", "gå", "gåte"]);
        assert_eq!(hits[1].2, vec!["mannat".to_string()]);
    }

    #[test]
    fn test_search_is_lazy() {
        let mut trie = Trie::new(Collation::Codepoint);
        for i in 0..1000 {
            trie.insert(&format!("w{:04}", i), Entry::new("N", ["x"]));
        }
        let mut search = trie.prefix_search("w");
        let first = search.next().unwrap().unwrap();
        assert_eq!(first.word, "w0000");
        // only the path to the first hit is on the stack
        assert_eq!(search.stack.len(), 5);
        assert_eq!(trie.lookup("w", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_out_of_order_siblings_fail_fast() {
        let leaf = |t: &str| Node {
            entries: vec![Entry::new("N", [t])],
            children: Vec::new(),
        };
        let root = Node {
            entries: Vec::new(),
            children: vec![('b', leaf("b")), ('a', leaf("a"))],
        };
        let trie = Trie::from_root(root, Collation::Codepoint);
        let results: Vec<_> = trie.prefix_search("").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().word, "b");
        assert!(matches!(results[1], Err(SearchError::CorruptTrie { .. })));
    }
}
