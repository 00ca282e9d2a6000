//! Byte-wise completion trie (spec.md §3 "Trie node (completion)", §4.4
//! "Completion (trie)").
//!
//! Fixed 256-way fanout, append-only within a session (spec.md §3
//! Invariants: "The trie is append-only within a session"). No
//! single-owner container crate matches this shape closely enough to
//! reuse — the teacher's own completion surface (`src/tui/raw_input.rs`)
//! is a flat line buffer, not a prefix tree — so this is hand-rolled the
//! way the teacher hand-rolls small, self-contained data structures
//! elsewhere (e.g. `src/broker/ring_buffer.rs`).

/// One node of the completion trie. A node with no terminating
/// descendants is never inserted (spec.md §3).
#[derive(Default)]
struct Node {
    terminates: bool,
    children: Vec<Option<Box<Node>>>,
}

impl Node {
    fn new() -> Self {
        let mut children = Vec::with_capacity(256);
        children.resize_with(256, || None);
        Self {
            terminates: false,
            children,
        }
    }
}

/// A byte-indexed prefix tree used for tab completion of previously seen
/// tokens (spec.md GLOSSARY).
pub struct Trie {
    root: Node,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    #[must_use]
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Insert a distinct byte sequence (spec.md §3: "Inserted strings are
    /// distinct byte sequences").
    pub fn insert(&mut self, s: &str) {
        let mut node = &mut self.root;
        for &byte in s.as_bytes() {
            let slot = &mut node.children[byte as usize];
            if slot.is_none() {
                *slot = Some(Box::new(Node::new()));
            }
            node = slot.as_mut().unwrap();
        }
        node.terminates = true;
    }

    /// Complete `query` against the trie (spec.md §4.4 "Completion
    /// (trie)"):
    ///
    /// 1. Walk the trie along `query`'s bytes; any missing step is
    ///    no-match.
    /// 2. If the node reached terminates, the query itself is the match.
    /// 3. Otherwise, descend while the node has exactly one child,
    ///    appending each label; stop at a terminating/branching/dead node.
    /// 4. More than one child with no terminator yet is ambiguous:
    ///    no-match.
    #[must_use]
    pub fn complete(&self, query: &str) -> Option<String> {
        let mut node = &self.root;
        for &byte in query.as_bytes() {
            node = node.children[byte as usize].as_deref()?;
        }

        if node.terminates {
            return Some(query.to_string());
        }

        let mut accumulated = query.to_string();
        loop {
            let present: Vec<(u8, &Node)> = node
                .children
                .iter()
                .enumerate()
                .filter_map(|(byte, child)| child.as_deref().map(|n| (byte as u8, n)))
                .collect();

            match present.as_slice() {
                [] => return Some(accumulated),
                [(byte, child)] => {
                    accumulated.push(*byte as char);
                    node = child;
                    if node.terminates {
                        return Some(accumulated);
                    }
                }
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Trie {
        let mut trie = Trie::new();
        for word in [
            "hejsan",
            "hepple",
            "hejkompis",
            "abab",
            "abrakadabra",
            "examine",
            "exa",
        ] {
            trie.insert(word);
        }
        trie
    }

    #[test]
    fn s1_trie_scenarios() {
        let trie = seeded();
        assert_eq!(trie.complete("abraka"), Some("abrakadabra".to_string()));
        assert_eq!(trie.complete("ab"), None);
        assert_eq!(trie.complete("abab"), Some("abab".to_string()));
        assert_eq!(trie.complete("ex"), Some("exa".to_string()));
        assert_eq!(trie.complete("exam"), Some("examine".to_string()));
    }

    #[test]
    fn unknown_prefix_is_no_match() {
        let trie = seeded();
        assert_eq!(trie.complete("zzz"), None);
    }

    #[test]
    fn exact_terminating_match_returns_itself() {
        let trie = seeded();
        assert_eq!(trie.complete("hejsan"), Some("hejsan".to_string()));
    }

    #[test]
    fn property_complete_insert_on_unique_prefix() {
        // spec.md §8 universal invariant 3: Complete(insert(T, s)) on any
        // prefix p of s returns s when s is the only terminating
        // descendant reachable via p.
        let mut trie = Trie::new();
        trie.insert("unique_token");
        for prefix_len in 1..="unique_token".len() {
            let prefix = &"unique_token"[..prefix_len];
            assert_eq!(trie.complete(prefix), Some("unique_token".to_string()));
        }
    }
}
