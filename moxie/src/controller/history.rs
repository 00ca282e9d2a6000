//! Persistent history store (spec.md §3 "History entry", §4.4 "History
//! API (sorted map with cursor)").
//!
//! Backed by `sled`, an embedded ordered key/value store — exactly the
//! "abstract sorted map with cursor" spec.md §1 names as an external
//! collaborator. Keys are 8-byte big-endian nanosecond timestamps so
//! lexicographic byte order matches insertion order (spec.md §3).

use std::path::Path;

use anyhow::{Context, Result};

const TREE_NAME: &str = "history";

fn key_bytes(nanos: u64) -> [u8; 8] {
    nanos.to_be_bytes()
}

fn key_from_bytes(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// One committed line, keyed by the nanosecond timestamp it was
/// committed at (spec.md §3 "History entry").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: u64,
    pub line: String,
}

/// The embedded history database at `<dir>/controller.db` (spec.md §6).
#[derive(Clone)]
pub struct HistoryStore {
    tree: sled::Tree,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("failed to open history store at {}", path.display()))?;
        let tree = db
            .open_tree(TREE_NAME)
            .context("failed to open history tree")?;
        Ok(Self { tree })
    }

    /// Append `(now_nanos, line)`; never overwrites an existing key
    /// (spec.md §3 Invariants: "no key is ever overwritten").
    pub fn put(&self, nanos: u64, line: &str) -> Result<()> {
        self.tree.insert(key_bytes(nanos), line.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    /// The most recently committed entry.
    pub fn last(&self) -> Result<Option<Entry>> {
        Ok(self
            .tree
            .last()?
            .map(|(k, v)| to_entry(&k, &v)))
    }

    /// Whether an entry exists at exactly `key`.
    pub fn contains(&self, key: u64) -> Result<bool> {
        Ok(self.tree.contains_key(key_bytes(key))?)
    }

    /// The entry with the greatest key strictly less than `key`.
    pub fn prev_of(&self, key: u64) -> Result<Option<Entry>> {
        Ok(self
            .tree
            .range(..key_bytes(key))
            .next_back()
            .transpose()?
            .map(|(k, v)| to_entry(&k, &v)))
    }

    /// The entry with the least key strictly greater than `key`.
    pub fn next_of(&self, key: u64) -> Result<Option<Entry>> {
        use std::ops::Bound::{Excluded, Unbounded};
        Ok(self
            .tree
            .range((Excluded(key_bytes(key)), Unbounded))
            .next()
            .transpose()?
            .map(|(k, v)| to_entry(&k, &v)))
    }

    /// All entries, newest first. Used by `searchPrevHistory`, which
    /// needs to scan backwards with at-most-once wraparound; history is
    /// a single operator session's worth of lines, small enough to
    /// collect in full rather than paginate.
    pub fn all_desc(&self) -> Result<Vec<Entry>> {
        let mut entries: Vec<Entry> = self
            .tree
            .iter()
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(k, v)| to_entry(&k, &v))
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

fn to_entry(key: &[u8], value: &[u8]) -> Entry {
    Entry {
        key: key_from_bytes(key),
        line: String::from_utf8_lossy(value).into_owned(),
    }
}

/// Outcome of moving to the previous (older) history entry (spec.md
/// §4.4 `prevHistory`). Kept as a three-way enum because the spec
/// distinguishes "moved", "the remembered entry vanished", and "already
/// at the oldest entry" (spec.md §9 Open Question ii notes concurrent
/// writers are otherwise undefined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrevOutcome {
    Found(Entry),
    Vanished,
    AtOldest(Entry),
}

/// `prevHistory(last)` (spec.md §4.4): if `last` is `None`, return
/// `last()`; else `seek(last)`; if the seek misses, [`PrevOutcome::Vanished`];
/// otherwise `prev()`, or [`PrevOutcome::AtOldest`] if already at the
/// oldest entry ("stay on `last` without marking found").
pub fn prev_history(store: &HistoryStore, last: Option<&Entry>) -> Result<PrevOutcome> {
    match last {
        None => match store.last()? {
            Some(entry) => Ok(PrevOutcome::Found(entry)),
            None => Ok(PrevOutcome::Vanished),
        },
        Some(last) => {
            if !store.contains(last.key)? {
                return Ok(PrevOutcome::Vanished);
            }
            match store.prev_of(last.key)? {
                Some(entry) => Ok(PrevOutcome::Found(entry)),
                None => Ok(PrevOutcome::AtOldest(last.clone())),
            }
        }
    }
}

/// `nextHistory(last)` (spec.md §4.4): `None` input returns `None`; else
/// `seek(last)` then `next()`.
pub fn next_history(store: &HistoryStore, last: Option<&Entry>) -> Result<Option<Entry>> {
    match last {
        None => Ok(None),
        Some(last) => store.next_of(last.key),
    }
}

/// `searchPrevHistory(last, needle)` (spec.md §4.4): starts at `last()`
/// (or the predecessor of `last` if non-null), iterates backwards,
/// wrapping at most once to `last()`, returning the first entry whose
/// value contains `needle` as a substring.
pub fn search_prev_history(
    store: &HistoryStore,
    last: Option<&Entry>,
    needle: &str,
) -> Result<Option<Entry>> {
    let all = store.all_desc()?; // newest first
    if all.is_empty() {
        return Ok(None);
    }

    let start = match last {
        None => 0,
        Some(last) => all
            .iter()
            .position(|e| e.key < last.key)
            .unwrap_or(0), // no strict predecessor: wrap to last()
    };

    for offset in 0..all.len() {
        let idx = (start + offset) % all.len();
        if all[idx].line.contains(needle) {
            return Ok(Some(all[idx].clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("controller.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn s4_history_ordering() {
        let (_dir, store) = store();
        store.put(1, "one").unwrap();
        store.put(2, "two").unwrap();
        store.put(3, "three").unwrap();

        let e3 = match prev_history(&store, None).unwrap() {
            PrevOutcome::Found(e) => e,
            other => panic!("expected Found, got {other:?}"),
        };
        assert_eq!(e3.line, "three");

        let e2 = match prev_history(&store, Some(&e3)).unwrap() {
            PrevOutcome::Found(e) => e,
            other => panic!("expected Found, got {other:?}"),
        };
        assert_eq!(e2.line, "two");

        let e1 = match prev_history(&store, Some(&e2)).unwrap() {
            PrevOutcome::Found(e) => e,
            other => panic!("expected Found, got {other:?}"),
        };
        assert_eq!(e1.line, "one");

        // A fourth up-arrow stays on "one".
        match prev_history(&store, Some(&e1)).unwrap() {
            PrevOutcome::AtOldest(e) => assert_eq!(e.line, "one"),
            other => panic!("expected AtOldest, got {other:?}"),
        }

        // Down from "one" yields "two".
        let back_to_two = next_history(&store, Some(&e1)).unwrap().unwrap();
        assert_eq!(back_to_two.line, "two");
    }

    #[test]
    fn keys_strictly_increase() {
        let (_dir, store) = store();
        store.put(100, "a").unwrap();
        store.put(200, "b").unwrap();
        let last = store.last().unwrap().unwrap();
        assert!(last.key > 100);
    }

    #[test]
    fn reverse_i_search_finds_most_recent_match() {
        let (_dir, store) = store();
        store.put(1, "look east").unwrap();
        store.put(2, "go north").unwrap();
        store.put(3, "look west").unwrap();

        let found = search_prev_history(&store, None, "look").unwrap().unwrap();
        assert_eq!(found.line, "look west");
    }

    #[test]
    fn reverse_i_search_no_match_returns_none() {
        let (_dir, store) = store();
        store.put(1, "hello").unwrap();
        assert_eq!(search_prev_history(&store, None, "zzz").unwrap(), None);
    }

    #[test]
    fn vanished_entry_is_reported() {
        let (_dir, store) = store();
        store.put(1, "one").unwrap();
        let phantom = Entry {
            key: 999,
            line: "ghost".into(),
        };
        assert_eq!(
            prev_history(&store, Some(&phantom)).unwrap(),
            PrevOutcome::Vanished
        );
    }
}
