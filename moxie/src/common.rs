//! The shared data model (spec.md §3): interrupts and the regex contract
//! they compile to.
//!
//! Grounded on `examples/original_source/common/common.go`, which defines
//! the same `(?ms)(BEFORE)(CONTENT)(AFTER)` wrapping this module
//! reproduces; the Rust `regex` crate's named capture groups replace the
//! Go `regexp` package's `SubexpNames` walk.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MoxieError, Result};

/// A named, regex-keyed interrupt installed on a Consumer or Controller
/// (spec.md §3). `ConsumptionInterrupt` and `TransmissionInterrupt` share
/// this shape; they are kept as distinct types because they are sent to
/// different RPC methods (`ConsumerInterruptConsumption` vs
/// `ControllerInterruptTransmission`) and have slightly different match
/// semantics (excision vs whole-submatch reporting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionInterrupt {
    pub name: String,
    /// Address of the script-handler endpoint to call back on a match.
    pub callback_addr: String,
    pub pattern: String,
    /// `0` means unlimited; otherwise the interrupt unregisters itself
    /// after this many successful fires (spec.md §3).
    pub remaining_fires: u32,
}

/// Same shape as [`ConsumptionInterrupt`], installed on a Controller and
/// evaluated against a finished line before it is sent to the Proxy
/// (spec.md §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionInterrupt {
    pub name: String,
    pub callback_addr: String,
    pub pattern: String,
    pub remaining_fires: u32,
}

/// Payload delivered to `InterruptorInterruptedConsumption` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptedConsumption {
    pub name: String,
    pub content: String,
}

/// Payload delivered to `InterruptorInterruptedTransmission` (spec.md
/// §6). `r#match` is the whole submatch vector from the transmission
/// regex (spec.md §4.4 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptedTransmission {
    pub name: String,
    #[serde(rename = "match")]
    pub r#match: Vec<String>,
}

/// A lazily-compiled interrupt pattern, wrapped in the contract form
/// `(?ms)(BEFORE:.*?)(CONTENT:<pattern>)(AFTER:.*)` (spec.md §3): DOTALL,
/// multiline, shortest-leading prefix, with the surrounding text
/// explicitly anchored by named capture groups.
///
/// Every registered interrupt must have a compiled regex before it may
/// fire (spec.md §3, Invariants) — this type exists so that invariant is
/// enforced by construction: there is no way to obtain a `Compiled`
/// without going through [`Compiled::new`], which compiles eagerly.
pub struct Compiled {
    regex: Regex,
}

/// Result of a successful match: the text before the match, the matched
/// content itself, and the text after it (spec.md §3, §4.3 excision).
pub struct Match {
    pub before: String,
    pub content: String,
    pub after: String,
}

impl Compiled {
    /// Compile `pattern` into the contract regex. Returns
    /// [`MoxieError::CompileFailure`] on a malformed pattern (spec.md
    /// §7, `CompileFailure`).
    pub fn new(pattern: &str) -> Result<Self> {
        let wrapped = format!(r"(?ms)(?P<BEFORE>.*?)(?P<CONTENT>{pattern})(?P<AFTER>.*)");
        let regex = Regex::new(&wrapped)?;
        Ok(Self { regex })
    }

    /// Find the first match in `haystack`, decomposed into before/content/after.
    #[must_use]
    pub fn find(&self, haystack: &str) -> Option<Match> {
        let captures = self.regex.captures(haystack)?;
        Some(Match {
            before: captures.name("BEFORE")?.as_str().to_string(),
            content: captures.name("CONTENT")?.as_str().to_string(),
            after: captures.name("AFTER")?.as_str().to_string(),
        })
    }

    /// The whole submatch vector for a transmission-interrupt match
    /// (spec.md §4.4 step 2: "each match's whole submatch vector").
    /// Index 0 is the entire match; indices 1.. are the BEFORE, CONTENT
    /// and AFTER groups plus any groups the caller's own pattern added.
    #[must_use]
    pub fn find_submatches(&self, haystack: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(haystack)?;
        Some(
            captures
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Verify a pattern compiles, surfacing [`MoxieError::CompileFailure`]
/// synchronously to the caller (spec.md §7: "`CompileFailure` during
/// install is returned to the caller synchronously").
pub fn validate_pattern(pattern: &str) -> Result<()> {
    Compiled::new(pattern).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excises_before_and_after() {
        let compiled = Compiled::new("XYZ").unwrap();
        let found = compiled.find("aXYZb").unwrap();
        assert_eq!(found.before, "a");
        assert_eq!(found.content, "XYZ");
        assert_eq!(found.after, "b");
    }

    #[test]
    fn shortest_leading_prefix() {
        // BEFORE is non-greedy, so the first occurrence of the pattern wins.
        let compiled = Compiled::new("foo").unwrap();
        let found = compiled.find("xxfooyyfoozz").unwrap();
        assert_eq!(found.before, "xx");
        assert_eq!(found.content, "foo");
        assert_eq!(found.after, "yyfoozz");
    }

    #[test]
    fn multiline_dotall_spans_newlines() {
        let compiled = Compiled::new("B.C").unwrap();
        let found = compiled.find("A\nB\nC\nD").unwrap();
        assert_eq!(found.before, "A\n");
        assert_eq!(found.content, "B\nC");
        assert_eq!(found.after, "\nD");
    }

    #[test]
    fn invalid_pattern_is_compile_failure() {
        let err = Compiled::new("(unclosed").unwrap_err();
        assert!(matches!(err, MoxieError::CompileFailure(_)));
    }

    #[test]
    fn whole_submatch_vector_includes_full_match() {
        let compiled = Compiled::new("quit").unwrap();
        let submatches = compiled.find_submatches("quit").unwrap();
        assert_eq!(submatches[0], "quit");
    }
}
