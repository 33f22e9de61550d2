//! Area hash gate for incremental re-checks.
//!
//! Fingerprints a page's content and compares it against the hash stored
//! for the area. An unchanged fingerprint ends the area's cycle before
//! extraction and diffing. The stored hash itself is only advanced by
//! [`crate::storage::SqliteStore::apply_cycle`], in the same transaction
//! as the diff outcome, so a crash mid-cycle forces a re-check instead of
//! silently skipping a real change.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// Gate decision for one area this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Content fingerprint matches the stored hash; skip extraction
    Unchanged,
    /// First observation or content changed; run the full cycle
    Changed,
}

/// Compile the volatile-content patterns configured for an area.
pub fn compile_volatile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| AppError::config(format!("bad volatile pattern '{p}': {e}")))
        })
        .collect()
}

/// Compute the content fingerprint for a page.
///
/// Configured volatile substrings (rendered timestamps, session tokens)
/// are stripped and whitespace is collapsed before hashing, so cosmetic
/// churn does not defeat the unchanged-skip optimization.
pub fn fingerprint(content: &str, volatile: &[Regex]) -> String {
    let mut stripped = content.to_string();
    for pattern in volatile {
        stripped = pattern.replace_all(&stripped, "").into_owned();
    }

    let normalized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a fresh fingerprint against the stored hash.
pub fn evaluate(stored_hash: Option<&str>, fresh: &str) -> GateDecision {
    match stored_hash {
        Some(stored) if stored == fresh => GateDecision::Unchanged,
        _ => GateDecision::Changed,
    }
}
