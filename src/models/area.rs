//! Monitored area (one listing page) state.

use chrono::{DateTime, Utc};

/// A monitored listing page, one row per target URL.
///
/// `last_content_hash` is only advanced together with a successfully
/// committed diff, so an interrupted cycle forces a full re-check on the
/// next run. `last_checked_at` advances on every completed gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    /// Row id in the snapshot store
    pub id: i64,

    /// URL of the listing page
    pub source_url: String,

    /// Fingerprint of the page content at the last committed cycle
    pub last_content_hash: Option<String>,

    /// When the area was last checked, regardless of outcome
    pub last_checked_at: Option<DateTime<Utc>>,
}
