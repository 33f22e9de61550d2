//! Listed items and stable-key derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An item as extracted from a listing page, before keying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub name: String,
    pub url: String,
}

/// An extracted item paired with its stable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedItem {
    pub key: String,
    pub name: String,
    pub url: String,
}

/// Lifecycle status of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Active,
    Removed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ItemStatus::Active),
            "removed" => Some(ItemStatus::Removed),
            _ => None,
        }
    }
}

/// Persisted representation of a tracked item.
///
/// Rows are never deleted; `status` flips between `active` and `removed`
/// as the item appears and disappears, and `first_seen_at` survives
/// re-listings so re-occurrence statistics stay meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Stable key (see [`stable_key`])
    pub id: String,
    pub area_id: i64,
    pub name: String,
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: ItemStatus,
}

/// Tie-break rule for deriving an item's stable key.
///
/// A wrong key turns one re-listing under a new path into a spurious
/// remove+add pair, so the rule is explicit configuration rather than an
/// assumption baked into the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    /// Key by URL when present, fall back to the normalized name.
    #[default]
    UrlFirst,
    /// Always key by the normalized name, ignoring the URL.
    NameOnly,
}

/// Derive the stable key for a raw item within an area.
///
/// URL keys are trimmed verbatim; name keys are whitespace-normalized,
/// lowercased and scoped to the area so identical names on different
/// pages stay distinct. Returns `None` when no usable key exists.
pub fn stable_key(policy: KeyPolicy, area_id: i64, raw: &RawItem) -> Option<String> {
    let url = raw.url.trim();
    let name = normalize_name(&raw.name);

    match policy {
        KeyPolicy::UrlFirst if !url.is_empty() => Some(url.to_string()),
        _ if !name.is_empty() => Some(format!("{}:{}", area_id, name)),
        _ => None,
    }
}

/// Collapse whitespace and lowercase for name-based keying.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, url: &str) -> RawItem {
        RawItem {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn url_first_prefers_url() {
        let key = stable_key(KeyPolicy::UrlFirst, 1, &raw("Parkside", "https://x/p/1"));
        assert_eq!(key.as_deref(), Some("https://x/p/1"));
    }

    #[test]
    fn url_first_falls_back_to_name() {
        let key = stable_key(KeyPolicy::UrlFirst, 7, &raw("  Park   Side ", ""));
        assert_eq!(key.as_deref(), Some("7:park side"));
    }

    #[test]
    fn name_only_ignores_url() {
        let key = stable_key(KeyPolicy::NameOnly, 2, &raw("Parkside", "https://x/p/1"));
        assert_eq!(key.as_deref(), Some("2:parkside"));
    }

    #[test]
    fn no_usable_key() {
        assert_eq!(stable_key(KeyPolicy::UrlFirst, 1, &raw("   ", "")), None);
        assert_eq!(stable_key(KeyPolicy::NameOnly, 1, &raw("", "https://x")), None);
    }

    #[test]
    fn name_keys_are_area_scoped() {
        let a = stable_key(KeyPolicy::NameOnly, 1, &raw("Unit A", "")).unwrap();
        let b = stable_key(KeyPolicy::NameOnly, 2, &raw("Unit A", "")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn status_round_trip() {
        assert_eq!(ItemStatus::parse("active"), Some(ItemStatus::Active));
        assert_eq!(ItemStatus::parse("removed"), Some(ItemStatus::Removed));
        assert_eq!(ItemStatus::parse("gone"), None);
        assert_eq!(ItemStatus::Active.as_str(), "active");
    }
}
