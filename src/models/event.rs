//! Transition events and notification state.

use chrono::{DateTime, Utc};

/// Kind of a recorded item transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Removed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(EventKind::Added),
            "removed" => Some(EventKind::Removed),
            _ => None,
        }
    }
}

/// Aggregate notification state of an event across all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    Pending,
    Delivered,
    Failed,
}

impl NotifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyStatus::Pending => "pending",
            NotifyStatus::Delivered => "delivered",
            NotifyStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotifyStatus::Pending),
            "delivered" => Some(NotifyStatus::Delivered),
            "failed" => Some(NotifyStatus::Failed),
            _ => None,
        }
    }
}

/// An append-only record of one detected transition.
///
/// Only the notify fields are ever updated after insertion:
/// `notify_attempts` is monotonically non-decreasing and `notified_at`
/// is set exactly once, on the first successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub item_id: String,
    pub area_id: i64,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub notify_attempts: u32,
    pub notify_status: NotifyStatus,
}

/// Per-channel delivery state for an event.
///
/// Channels are independent: one channel's outage never blocks another's
/// delivery, so attempts and status live per (event, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event_id: i64,
    pub channel: String,
    pub attempts: u32,
    pub status: NotifyStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A delivery joined with the context needed to format its message.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub event_id: i64,
    pub channel: String,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub kind: EventKind,
    pub item_name: String,
    pub item_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        assert_eq!(EventKind::parse("added"), Some(EventKind::Added));
        assert_eq!(EventKind::parse("removed"), Some(EventKind::Removed));
        assert_eq!(EventKind::parse("relisted"), None);
    }

    #[test]
    fn notify_status_round_trip() {
        for status in [
            NotifyStatus::Pending,
            NotifyStatus::Delivered,
            NotifyStatus::Failed,
        ] {
            assert_eq!(NotifyStatus::parse(status.as_str()), Some(status));
        }
    }
}
