//! Vacancy statistics over a window of recorded events.
//!
//! Dwell time is measured over closed lifecycles only: an `added` event
//! matched with the next `removed` event for the same item. Items still
//! active at the end of the window are right-censored and excluded, so the
//! average is an underestimate when long-lived items dominate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{Event, EventKind};

/// Aggregates computed from one statistics window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Completed observation cycles in the window
    pub cycles: u32,
    pub added_events: usize,
    pub removed_events: usize,
    /// Added events per completed cycle (0.0 when no cycles ran)
    pub occurrence_rate: f64,
    /// Added-to-removed pairs that both fell inside the window
    pub closed_lifecycles: usize,
    /// Mean seconds an item stayed listed, over closed lifecycles
    pub avg_dwell_secs: Option<f64>,
    /// Items listed more than once in the window
    pub reoccurring_items: usize,
    /// Mean seconds between successive listings of the same item
    pub avg_reoccurrence_secs: Option<f64>,
}

/// Fold a window of events into [`Statistics`].
///
/// `cycles` is the completed-run count for the same window; it feeds the
/// occurrence rate, nothing else. Event order within the slice does not
/// matter.
pub fn compute_statistics(events: &[Event], cycles: u32) -> Statistics {
    let mut by_item: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events {
        by_item.entry(event.item_id.as_str()).or_default().push(event);
    }
    for item_events in by_item.values_mut() {
        item_events.sort_by_key(|e| e.occurred_at);
    }

    let added_events = events
        .iter()
        .filter(|e| e.kind == EventKind::Added)
        .count();
    let removed_events = events.len() - added_events;

    let mut dwell_total = 0.0_f64;
    let mut closed_lifecycles = 0usize;
    let mut gap_total = 0.0_f64;
    let mut gap_count = 0usize;
    let mut reoccurring_items = 0usize;

    for item_events in by_item.values() {
        let mut listed_at: Option<DateTime<Utc>> = None;
        let mut added_times: Vec<DateTime<Utc>> = Vec::new();

        for event in item_events {
            match event.kind {
                EventKind::Added => {
                    listed_at = Some(event.occurred_at);
                    added_times.push(event.occurred_at);
                }
                EventKind::Removed => {
                    if let Some(start) = listed_at.take() {
                        dwell_total += seconds_between(start, event.occurred_at);
                        closed_lifecycles += 1;
                    }
                }
            }
        }

        if added_times.len() > 1 {
            reoccurring_items += 1;
            for pair in added_times.windows(2) {
                gap_total += seconds_between(pair[0], pair[1]);
                gap_count += 1;
            }
        }
    }

    Statistics {
        cycles,
        added_events,
        removed_events,
        occurrence_rate: if cycles > 0 {
            added_events as f64 / f64::from(cycles)
        } else {
            0.0
        },
        closed_lifecycles,
        avg_dwell_secs: if closed_lifecycles > 0 {
            Some(dwell_total / closed_lifecycles as f64)
        } else {
            None
        },
        reoccurring_items,
        avg_reoccurrence_secs: if gap_count > 0 {
            Some(gap_total / gap_count as f64)
        } else {
            None
        },
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotifyStatus;
    use chrono::TimeZone;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    fn event(item_id: i64, kind: EventKind, occurred_at: DateTime<Utc>) -> Event {
        Event {
            id: 0,
            item_id: item_id.to_string(),
            area_id: 1,
            kind,
            occurred_at,
            notified_at: None,
            notify_attempts: 0,
            notify_status: NotifyStatus::Pending,
        }
    }

    #[test]
    fn empty_window_yields_zeroes() {
        let stats = compute_statistics(&[], 0);
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn occurrence_rate_is_added_per_cycle() {
        let events = vec![
            event(1, EventKind::Added, at(0)),
            event(2, EventKind::Added, at(1)),
            event(3, EventKind::Added, at(2)),
        ];
        let stats = compute_statistics(&events, 6);
        assert_eq!(stats.added_events, 3);
        assert_eq!(stats.removed_events, 0);
        assert!((stats.occurrence_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn occurrence_rate_is_zero_without_cycles() {
        let events = vec![event(1, EventKind::Added, at(0))];
        let stats = compute_statistics(&events, 0);
        assert_eq!(stats.occurrence_rate, 0.0);
    }

    #[test]
    fn dwell_averages_closed_lifecycles_only() {
        let events = vec![
            // Item 1: listed 2h.
            event(1, EventKind::Added, at(0)),
            event(1, EventKind::Removed, at(2)),
            // Item 2: listed 4h.
            event(2, EventKind::Added, at(1)),
            event(2, EventKind::Removed, at(5)),
            // Item 3: still listed, right-censored.
            event(3, EventKind::Added, at(3)),
        ];
        let stats = compute_statistics(&events, 10);
        assert_eq!(stats.closed_lifecycles, 2);
        assert_eq!(stats.avg_dwell_secs, Some(3.0 * 3600.0));
    }

    #[test]
    fn removal_without_a_listed_start_is_ignored() {
        // Window truncation can drop an item's added event.
        let events = vec![
            event(1, EventKind::Removed, at(0)),
            event(1, EventKind::Added, at(1)),
            event(1, EventKind::Removed, at(2)),
        ];
        let stats = compute_statistics(&events, 5);
        assert_eq!(stats.closed_lifecycles, 1);
        assert_eq!(stats.avg_dwell_secs, Some(3600.0));
    }

    #[test]
    fn reoccurrence_averages_gaps_between_listings() {
        let events = vec![
            event(1, EventKind::Added, at(0)),
            event(1, EventKind::Removed, at(1)),
            event(1, EventKind::Added, at(4)),
            event(1, EventKind::Removed, at(5)),
            event(1, EventKind::Added, at(12)),
            // Item 2 lists once; never reoccurring.
            event(2, EventKind::Added, at(2)),
        ];
        let stats = compute_statistics(&events, 20);
        assert_eq!(stats.reoccurring_items, 1);
        // Gaps of 4h and 8h between successive listings.
        assert_eq!(stats.avg_reoccurrence_secs, Some(6.0 * 3600.0));
    }

    #[test]
    fn items_are_grouped_by_stable_key() {
        // Stable keys are strings (URLs or area-scoped names), not ids.
        let mut opened = event(0, EventKind::Added, at(0));
        opened.item_id = "https://example.com/p/1".to_string();
        let mut closed = event(0, EventKind::Removed, at(2));
        closed.item_id = "https://example.com/p/1".to_string();
        let mut unrelated = event(0, EventKind::Added, at(1));
        unrelated.item_id = "https://example.com/p/2".to_string();

        let stats = compute_statistics(&[opened, closed, unrelated], 4);
        assert_eq!(stats.closed_lifecycles, 1);
        assert_eq!(stats.avg_dwell_secs, Some(2.0 * 3600.0));
        assert_eq!(stats.reoccurring_items, 0);
    }

    #[test]
    fn unordered_input_is_sorted_per_item() {
        let events = vec![
            event(1, EventKind::Removed, at(2)),
            event(1, EventKind::Added, at(0)),
        ];
        let stats = compute_statistics(&events, 1);
        assert_eq!(stats.closed_lifecycles, 1);
        assert_eq!(stats.avg_dwell_secs, Some(2.0 * 3600.0));
    }
}
