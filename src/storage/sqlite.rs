//! SQLite-backed snapshot store.
//!
//! Tables:
//! - `areas`: one row per monitored listing page
//! - `items`: one row per ever-observed item; never deleted, status flips
//! - `events`: append-only add/remove transitions, retention-swept
//! - `deliveries`: per-(event, channel) notification state
//! - `runs`: one row per observation cycle, feeds the occurrence rate
//!
//! All writes for a single area commit in one transaction, and a single
//! connection behind a mutex serializes writers, which keeps the
//! recorder's read-then-insert idempotence check race-free.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::error::{AppError, Result};
use crate::models::{
    Area, Delivery, Event, EventKind, ItemRecord, ItemStatus, NotifyStatus, PendingDelivery,
};
use crate::pipeline::diff::DiffOutcome;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS areas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    last_content_hash TEXT,
    last_checked_at TEXT
);

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    area_id INTEGER NOT NULL REFERENCES areas(id),
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE INDEX IF NOT EXISTS idx_items_area_status ON items(area_id, status);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES items(id),
    area_id INTEGER NOT NULL REFERENCES areas(id),
    kind TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    notified_at TEXT,
    notify_attempts INTEGER NOT NULL DEFAULT 0,
    notify_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_events_occurred ON events(occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_notify ON events(notify_status);

CREATE TABLE IF NOT EXISTS deliveries (
    event_id INTEGER NOT NULL REFERENCES events(id),
    channel TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    last_attempt_at TEXT,
    delivered_at TEXT,
    PRIMARY KEY (event_id, channel)
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    executed_at TEXT NOT NULL,
    status TEXT NOT NULL,
    notes TEXT
);
"#;

/// Counts of events created by one committed area cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordedChanges {
    pub added_events: usize,
    pub removed_events: usize,
}

impl RecordedChanges {
    pub fn total(&self) -> usize {
        self.added_events + self.removed_events
    }
}

/// SQLite-backed snapshot store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create the schema. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::storage("connection mutex poisoned"))
    }

    // ----- areas -----

    /// Insert area rows for any configured URLs not yet present.
    pub fn sync_areas(&self, urls: &[String]) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO areas (source_url) VALUES (?1)")?;
        for url in urls {
            stmt.execute([url])?;
        }
        Ok(())
    }

    /// Look up an area by its source URL.
    pub fn area_by_url(&self, url: &str) -> Result<Option<Area>> {
        let conn = self.lock()?;
        let area = conn
            .query_row(
                "SELECT id, source_url, last_content_hash, last_checked_at
                 FROM areas WHERE source_url = ?1",
                [url],
                map_area,
            )
            .optional()?;
        Ok(area)
    }

    /// All known areas, in insertion order.
    pub fn list_areas(&self) -> Result<Vec<Area>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_url, last_content_hash, last_checked_at FROM areas ORDER BY id",
        )?;
        let rows = stmt.query_map([], map_area)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    /// Advance `last_checked_at` without touching the content hash.
    ///
    /// Used when the hash gate reports `unchanged`: observability advances,
    /// correctness state does not.
    pub fn touch_area(&self, area_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE areas SET last_checked_at = ?2 WHERE id = ?1",
            params![area_id, now],
        )?;
        Ok(())
    }

    // ----- items -----

    /// The current snapshot: all active items of an area.
    pub fn active_items(&self, area_id: i64) -> Result<Vec<ItemRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, area_id, name, url, first_seen_at, last_seen_at, status
             FROM items WHERE area_id = ?1 AND status = 'active'",
        )?;
        let rows = stmt.query_map([area_id], map_item)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    // ----- event recorder -----

    /// Atomically commit one area cycle: item status flips, one event per
    /// transition with pending deliveries, snapshot refresh, and the gate
    /// hash update.
    ///
    /// Idempotent: replaying the same diff (crash before the commit point,
    /// then retry) inserts no duplicate events, because a transition is
    /// only recorded when the item's stored status actually flips.
    pub fn apply_cycle(
        &self,
        area_id: i64,
        now: DateTime<Utc>,
        content_hash: &str,
        diff: &DiffOutcome,
        channels: &[String],
    ) -> Result<RecordedChanges> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changes = RecordedChanges::default();

        for item in &diff.added {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM items WHERE id = ?1",
                    [&item.key],
                    |row| row.get(0),
                )
                .optional()?;

            match status.as_deref() {
                Some("active") => {
                    // Already open transition: a replayed diff, not a change.
                    tx.execute(
                        "UPDATE items SET name = ?2, url = ?3, last_seen_at = ?4 WHERE id = ?1",
                        params![item.key, item.name, item.url, now],
                    )?;
                }
                Some(_) => {
                    // Re-listing: reactivate, keep first_seen_at.
                    tx.execute(
                        "UPDATE items
                         SET name = ?2, url = ?3, last_seen_at = ?4, status = 'active'
                         WHERE id = ?1",
                        params![item.key, item.name, item.url, now],
                    )?;
                    insert_event(&tx, &item.key, area_id, EventKind::Added, now, channels)?;
                    changes.added_events += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO items (id, area_id, name, url, first_seen_at, last_seen_at, status)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 'active')",
                        params![item.key, area_id, item.name, item.url, now],
                    )?;
                    insert_event(&tx, &item.key, area_id, EventKind::Added, now, channels)?;
                    changes.added_events += 1;
                }
            }
        }

        for record in &diff.removed {
            let flipped = tx.execute(
                "UPDATE items SET status = 'removed' WHERE id = ?1 AND status = 'active'",
                [&record.id],
            )?;
            if flipped > 0 {
                insert_event(&tx, &record.id, area_id, EventKind::Removed, now, channels)?;
                changes.removed_events += 1;
            }
        }

        for item in &diff.unchanged {
            tx.execute(
                "UPDATE items SET name = ?2, url = ?3, last_seen_at = ?4 WHERE id = ?1",
                params![item.key, item.name, item.url, now],
            )?;
        }

        tx.execute(
            "UPDATE areas SET last_content_hash = ?2, last_checked_at = ?3 WHERE id = ?1",
            params![area_id, content_hash, now],
        )?;

        tx.commit()?;
        Ok(changes)
    }

    // ----- deliveries -----

    /// Pending deliveries that have attempts left, joined with the item
    /// context needed to format a message. Backoff eligibility is the
    /// dispatcher's concern.
    pub fn pending_deliveries(&self, max_attempts: u32) -> Result<Vec<PendingDelivery>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT d.event_id, d.channel, d.attempts, d.last_attempt_at,
                    e.kind, i.name, i.url
             FROM deliveries d
             JOIN events e ON e.id = d.event_id
             JOIN items i ON i.id = e.item_id
             WHERE d.status = 'pending' AND d.attempts < ?1
             ORDER BY d.event_id",
        )?;
        let rows = stmt.query_map([max_attempts], |row| {
            let kind: String = row.get(4)?;
            Ok(PendingDelivery {
                event_id: row.get(0)?,
                channel: row.get(1)?,
                attempts: row.get(2)?,
                last_attempt_at: row.get(3)?,
                kind: parse_kind(4, kind)?,
                item_name: row.get(5)?,
                item_url: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    /// Record a successful delivery and refresh the event's aggregate
    /// notify state. `notified_at` is set only if it was still null.
    pub fn mark_delivered(&self, event_id: i64, channel: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE deliveries
             SET status = 'delivered', delivered_at = ?3, last_attempt_at = ?3
             WHERE event_id = ?1 AND channel = ?2 AND status = 'pending'",
            params![event_id, channel, now],
        )?;
        tx.execute(
            "UPDATE events SET notified_at = COALESCE(notified_at, ?2) WHERE id = ?1",
            params![event_id, now],
        )?;
        refresh_event_aggregate(&tx, event_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Record a failed delivery attempt; marks the delivery failed once
    /// `max_attempts` is exhausted. Attempts never decrease.
    pub fn mark_attempt_failed(
        &self,
        event_id: i64,
        channel: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE deliveries
             SET attempts = attempts + 1, last_attempt_at = ?3
             WHERE event_id = ?1 AND channel = ?2 AND status = 'pending'",
            params![event_id, channel, now],
        )?;
        tx.execute(
            "UPDATE deliveries SET status = 'failed'
             WHERE event_id = ?1 AND channel = ?2 AND status = 'pending' AND attempts >= ?3",
            params![event_id, channel, max_attempts],
        )?;
        refresh_event_aggregate(&tx, event_id)?;
        tx.commit()?;
        Ok(())
    }

    /// All deliveries that exhausted their attempts, for operator surfacing.
    pub fn failed_deliveries(&self) -> Result<Vec<Delivery>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, channel, attempts, status, last_attempt_at, delivered_at
             FROM deliveries WHERE status = 'failed' ORDER BY event_id",
        )?;
        let rows = stmt.query_map([], map_delivery)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    // ----- events -----

    /// Events within a time window, optionally limited to one area,
    /// ordered by occurrence.
    pub fn events_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        area_id: Option<i64>,
    ) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, item_id, area_id, kind, occurred_at, notified_at,
                    notify_attempts, notify_status
             FROM events
             WHERE occurred_at >= ?1 AND occurred_at <= ?2
               AND (?3 IS NULL OR area_id = ?3)
             ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map(params![since, until, area_id], map_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    /// Full event history of one item, oldest first.
    pub fn events_for_item(&self, item_id: &str) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, item_id, area_id, kind, occurred_at, notified_at,
                    notify_attempts, notify_status
             FROM events WHERE item_id = ?1 ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map([item_id], map_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::from)
    }

    /// Delete events (and their delivery rows) older than `cutoff`.
    /// Item rows are never touched by the sweep.
    pub fn sweep_events(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM deliveries WHERE event_id IN
             (SELECT id FROM events WHERE occurred_at < ?1)",
            params![cutoff],
        )?;
        let deleted = tx.execute("DELETE FROM events WHERE occurred_at < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(deleted)
    }

    // ----- runs -----

    /// Append one run row.
    pub fn add_run(&self, executed_at: DateTime<Utc>, status: &str, notes: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (executed_at, status, notes) VALUES (?1, ?2, ?3)",
            params![executed_at, status, notes],
        )?;
        Ok(())
    }

    /// Number of completed observation cycles in a window. Dry runs are
    /// excluded: they persist no observations. Partial runs (some areas
    /// failed) still observed the rest and count.
    pub fn cycles_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM runs
             WHERE status IN ('success', 'partial')
               AND executed_at >= ?1 AND executed_at <= ?2",
            params![since, until],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn insert_event(
    tx: &Transaction<'_>,
    item_id: &str,
    area_id: i64,
    kind: EventKind,
    now: DateTime<Utc>,
    channels: &[String],
) -> Result<()> {
    tx.execute(
        "INSERT INTO events (item_id, area_id, kind, occurred_at, notify_attempts, notify_status)
         VALUES (?1, ?2, ?3, ?4, 0, 'pending')",
        params![item_id, area_id, kind.as_str(), now],
    )?;
    let event_id = tx.last_insert_rowid();
    for channel in channels {
        tx.execute(
            "INSERT INTO deliveries (event_id, channel, attempts, status)
             VALUES (?1, ?2, 0, 'pending')",
            params![event_id, channel],
        )?;
    }
    Ok(())
}

/// Recompute an event's aggregate notify fields from its deliveries:
/// attempts is the per-channel maximum; status is pending while any
/// channel is pending, delivered only when every channel delivered,
/// failed once all channels are terminal and at least one failed.
fn refresh_event_aggregate(tx: &Transaction<'_>, event_id: i64) -> Result<()> {
    let (total, pending, failed): (u32, u32, u32) = tx.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
         FROM deliveries WHERE event_id = ?1",
        [event_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let status = if total == 0 || pending > 0 {
        NotifyStatus::Pending
    } else if failed > 0 {
        NotifyStatus::Failed
    } else {
        NotifyStatus::Delivered
    };

    tx.execute(
        "UPDATE events
         SET notify_attempts = (SELECT COALESCE(MAX(attempts), 0)
                                FROM deliveries WHERE event_id = ?1),
             notify_status = ?2
         WHERE id = ?1",
        params![event_id, status.as_str()],
    )?;
    Ok(())
}

// ----- row mapping -----

fn map_area(row: &Row<'_>) -> rusqlite::Result<Area> {
    Ok(Area {
        id: row.get(0)?,
        source_url: row.get(1)?,
        last_content_hash: row.get(2)?,
        last_checked_at: row.get(3)?,
    })
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    let status: String = row.get(6)?;
    Ok(ItemRecord {
        id: row.get(0)?,
        area_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        first_seen_at: row.get(4)?,
        last_seen_at: row.get(5)?,
        status: parse_status(6, status)?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let kind: String = row.get(3)?;
    let notify_status: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        item_id: row.get(1)?,
        area_id: row.get(2)?,
        kind: parse_kind(3, kind)?,
        occurred_at: row.get(4)?,
        notified_at: row.get(5)?,
        notify_attempts: row.get(6)?,
        notify_status: parse_notify_status(7, notify_status)?,
    })
}

fn map_delivery(row: &Row<'_>) -> rusqlite::Result<Delivery> {
    let status: String = row.get(3)?;
    Ok(Delivery {
        event_id: row.get(0)?,
        channel: row.get(1)?,
        attempts: row.get(2)?,
        status: parse_notify_status(3, status)?,
        last_attempt_at: row.get(4)?,
        delivered_at: row.get(5)?,
    })
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_status(index: usize, value: String) -> rusqlite::Result<ItemStatus> {
    ItemStatus::parse(&value)
        .ok_or_else(|| conversion_error(index, format!("unknown item status '{value}'")))
}

fn parse_kind(index: usize, value: String) -> rusqlite::Result<EventKind> {
    EventKind::parse(&value)
        .ok_or_else(|| conversion_error(index, format!("unknown event kind '{value}'")))
}

fn parse_notify_status(index: usize, value: String) -> rusqlite::Result<NotifyStatus> {
    NotifyStatus::parse(&value)
        .ok_or_else(|| conversion_error(index, format!("unknown notify status '{value}'")))
}
