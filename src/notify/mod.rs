//! Notification dispatch with per-channel retry and backoff.
//!
//! Delivery state lives in the snapshot store (`deliveries` table); this
//! module decides which deliveries are due, formats messages, and calls
//! the configured channels. Retries are deferred: the next scheduled run
//! re-invokes the dispatcher, and eligibility is computed from persisted
//! attempt state against an injected `now`, never by sleeping. The
//! contract is at-least-once: a crash between a successful send and the
//! `delivered` commit may duplicate a notification, but an event is
//! never re-sent once marked delivered.

pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{EventKind, PendingDelivery};
use crate::storage::SqliteStore;

pub use webhook::WebhookChannel;

/// A notification channel endpoint.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Configured channel name, used as the delivery tracking key.
    fn name(&self) -> &str;

    /// Deliver one message.
    async fn send(&self, message: &str) -> Result<()>;
}

/// Exponential backoff schedule: `base × 2^n` for the n-th retry
/// (0-indexed), capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_secs: u64,
    cap_secs: u64,
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, cap_secs: u64) -> Self {
        Self {
            base_secs,
            cap_secs,
        }
    }

    /// Delay required after the given number of failed attempts.
    pub fn delay_secs(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exp = (attempts - 1).min(16);
        self.base_secs
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.cap_secs)
    }

    /// Whether a delivery with this attempt history is due at `now`.
    pub fn is_due(
        &self,
        attempts: u32,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match last_attempt_at {
            None => true,
            Some(last) => now >= last + Duration::seconds(self.delay_secs(attempts) as i64),
        }
    }
}

/// Render the notification message for one transition.
pub fn format_message(kind: EventKind, item_name: &str, item_url: &str) -> String {
    match kind {
        EventKind::Added => format!("New item listed: {item_name}\n{item_url}"),
        EventKind::Removed => format!("Item delisted: {item_name}\n{item_url}"),
    }
}

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Deliveries confirmed by a channel this pass
    pub delivered: usize,
    /// Failed attempts with retries remaining
    pub retried: usize,
    /// Deliveries that exhausted their attempts this pass
    pub exhausted: usize,
    /// Deliveries skipped because their backoff window has not elapsed
    pub deferred: usize,
    /// Deliveries whose channel is no longer configured; they stay
    /// pending until the channel returns or retention sweeps the event
    pub unroutable: usize,
}

/// Delivers due pending deliveries through the configured channels.
pub struct Dispatcher<'a> {
    store: &'a SqliteStore,
    channels: &'a [Box<dyn Channel>],
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a SqliteStore,
        channels: &'a [Box<dyn Channel>],
        policy: BackoffPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            channels,
            policy,
            max_attempts,
        }
    }

    /// One dispatch pass over every pending delivery that is due at `now`.
    ///
    /// Safe to re-invoke on the same state: delivered rows are excluded
    /// by the store query, and channels are independent of one another.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        for delivery in self.store.pending_deliveries(self.max_attempts)? {
            if !self
                .policy
                .is_due(delivery.attempts, delivery.last_attempt_at, now)
            {
                outcome.deferred += 1;
                continue;
            }

            let Some(channel) = self.find_channel(&delivery) else {
                outcome.unroutable += 1;
                continue;
            };

            let message =
                format_message(delivery.kind, &delivery.item_name, &delivery.item_url);
            match channel.send(&message).await {
                Ok(()) => {
                    self.store
                        .mark_delivered(delivery.event_id, &delivery.channel, now)?;
                    outcome.delivered += 1;
                }
                Err(e) => {
                    self.store.mark_attempt_failed(
                        delivery.event_id,
                        &delivery.channel,
                        now,
                        self.max_attempts,
                    )?;
                    if delivery.attempts + 1 >= self.max_attempts {
                        outcome.exhausted += 1;
                        log::error!(
                            "delivery of event {} via '{}' exhausted {} attempts: {}",
                            delivery.event_id,
                            delivery.channel,
                            self.max_attempts,
                            e
                        );
                    } else {
                        outcome.retried += 1;
                        log::warn!(
                            "delivery of event {} via '{}' failed (attempt {}/{}): {}",
                            delivery.event_id,
                            delivery.channel,
                            delivery.attempts + 1,
                            self.max_attempts,
                            e
                        );
                    }
                }
            }
        }

        Ok(outcome)
    }

    fn find_channel(&self, delivery: &PendingDelivery) -> Option<&dyn Channel> {
        let found = self
            .channels
            .iter()
            .find(|c| c.name() == delivery.channel)
            .map(|c| c.as_ref());
        if found.is_none() {
            log::warn!(
                "no configured channel '{}' for event {}; delivery left pending",
                delivery.channel,
                delivery.event_id
            );
        }
        found
    }
}
