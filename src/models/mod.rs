// src/models/mod.rs

//! Domain models for the watcher application.
//!
//! This module contains all data structures used throughout the
//! application, organized by their primary purpose.

mod area;
mod config;
mod event;
mod item;

// Re-export all public types
pub use area::Area;
pub use config::{
    AreaConfig, AreaSelectors, ChannelConfig, Config, CrawlerConfig, LoggingConfig, StorageConfig,
    WatcherConfig,
};
pub use event::{Delivery, Event, EventKind, NotifyStatus, PendingDelivery};
pub use item::{
    stable_key, normalize_name, ItemRecord, ItemStatus, KeyPolicy, KeyedItem, RawItem,
};
