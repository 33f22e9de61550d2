// src/lib.rs

//! listwatch: listing page change detection and notification

pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
