//! Pipeline stages for the listing watcher.
//!
//! - `cycle`: one full fetch / gate / diff / record / notify pass
//! - `gate`: content fingerprinting and the unchanged-page short-circuit
//! - `diff`: snapshot comparison producing added / removed / unchanged sets
//! - `stats`: vacancy statistics over a window of recorded events

pub mod cycle;
pub mod diff;
pub mod gate;
pub mod stats;

pub use cycle::{run_cycle, RunSummary};
pub use diff::{diff_items, DiffOutcome};
pub use gate::{fingerprint, GateDecision};
pub use stats::{compute_statistics, Statistics};
