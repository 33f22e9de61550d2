//! External collaborators: page fetching and item extraction.
//!
//! The pipeline only sees the [`PageFetcher`] and [`ItemExtractor`]
//! traits; the concrete HTTP client and CSS-selector extractor live
//! here, and tests substitute scripted implementations.

pub mod extract;
pub mod fetch;

pub use extract::{ItemExtractor, SelectorExtractor};
pub use fetch::{HttpFetcher, PageFetcher};
