//! # recon-sync
//!
//! Client-side synchronization of reconciliation results.
//!
//! A reconciliation job produces four collections (matches, back-office-only,
//! partner-only and mismatches) that can hold 100k+ rows each. This library
//! pulls them from a paged backend API without starving the async runtime,
//! deduplicates concurrent loads of the same collection, caches completed
//! collections against the job's reported counts, and derives searchable,
//! paginated views plus agency-level aggregates from them.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod fetch;
pub mod filter;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod scheduler;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, SyncConfig};
pub use errors::LoadError;
pub use fetch::{HttpPageFetcher, PageFetcher};
pub use model::{
    AgencySummaryRow, DatasetKind, InlineResults, LoadState, Match, Page, PageWindow, Progress, Record,
    ResultCounts, Row, VolumeTotals,
};
pub use normalize::{normalize_key, resolve_original};
pub use store::DatasetStore;
