//! Default constants for recon-sync configuration.

// =============================================================================
// Backend Defaults
// =============================================================================

/// Base URL of the reconciliation backend's paged read API.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";

/// Per-request timeout for page fetches (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Loader Defaults
// =============================================================================

/// Items requested per backend page.
/// Large pages keep the number of round trips low for 100k+ row jobs.
pub const DEFAULT_PAGE_SIZE: usize = 5_000;

/// Items appended to the accumulator per `extend` call.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Items absorbed between two cooperative yields.
pub const DEFAULT_YIELD_EVERY: usize = 2_000;

// =============================================================================
// View Defaults
// =============================================================================

/// Rows per page window handed to the UI layer.
pub const DEFAULT_WINDOW_SIZE: usize = 50;
