//! Tuning constants for the sync core.
//!
//! Centralizes magic numbers so they stay discoverable. Exact values are
//! not authoritative (spec §9 open question) — these are the reasonable
//! defaults spec §4.3/§5 calls out.

/// Initial reconnect backoff delay in seconds.
pub const RECONNECT_BACKOFF_INITIAL_SECS: u64 = 1;

/// Reconnect backoff cap in seconds; growth resets to the initial delay on
/// a successful connect.
pub const RECONNECT_BACKOFF_MAX_SECS: u64 = 60;

/// Per-command timeout before the connection is reset and backoff begins.
pub const COMMAND_TIMEOUT_SECS: u64 = 30;

/// IDLE refresh interval. RFC 3501 recommends 29 minutes; refreshed sooner
/// for reliability against flaky middleboxes.
pub const IDLE_TIMEOUT_SECS: u64 = 300;

/// Default application directory name under `$HOME`.
pub const DEFAULT_APP_DIR_NAME: &str = ".nmail";
