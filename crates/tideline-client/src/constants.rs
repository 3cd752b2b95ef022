//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// How long to wait for the server's readiness notification after the
/// transport reports open, before proceeding optimistically into bootstrap.
/// Some proxies swallow the ready control frame; the snapshot fetch is
/// correct either way.
pub const READY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Timeout for the one-shot snapshot request.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum frames buffered between transport open and bootstrap completion.
/// Sized for a burst of streaming deltas arriving while the snapshot fetch
/// is in flight; overflow drops the oldest entries.
pub const MAX_BUFFERED_FRAMES: usize = 1024;

/// Capacity of the session event broadcast channel. Slow subscribers lag
/// rather than block the driver.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
