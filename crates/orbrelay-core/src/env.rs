//! Environment abstraction for deterministic testing.
//!
//! Decouples the Cleaner, Heartbeat emitter, and File Tailer from system
//! resources (monotonic time, wall-clock time, sleeping). Production code
//! supplies real system time and `tokio::time::sleep`; tests supply a fixed
//! or steppable clock so interval and eviction assertions are deterministic.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstract environment providing time and the one blocking primitive
/// (`sleep`) every periodic task in this system needs.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards within a single process.
/// - `utc_now()` is consistent with the wall clock the HRPT parser uses to
///   resolve timecodes and the Holder uses to evaluate retention.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific monotonic instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time, used for interval scheduling.
    fn now(&self) -> Self::Instant;

    /// Current UTC wall-clock time, used for timecode resolution and
    /// retention-window comparisons.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// The only async method in the trait; used exclusively by the Cleaner
    /// and Heartbeat emitter's cancellable wait loops.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
