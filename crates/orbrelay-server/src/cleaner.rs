//! The Cleaner: periodically evicts scanlines older than a configured
//! retention window so the Holder does not grow without bound.

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use orbrelay_core::{env::Environment, Holder};
use tokio::sync::Notify;

/// Default sweep interval, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default retention window, in seconds (one hour).
pub const DEFAULT_RETENTION_SECS: i64 = 3600;

/// Sweeps a [`Holder`] on a fixed interval, deleting every entry older than
/// `retention`. Generic over [`Environment`] so the wait loop and the wall
/// clock used to judge age are both injectable in tests.
pub struct Cleaner<E: Environment> {
    holder: Arc<Holder>,
    env: E,
    interval: Duration,
    retention: ChronoDuration,
    shutdown: Arc<Notify>,
}

impl<E: Environment> Cleaner<E> {
    /// Build a cleaner that sweeps `holder` every `interval`, evicting
    /// entries older than `retention`.
    pub fn new(holder: Arc<Holder>, env: E, interval: Duration, retention: ChronoDuration) -> Self {
        Self { holder, env, interval, retention, shutdown: Arc::new(Notify::new()) }
    }

    /// Signal the loop to stop before its next wait completes.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run until `stop()` is called, sweeping once per interval.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                () = self.env.sleep(self.interval) => self.sweep(),
                () = self.shutdown.notified() => break,
            }
        }
    }

    /// Delete every entry older than `retention` as of the current time.
    /// Takes and releases the Holder's lock once per deleted entry rather
    /// than holding it across the whole sweep, so readers and writers are
    /// never blocked by a long-running cleanup pass.
    pub fn sweep(&self) {
        let cutoff = self.env.utc_now() - self.retention;
        for satellite in self.holder.satellites() {
            for timestamp in self.holder.timestamps_for(&satellite) {
                if timestamp < cutoff {
                    self.holder.delete(&satellite, timestamp);
                }
            }
        }
    }
}
