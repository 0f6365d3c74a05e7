//! Production `Environment` and `Elevation` implementations: real system
//! time and a pseudo-random elevation stub.
//!
//! Elevation is an injected collaborator with no correctness claim beyond
//! "the same value is observed by the publisher and by a local reader of a
//! given scanline" — a deterministic function of `(satellite, timestamp)`
//! satisfies that without needing real orbital geometry.

use std::{
    hash::{Hash, Hasher},
    time::Duration,
};

use chrono::{DateTime, Utc};
use orbrelay_core::env::Environment;
use orbrelay_proto::Elevation;

/// Production environment: real monotonic and wall-clock time, real
/// `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Deterministic pseudo-random elevation stub: hashes `(satellite,
/// timestamp)` into `[0, 90)` degrees. Not real orbital geometry — a future
/// implementation can replace this without touching the parser, which only
/// ever sees the [`Elevation`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubElevation;

impl Elevation for StubElevation {
    fn elevation(&self, satellite: &str, timestamp: DateTime<Utc>) -> f64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        satellite.hash(&mut hasher);
        timestamp.timestamp_millis().hash(&mut hasher);
        let bucket = hasher.finish() % 9000;
        bucket as f64 / 100.0
    }
}
