//! The Holder: a concurrent two-level map of scanlines, and the lazy remote
//! reference that lets a mirrored scanline advertise itself before its bytes
//! have actually crossed the network.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use orbrelay_proto::{HaveData, Message};
use tokio::sync::OnceCell;

use crate::error::HolderError;

/// Collaborator that fetches a scanline's bytes from a mirrored peer. Bound
/// to one peer's request socket; implementations are responsible for
/// serializing concurrent requests (the transport allows only one in-flight
/// request at a time).
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    /// Fetch the bytes for `(satellite, timestamp)` from the peer this
    /// fetcher is bound to.
    async fn fetch_scanline(
        &self,
        satellite: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Bytes, HolderError>;
}

/// Collaborator that publishes federation messages. The Holder uses this to
/// emit `have` announcements after an insert becomes visible; production
/// code supplies the real Publisher, tests supply an in-memory recorder.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Publish `message` to every current subscriber.
    async fn publish(&self, message: Message);
}

/// A `payload-source` that has not yet fetched its bytes from a mirrored
/// peer. The first `materialize()` call sends a request and caches the
/// reply; every later call returns the cached bytes without further I/O.
///
/// [`tokio::sync::OnceCell::get_or_try_init`] gives exactly the desired race
/// semantics: concurrent callers serialize on the cell's internal lock only
/// until the first one finishes the fetch, and every subsequent read is
/// lock-free.
pub struct LazyRemoteReference {
    fetcher: Arc<dyn RemoteFetch>,
    satellite: String,
    timestamp: DateTime<Utc>,
    cached: OnceCell<Bytes>,
}

impl LazyRemoteReference {
    /// Build a reference bound to `fetcher` for `(satellite, timestamp)`.
    /// Does not touch the network until [`Self::materialize`] is called.
    pub fn new(fetcher: Arc<dyn RemoteFetch>, satellite: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { fetcher, satellite: satellite.into(), timestamp, cached: OnceCell::new() }
    }

    /// Satellite this reference was constructed for.
    #[must_use]
    pub fn satellite(&self) -> &str {
        &self.satellite
    }

    /// Timestamp this reference was constructed for.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Resolve the bytes, fetching from the peer on first call only.
    pub async fn materialize(&self) -> Result<Bytes, HolderError> {
        self.cached
            .get_or_try_init(|| self.fetcher.fetch_scanline(&self.satellite, self.timestamp))
            .await
            .cloned()
    }

    /// True once [`Self::materialize`] has completed successfully at least once.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached.initialized()
    }
}

/// Where a scanline's bytes live: owned locally, or behind a lazy fetch from
/// a mirrored peer. Consumers call [`PayloadSource::materialize`] and never
/// need to know which arm they hold; this accessor is the one sanctioned way
/// to get bytes out of either arm.
#[derive(Clone)]
pub enum PayloadSource {
    /// Bytes already resident in this process (the tailer's own parse, or a
    /// previously materialized remote reference).
    Owned(Bytes),
    /// Not yet fetched; advertised locally on the mirror watcher's behalf.
    Remote(Arc<LazyRemoteReference>),
}

impl PayloadSource {
    /// Produce the scanline's bytes, fetching from the peer if necessary.
    pub async fn materialize(&self) -> Result<Bytes, HolderError> {
        match self {
            Self::Owned(bytes) => Ok(bytes.clone()),
            Self::Remote(reference) => reference.materialize().await,
        }
    }
}

#[derive(Clone)]
struct Entry {
    elevation: f64,
    payload: PayloadSource,
}

/// Thread-safe two-level map `satellite -> timestamp -> (elevation,
/// payload-source)`. A single [`std::sync::Mutex`] covers both levels; no
/// suspension point is ever reached while the lock is held, so a plain
/// (non-async) mutex is correct and cheaper than `tokio::sync::Mutex` here.
pub struct Holder {
    origin: String,
    announcer: Arc<dyn Announcer>,
    inner: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, Entry>>>,
}

impl Holder {
    /// Build an empty Holder stamped with `origin` (this instance's
    /// publisher address, copied into every `have` announcement) and wired
    /// to `announcer` for publishing those announcements.
    pub fn new(origin: impl Into<String>, announcer: Arc<dyn Announcer>) -> Self {
        Self { origin: origin.into(), announcer, inner: Mutex::new(HashMap::new()) }
    }

    /// Insert or overwrite `(satellite, timestamp)`. Announces `have` only
    /// after the mutation is visible to other readers, so a subscriber that
    /// reacts to the announcement by requesting the scanline is guaranteed
    /// to find it present.
    pub async fn add(&self, satellite: impl Into<String>, timestamp: DateTime<Utc>, elevation: f64, payload: PayloadSource) {
        let satellite = satellite.into();

        {
            #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
            let mut inner = self.inner.lock().unwrap();
            inner.entry(satellite.clone()).or_default().insert(timestamp, Entry { elevation, payload });
        }

        self.announcer
            .publish(Message::Have(HaveData { satellite, timecode: timestamp, elevation, origin: self.origin.clone() }))
            .await;
    }

    /// Look up `(elevation, payload-source)` without materializing bytes.
    pub fn get(&self, satellite: &str, timestamp: DateTime<Utc>) -> Result<(f64, PayloadSource), HolderError> {
        #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
        let inner = self.inner.lock().unwrap();
        inner
            .get(satellite)
            .and_then(|by_ts| by_ts.get(&timestamp))
            .map(|entry| (entry.elevation, entry.payload.clone()))
            .ok_or(HolderError::NotFound)
    }

    /// Return the materialized bytes for `(satellite, timestamp)`. May block
    /// on a remote fetch and fail with one of [`HolderError`]'s remote
    /// variants if the payload source is a lazy reference.
    pub async fn get_data(&self, satellite: &str, timestamp: DateTime<Utc>) -> Result<Bytes, HolderError> {
        let (_, payload) = self.get(satellite, timestamp)?;
        payload.materialize().await
    }

    /// Snapshot of satellite names currently tracked, for the Cleaner's sweep.
    #[must_use]
    pub fn satellites(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
        let inner = self.inner.lock().unwrap();
        inner.keys().cloned().collect()
    }

    /// Snapshot of timestamps currently held for `satellite`, in ascending
    /// order, for the Cleaner's per-satellite sweep.
    #[must_use]
    pub fn timestamps_for(&self, satellite: &str) -> Vec<DateTime<Utc>> {
        #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
        let inner = self.inner.lock().unwrap();
        inner.get(satellite).map(|by_ts| by_ts.keys().copied().collect()).unwrap_or_default()
    }

    /// Remove `(satellite, timestamp)`; silent if absent. The Cleaner calls
    /// this once per entry, taking and releasing the lock each time, so it
    /// never holds the lock across a full sweep.
    pub fn delete(&self, satellite: &str, timestamp: DateTime<Utc>) {
        #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
        let mut inner = self.inner.lock().unwrap();
        if let Some(by_ts) = inner.get_mut(satellite) {
            by_ts.remove(&timestamp);
            if by_ts.is_empty() {
                inner.remove(satellite);
            }
        }
    }

    /// Number of satellites currently tracked (empty satellites are pruned
    /// on delete, so this is also "satellites with at least one scanline").
    #[must_use]
    pub fn satellite_count(&self) -> usize {
        #[allow(clippy::unwrap_used, reason = "poisoning would mean a prior panic while holding the lock, which never suspends")]
        self.inner.lock().unwrap().len()
    }
}
