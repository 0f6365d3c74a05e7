//! Ground-station runtime: wires the file tailer, publisher, heartbeat
//! emitter, cleaner, mirror watcher, and request manager around a shared
//! [`Holder`], and owns their startup and shutdown order.
//!
//! # Components
//!
//! - [`config`]: INI configuration loading.
//! - [`file_tailer`]: watches `data_dir` for growth and feeds the HRPT
//!   parser.
//! - [`publisher`]: the `have`/`heartbeat` pub/sub sink.
//! - [`heartbeat`]: periodic liveness announcement.
//! - [`cleaner`]: periodic retention-window eviction.
//! - [`mirror`]: peer subscription and lazy remote reference injection.
//! - [`request_manager`]: the ping/scanline/notice reply server.
//! - [`Supervisor`]: starts the above in dependency order and stops them,
//!   on shutdown, in reverse.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cleaner;
pub mod config;
pub mod error;
pub mod file_tailer;
pub mod heartbeat;
pub mod mirror;
pub mod publisher;
pub mod request_manager;
pub mod system_env;
mod wire;

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use orbrelay_core::{Announcer, Holder};
use tokio::task::JoinHandle;

pub use cleaner::Cleaner;
pub use config::{ConfigError, HostConfig, StationConfig};
pub use error::ServerError;
pub use file_tailer::FileTailer;
pub use heartbeat::HeartbeatEmitter;
pub use mirror::MirrorWatcher;
pub use publisher::Publisher;
pub use request_manager::RequestManager;
pub use system_env::{StubElevation, SystemEnv};

/// Message subject every component of one station's runtime shares:
/// `/oper/polar/direct_readout/<station>`. Computed once at startup and
/// threaded into every component that emits or parses an envelope, rather
/// than kept as process-wide state.
#[must_use]
pub fn subject_for(station: &str) -> String {
    format!("/oper/polar/direct_readout/{station}")
}

/// Starts every core subsystem for one station and stops them, in reverse
/// dependency order, on `stop()`. Dependency order follows §4.10: Publisher
/// before the Heartbeat emitter, Holder before the Cleaner, the Mirror
/// Watcher, and the Request Manager.
pub struct Supervisor {
    holder: Arc<Holder>,
    publisher: Arc<Publisher>,
    publisher_accept: JoinHandle<()>,
    heartbeat: Arc<HeartbeatEmitter<SystemEnv>>,
    heartbeat_task: JoinHandle<()>,
    cleaner: Arc<Cleaner<SystemEnv>>,
    cleaner_task: JoinHandle<()>,
    tailer_shutdown: Arc<tokio::sync::Notify>,
    tailer_task: JoinHandle<()>,
    _watcher: notify::RecommendedWatcher,
    mirror: Option<Arc<MirrorWatcher>>,
    mirror_task: Option<JoinHandle<()>>,
    request_manager: Arc<RequestManager>,
    request_task: JoinHandle<()>,
}

impl Supervisor {
    /// Start every core subsystem named in `config`. Binds the publisher and
    /// request/reply listeners, starts watching `data_dir`, and — if
    /// `config.mirror` names a peer — connects the mirror watcher. A
    /// `mirror` key left unset is not an error (§7 `ConfigMissing`): the
    /// mirror watcher simply does not start.
    pub async fn start(config: StationConfig) -> Result<Self, ServerError> {
        let subject = subject_for(&config.station);
        let origin = config.local.pub_addr();

        let (publisher, publisher_accept) =
            Publisher::bind(&config.local.pub_addr(), subject.clone(), config.station.clone()).await?;
        let publisher = Arc::new(publisher);

        let holder = Arc::new(Holder::new(origin.clone(), Arc::clone(&publisher) as Arc<dyn Announcer>));

        let env = SystemEnv::new();

        let heartbeat = Arc::new(HeartbeatEmitter::new(
            Arc::clone(&publisher) as Arc<dyn Announcer>,
            env,
            origin.clone(),
            Duration::from_secs(heartbeat::DEFAULT_INTERVAL_SECS),
        ));
        let heartbeat_task = {
            let heartbeat = Arc::clone(&heartbeat);
            tokio::spawn(async move { heartbeat.run().await })
        };

        let cleaner = Arc::new(Cleaner::new(
            Arc::clone(&holder),
            env,
            Duration::from_secs(cleaner::DEFAULT_INTERVAL_SECS),
            ChronoDuration::seconds(cleaner::DEFAULT_RETENTION_SECS),
        ));
        let cleaner_task = {
            let cleaner = Arc::clone(&cleaner);
            tokio::spawn(async move { cleaner.run().await })
        };

        let (watcher, events) = file_tailer::spawn_watcher(&config.data_dir, &config.file_pattern)
            .map_err(|e| ServerError::Transport(std::io::Error::other(e)))?;
        let tailer = Arc::new(FileTailer::new(Arc::clone(&holder), Arc::new(StubElevation), env));
        let tailer_shutdown = Arc::new(tokio::sync::Notify::new());
        let tailer_task = {
            let tailer = Arc::clone(&tailer);
            let tailer_shutdown = Arc::clone(&tailer_shutdown);
            tokio::spawn(async move { tailer.run(events, tailer_shutdown).await })
        };

        let (mirror, mirror_task) = match &config.mirror {
            Some(peer) => {
                let watcher = Arc::new(
                    MirrorWatcher::connect(peer, subject.clone(), config.station.clone(), Arc::clone(&holder)).await?,
                );
                let task = {
                    let watcher = Arc::clone(&watcher);
                    let peer = peer.clone();
                    tokio::spawn(async move {
                        if let Err(error) = watcher.run(&peer).await {
                            tracing::warn!(%error, "mirror watcher stopped");
                        }
                    })
                };
                (Some(watcher), Some(task))
            },
            None => {
                tracing::info!("no mirror configured, skipping mirror watcher");
                (None, None)
            },
        };

        let request_manager = Arc::new(RequestManager::new(Arc::clone(&holder), config.station.clone()));
        let request_task = {
            let request_manager = Arc::clone(&request_manager);
            let addr = config.local.req_addr();
            tokio::spawn(async move {
                if let Err(error) = request_manager.run(&addr).await {
                    tracing::error!(%error, "request manager stopped");
                }
            })
        };

        Ok(Self {
            holder,
            publisher,
            publisher_accept,
            heartbeat,
            heartbeat_task,
            cleaner,
            cleaner_task,
            tailer_shutdown,
            tailer_task,
            _watcher: watcher,
            mirror,
            mirror_task,
            request_manager,
            request_task,
        })
    }

    /// The shared Holder, exposed for diagnostics and tests.
    #[must_use]
    pub fn holder(&self) -> &Arc<Holder> {
        &self.holder
    }

    /// Stop every subsystem in reverse startup order. Idempotent: each
    /// component's own `stop()` is idempotent, and this only ever runs
    /// once per `Supervisor`. Socket-owning components close with zero
    /// linger (never await an undelivered write), so this returns promptly.
    pub async fn stop(self) {
        self.request_manager.stop();
        let _ = self.request_task.await;

        if let Some(mirror) = &self.mirror {
            mirror.stop();
        }
        if let Some(task) = self.mirror_task {
            task.abort();
            let _ = task.await;
        }

        self.tailer_shutdown.notify_waiters();
        let _ = self.tailer_task.await;

        self.cleaner.stop();
        let _ = self.cleaner_task.await;

        self.heartbeat.stop();
        let _ = self.heartbeat_task.await;

        self.publisher.stop().await;
        self.publisher_accept.abort();
        let _ = self.publisher_accept.await;
    }
}
