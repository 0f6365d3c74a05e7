//! The Heartbeat Emitter: publishes a `heartbeat` announcement on a fixed
//! interval so a mirror peer can distinguish "station is quiet" from
//! "station is gone".

use std::{sync::Arc, time::Duration};

use orbrelay_core::{env::Environment, Announcer};
use orbrelay_proto::{HeartbeatData, Message};
use tokio::sync::Notify;

/// Default interval between heartbeats, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Publishes a heartbeat through `announcer` every `interval`, until
/// `stop()` is called. Generic over [`Environment`] so tests can drive the
/// loop without real sleeps.
pub struct HeartbeatEmitter<E: Environment> {
    announcer: Arc<dyn Announcer>,
    env: E,
    addr: String,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl<E: Environment> HeartbeatEmitter<E> {
    /// Build an emitter that publishes through `announcer` as `addr` (this
    /// station's own `host:pubport`) every `interval`.
    pub fn new(announcer: Arc<dyn Announcer>, env: E, addr: impl Into<String>, interval: Duration) -> Self {
        Self { announcer, env, addr: addr.into(), interval, shutdown: Arc::new(Notify::new()) }
    }

    /// Signal the loop to stop before its next wait completes.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run until `stop()` is called, publishing one heartbeat per interval.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                () = self.env.sleep(self.interval) => {
                    self.announcer
                        .publish(Message::Heartbeat(HeartbeatData { addr: self.addr.clone(), next_pass_time: "unknown".to_string() }))
                        .await;
                },
                () = self.shutdown.notified() => break,
            }
        }
    }
}
