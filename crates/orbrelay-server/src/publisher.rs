//! The Publisher: a single pub/sub endpoint bound to a configured port,
//! fanning out every announcement to every currently-connected subscriber.
//!
//! All sends serialize through one internal mutex, since both the Holder and
//! the Heartbeat emitter publish through the same sink. Implemented directly
//! over Tokio TCP rather than a message-broker dependency: the publisher
//! binds a listener and keeps every accepted connection in a shared,
//! mutex-guarded list; [`Publisher::publish`] writes the encoded envelope to
//! each one in turn, dropping any connection whose write fails.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use orbrelay_core::Announcer;
use orbrelay_proto::{Envelope, Message};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{Mutex, Notify},
    task::JoinHandle,
};

/// Bound publisher endpoint. Implements [`Announcer`] so the Holder and the
/// Heartbeat emitter can both publish through the same serialized sink.
pub struct Publisher {
    subject: String,
    sender: String,
    local_addr: SocketAddr,
    subscribers: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<Notify>,
}

impl Publisher {
    /// Bind a TCP listener at `addr` and start accepting subscribers in the
    /// background. `subject` and `sender` are captured once and stamped into
    /// every envelope this publisher emits, reified here as an immutable
    /// value rather than process-wide state.
    pub async fn bind(addr: &str, subject: impl Into<String>, sender: impl Into<String>) -> std::io::Result<(Self, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(Notify::new());

        let accept_task = {
            let subscribers = Arc::clone(&subscribers);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, peer)) => {
                                    tracing::debug!(%peer, "publisher accepted subscriber");
                                    subscribers.lock().await.push(stream);
                                },
                                Err(error) => tracing::warn!(%error, "publisher accept failed"),
                            }
                        },
                        () = shutdown.notified() => break,
                    }
                }
            })
        };

        Ok((Self { subject: subject.into(), sender: sender.into(), local_addr, subscribers, shutdown }, accept_task))
    }

    /// Address the publisher bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently-connected subscribers, for tests and diagnostics.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Stop accepting new subscribers and drop every current connection.
    /// Idempotent, non-blocking: no write is awaited, so shutdown never
    /// blocks on an undelivered message. Approximates a zero-linger close by
    /// dropping every connection immediately rather than setting a
    /// socket-level `SO_LINGER` option.
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        self.subscribers.lock().await.clear();
    }
}

#[async_trait]
impl Announcer for Publisher {
    async fn publish(&self, message: Message) {
        #[allow(clippy::disallowed_methods)]
        let timestamp = Utc::now();
        let envelope = Envelope::new(self.subject.clone(), self.sender.clone(), timestamp, message);
        let encoded = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "failed to encode outgoing envelope");
                return;
            },
        };

        let mut subscribers = self.subscribers.lock().await;
        let mut alive = Vec::with_capacity(subscribers.len());
        for mut stream in subscribers.drain(..) {
            match stream.write_all(&encoded).await {
                Ok(()) => alive.push(stream),
                Err(error) => tracing::debug!(%error, "dropping subscriber after failed write"),
            }
        }
        *subscribers = alive;
    }
}
