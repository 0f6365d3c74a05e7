//! The Mirror Watcher: subscribes to a peer's `have`/`heartbeat` stream and
//! advertises the peer's scanlines locally through lazy remote references.
//!
//! Owns a dedicated request-socket client ([`MirrorRequestClient`]) exclusively
//! — every [`orbrelay_core::LazyRemoteReference`] this watcher constructs
//! shares the same client, whose internal mutex serializes the req/rep
//! exchange the transport only allows one of at a time.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use orbrelay_core::{Holder, HolderError, LazyRemoteReference, PayloadSource, RemoteFetch};
use orbrelay_proto::{Envelope, Message, RequestKind, LINE_SIZE};
use tokio::{
    net::TcpStream,
    sync::{Mutex, Notify},
};

use crate::{config::HostConfig, wire};

/// Request-socket client bound to one mirror peer. Serializes concurrent
/// `materialize()` calls from every lazy reference this watcher has handed
/// to the Holder, since the underlying req/rep transport allows only one
/// in-flight exchange.
pub struct MirrorRequestClient {
    stream: Mutex<TcpStream>,
    subject: String,
    sender: String,
}

impl MirrorRequestClient {
    /// Connect to `peer`'s request/reply port.
    pub async fn connect(peer: &HostConfig, subject: impl Into<String>, sender: impl Into<String>) -> std::io::Result<Self> {
        let stream = TcpStream::connect(peer.req_addr()).await?;
        Ok(Self { stream: Mutex::new(stream), subject: subject.into(), sender: sender.into() })
    }
}

#[async_trait]
impl RemoteFetch for MirrorRequestClient {
    async fn fetch_scanline(&self, satellite: &str, timestamp: DateTime<Utc>) -> Result<Bytes, HolderError> {
        let mut stream = self.stream.lock().await;

        #[allow(clippy::disallowed_methods)]
        let now = Utc::now();
        let request = Envelope::new(
            self.subject.clone(),
            self.sender.clone(),
            now,
            Message::Request(RequestKind::Scanline { satellite: satellite.to_string(), utctime: timestamp }),
        );
        wire::write_envelope(&mut *stream, &request).await.map_err(|e| HolderError::RemoteFetchFailed(e.to_string()))?;
        let reply = wire::read_envelope(&mut *stream).await.map_err(|e| HolderError::RemoteFetchFailed(e.to_string()))?;

        match reply.message {
            Message::Scanline(bytes) => {
                if bytes.len() != LINE_SIZE {
                    tracing::warn!(len = bytes.len(), expected = LINE_SIZE, "mirror reply length does not match line size");
                }
                Ok(bytes)
            },
            Message::Missing => Err(HolderError::RemoteMissing),
            other => Err(HolderError::RemoteProtocol(format!("unexpected reply to scanline request: {other:?}"))),
        }
    }
}

/// Subscribes to a peer's publisher stream and injects lazy remote
/// references for every `have` it observes.
pub struct MirrorWatcher {
    holder: Arc<Holder>,
    fetcher: Arc<MirrorRequestClient>,
    shutdown: Arc<Notify>,
}

impl MirrorWatcher {
    /// Connect the request socket to `peer` and build a watcher that will
    /// inject lazy references into `holder`.
    pub async fn connect(peer: &HostConfig, subject: impl Into<String>, sender: impl Into<String>, holder: Arc<Holder>) -> std::io::Result<Self> {
        let subject = subject.into();
        let sender = sender.into();
        let fetcher = Arc::new(MirrorRequestClient::connect(peer, subject, sender).await?);
        Ok(Self { holder, fetcher, shutdown: Arc::new(Notify::new()) })
    }

    /// Signal the subscriber loop to stop before its next read.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Connect the subscriber socket to `peer` and process its `have`/
    /// `heartbeat` stream until `stop()` is called or the connection fails.
    pub async fn run(&self, peer: &HostConfig) -> std::io::Result<()> {
        let mut subscriber = TcpStream::connect(peer.pub_addr()).await?;

        loop {
            tokio::select! {
                envelope = wire::read_envelope(&mut subscriber) => {
                    match envelope {
                        Ok(envelope) => self.handle(envelope).await,
                        Err(error) => {
                            tracing::warn!(%error, "mirror subscriber connection failed");
                            return Err(error);
                        },
                    }
                },
                () = self.shutdown.notified() => break,
            }
        }
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.message {
            Message::Have(have) => {
                let reference: Arc<dyn RemoteFetch> = Arc::clone(&self.fetcher) as Arc<dyn RemoteFetch>;
                let reference = Arc::new(LazyRemoteReference::new(reference, have.satellite.clone(), have.timecode));
                self.holder.add(have.satellite, have.timecode, have.elevation, PayloadSource::Remote(reference)).await;
            },
            Message::Heartbeat(heartbeat) => {
                tracing::info!(addr = %heartbeat.addr, "mirror heartbeat");
            },
            other => tracing::debug!(?other, "ignoring unexpected message on mirror subscriber stream"),
        }
    }
}
