//! The Request Manager: serves one request/reply exchange at a time on the
//! station's request/reply port. Connections are accepted and served
//! strictly one after another, never concurrently, so the reply socket as a
//! whole stays request-paired rather than merely per-connection.

use std::sync::Arc;

use orbrelay_core::{Holder, HolderError};
use orbrelay_proto::{Envelope, Message, PongData, RequestKind};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
};

use crate::wire;

/// Accepts connections on a bound listener and serves exactly one
/// request/reply exchange at a time, closing each connection before the
/// next is accepted.
pub struct RequestManager {
    holder: Arc<Holder>,
    station: String,
    shutdown: Arc<Notify>,
}

impl RequestManager {
    /// Build a manager that answers on behalf of `station` using `holder`.
    pub fn new(holder: Arc<Holder>, station: impl Into<String>) -> Self {
        Self { holder, station: station.into(), shutdown: Arc::new(Notify::new()) }
    }

    /// Signal the accept loop to stop before its next poll.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Bind `addr` and serve connections until `stop()` is called.
    ///
    /// One request/reply exchange is served at a time: the next `accept()`
    /// only runs once the current connection's reply has been written, so
    /// the reply socket stays strictly request-paired as a whole, not just
    /// per connection.
    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "request manager accepted connection");
                            if let Err(error) = serve_one(stream, &self.holder, &self.station).await {
                                tracing::warn!(%peer, %error, "request manager connection failed");
                            }
                        },
                        Err(error) => tracing::warn!(%error, "request manager accept failed"),
                    }
                },
                () = self.shutdown.notified() => break,
            }
        }
        Ok(())
    }
}

async fn serve_one(mut stream: TcpStream, holder: &Holder, station: &str) -> std::io::Result<()> {
    let request = match wire::read_envelope(&mut stream).await {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(%error, "failed to decode incoming request");
            #[allow(clippy::disallowed_methods)]
            let timestamp = chrono::Utc::now();
            let reply = Envelope::new(crate::subject_for(station), station, timestamp, Message::Error);
            return wire::write_envelope(&mut stream, &reply).await;
        },
    };
    let reply_message = dispatch(holder, station, request.message).await;

    #[allow(clippy::disallowed_methods)]
    let timestamp = chrono::Utc::now();
    let reply = Envelope::new(request.subject, station, timestamp, reply_message);
    wire::write_envelope(&mut stream, &reply).await
}

async fn dispatch(holder: &Holder, station: &str, message: Message) -> Message {
    match message {
        Message::Ping => Message::Pong(PongData { station: station.to_string() }),
        Message::Request(RequestKind::Scanline { satellite, utctime }) => match holder.get_data(&satellite, utctime).await {
            Ok(bytes) => Message::Scanline(bytes),
            Err(HolderError::NotFound | HolderError::RemoteMissing) => Message::Missing,
            Err(error @ (HolderError::RemoteProtocol(_) | HolderError::RemoteFetchFailed(_))) => {
                tracing::warn!(%satellite, %utctime, %error, "mirror fetch failed while serving request");
                Message::Error
            },
        },
        Message::Notice(_) => Message::Ack,
        other => {
            tracing::debug!(?other, "unknown request kind");
            Message::Unknown
        },
    }
}
