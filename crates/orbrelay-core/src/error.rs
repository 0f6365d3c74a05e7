//! Error types for the Holder and lazy remote reference.

use thiserror::Error;

/// Errors raised while looking up or materializing a scanline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HolderError {
    /// No entry for `(satellite, timestamp)`.
    #[error("no such scanline")]
    NotFound,

    /// A lazy remote reference's peer replied `missing`.
    #[error("remote peer has no such scanline")]
    RemoteMissing,

    /// A lazy remote reference's peer replied with anything other than
    /// `scanline` or `missing`.
    #[error("protocol error materializing remote scanline: {0}")]
    RemoteProtocol(String),

    /// The transport underlying a lazy remote reference failed outright
    /// (connection refused, reset, timed out).
    #[error("remote fetch failed: {0}")]
    RemoteFetchFailed(String),
}

impl HolderError {
    /// True for the remote-reference failure modes that collectively
    /// correspond to `get_data`'s documented `RemoteFetchFailed` outcome.
    #[must_use]
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::RemoteMissing | Self::RemoteProtocol(_) | Self::RemoteFetchFailed(_))
    }
}
