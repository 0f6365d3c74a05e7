//! Error types for wire decoding.

use thiserror::Error;

/// Errors raised while decoding HRPT frames or message envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `frame_sync` or `aux_sync` did not match the expected bit pattern.
    #[error("frame integrity check failed")]
    FrameIntegrityFailure,

    /// The 4-bit satellite id in the frame's `id` word has no known mapping.
    #[error("unknown satellite code {0:#x}")]
    UnknownSatelliteCode(u8),

    /// The message envelope header failed to parse as JSON.
    #[error("envelope decode failed: {0}")]
    EnvelopeDecode(String),

    /// A binary-flagged envelope's trailer was shorter than its declared length.
    #[error("truncated binary payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Declared payload length.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}
