//! Wire types shared by every ground-station instance: the HRPT frame decoder
//! and the federation message envelope.
//!
//! # Components
//!
//! - [`hrpt`]: decodes a raw HRPT byte stream into scanline tuples.
//! - [`message`]: the pub/sub and request/reply envelope peers exchange.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod hrpt;
pub mod message;

pub use error::ProtocolError;
pub use hrpt::{decode_timecode, encode_timecode, CaduReader, ConstantElevation, Elevation, HrptReader, Scanline, LINE_SIZE};
pub use message::{Envelope, HaveData, HeartbeatData, Message, PongData, RequestKind};

/// Subscribe-filter prefix used by the interoperable pub/sub format this
/// system remains wire-compatible with. A plain TCP fan-out publisher has no
/// broker to apply this filter through; it is kept as a named constant for
/// documentation and for any future broker-backed transport.
pub const SUBSCRIBE_PREFIX: &str = "pytroll";
