//! The federation message envelope.
//!
//! Every pub/sub and request/reply payload is a self-describing message:
//! `{subject, type, data, sender, timestamp, binary_flag}`, textually encoded
//! (JSON) with an optional raw binary trailer for binary-flagged messages
//! (currently only `scanline` replies). [`Envelope::encode`]/[`Envelope::decode`]
//! round-trip any [`Message`], including the binary case.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// `have` announcement data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaveData {
    /// Satellite name, e.g. `"NOAA 15"`.
    pub satellite: String,
    /// The scanline's timestamp.
    pub timecode: DateTime<Utc>,
    /// Elevation in degrees above horizon.
    pub elevation: f64,
    /// `host:port` of the publisher that announced this scanline.
    pub origin: String,
}

/// `heartbeat` announcement data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Address of the publisher emitting the heartbeat.
    pub addr: String,
    /// Reserved for a future predicted next overpass; always `"unknown"` today.
    pub next_pass_time: String,
}

/// `request` data: the only request kind this system defines is a scanline
/// fetch, tagged by `type` for wire compatibility with the interoperable
/// format (which allows other request kinds this system doesn't implement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestKind {
    /// Fetch the bytes for `(satellite, utctime)`.
    Scanline {
        /// Satellite name.
        satellite: String,
        /// Timestamp to fetch.
        utctime: DateTime<Utc>,
    },
}

/// `pong` reply data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongData {
    /// The responding station's configured name.
    pub station: String,
}

/// A decoded federation message. One variant per wire message type in the
/// protocol table; the `data` JSON shape for each is defined by the
/// corresponding struct/enum above.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Advertises a newly stored scanline.
    Have(HaveData),
    /// Periodic liveness announcement.
    Heartbeat(HeartbeatData),
    /// A client's request for something.
    Request(RequestKind),
    /// A bare liveness probe.
    Ping,
    /// Acknowledge-only notice; its data is not interpreted.
    Notice(serde_json::Value),
    /// The binary scanline payload reply.
    Scanline(Bytes),
    /// "No such scanline" reply.
    Missing,
    /// Reply to `ping`.
    Pong(PongData),
    /// Reply to `notice`.
    Ack,
    /// Reply to any unrecognized request type.
    Unknown,
    /// Reply to a request that failed to decode or caused an internal error.
    Error,
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Self::Have(_) => "have",
            Self::Heartbeat(_) => "heartbeat",
            Self::Request(_) => "request",
            Self::Ping => "ping",
            Self::Notice(_) => "notice",
            Self::Scanline(_) => "scanline",
            Self::Missing => "missing",
            Self::Pong(_) => "pong",
            Self::Ack => "ack",
            Self::Unknown => "unknown",
            Self::Error => "error",
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self, Self::Scanline(_))
    }

    fn data_value(&self) -> Result<serde_json::Value, ProtocolError> {
        match self {
            Self::Have(d) => to_value(d),
            Self::Heartbeat(d) => to_value(d),
            Self::Request(r) => to_value(r),
            Self::Notice(v) => Ok(v.clone()),
            Self::Pong(d) => to_value(d),
            Self::Ping | Self::Scanline(_) | Self::Missing | Self::Ack | Self::Unknown | Self::Error => {
                Ok(serde_json::Value::Null)
            },
        }
    }

    fn binary_payload(&self) -> Option<Bytes> {
        match self {
            Self::Scanline(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn from_wire(kind: &str, data: serde_json::Value, payload: Option<Bytes>) -> Result<Self, ProtocolError> {
        Ok(match kind {
            "have" => Self::Have(from_value(data)?),
            "heartbeat" => Self::Heartbeat(from_value(data)?),
            "request" => Self::Request(from_value(data)?),
            "ping" => Self::Ping,
            "notice" => Self::Notice(data),
            "scanline" => Self::Scanline(payload.unwrap_or_default()),
            "missing" => Self::Missing,
            "pong" => Self::Pong(from_value(data)?),
            "ack" => Self::Ack,
            "unknown" => Self::Unknown,
            "error" => Self::Error,
            other => return Err(ProtocolError::EnvelopeDecode(format!("unrecognized message type '{other}'"))),
        })
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::EnvelopeDecode(e.to_string()))
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    subject: String,
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
    sender: String,
    timestamp: DateTime<Utc>,
    binary: bool,
}

/// A fully addressed message: the envelope fields plus the typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `/oper/polar/direct_readout/<station>`.
    pub subject: String,
    /// Identifies the sending component (free-form, used for logging).
    pub sender: String,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// The typed message payload.
    pub message: Message,
}

impl Envelope {
    /// Build a new envelope.
    pub fn new(subject: impl Into<String>, sender: impl Into<String>, timestamp: DateTime<Utc>, message: Message) -> Self {
        Self { subject: subject.into(), sender: sender.into(), timestamp, message }
    }

    /// Encode to `[header_len: u32 BE][header JSON][payload_len: u32 BE][payload bytes]`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = WireHeader {
            subject: self.subject.clone(),
            kind: self.message.kind().to_string(),
            data: self.message.data_value()?,
            sender: self.sender.clone(),
            timestamp: self.timestamp,
            binary: self.message.is_binary(),
        };
        let header_bytes =
            serde_json::to_vec(&header).map_err(|e| ProtocolError::EnvelopeDecode(e.to_string()))?;
        let payload = self.message.binary_payload().unwrap_or_default();

        let mut out = Vec::with_capacity(8 + header_bytes.len() + payload.len());
        out.extend_from_slice(&u32::try_from(header_bytes.len()).unwrap_or(u32::MAX).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a complete, self-contained buffer produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut pos = 0usize;
        let header_len = read_u32(buf, &mut pos)? as usize;
        let header_bytes = take(buf, &mut pos, header_len)?;
        let header: WireHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| ProtocolError::EnvelopeDecode(e.to_string()))?;

        let payload_len = read_u32(buf, &mut pos)? as usize;
        let payload_bytes = take(buf, &mut pos, payload_len)?;
        let payload = if payload_len > 0 { Some(Bytes::copy_from_slice(payload_bytes)) } else { None };

        let message = Message::from_wire(&header.kind, header.data, payload)?;
        Ok(Self { subject: header.subject, sender: header.sender, timestamp: header.timestamp, message })
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::EnvelopeDecode(e.to_string()))
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, ProtocolError> {
    let bytes = take(buf, pos, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ProtocolError> {
    if buf.len() < *pos + len {
        return Err(ProtocolError::TruncatedPayload { expected: *pos + len, actual: buf.len() });
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}
