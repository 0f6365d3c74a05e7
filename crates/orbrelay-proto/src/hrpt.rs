//! HRPT frame decoding.
//!
//! Each HRPT frame is a fixed-size, big-endian 16-bit-word record. Only a
//! handful of header fields are meaningful to this parser (`frame_sync`,
//! `id`, `timecode`, `aux_sync`); the rest of the record — telemetry,
//! back-scan, space data, TIP data, and the image itself — is opaque and
//! passed through verbatim as part of the scanline's payload bytes.

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::ProtocolError;

/// Bytes in one HRPT frame: 11,090 big-endian 16-bit words.
pub const LINE_SIZE: usize = 11_090 * 2;

/// Expected `frame_sync` prefix (6 words).
const FRAME_SYNC_START: [u16; 6] = [644, 367, 860, 413, 527, 149];

/// Expected `aux_sync` trailer (100 words), reproduced bit-exact from the
/// format this implementation is wire-compatible with.
#[rustfmt::skip]
const AUX_SYNC: [u16; 100] = [
    994, 1011, 437, 701, 644, 277, 452, 467, 833, 224,
    694, 990, 220, 409, 1010, 403, 654, 105, 62, 867,
    75, 149, 320, 725, 668, 581, 866, 109, 166, 941,
    1022, 59, 989, 182, 461, 197, 751, 359, 704, 66,
    387, 238, 850, 746, 473, 573, 282, 6, 212, 169, 623,
    761, 979, 338, 249, 448, 331, 911, 853, 536, 323,
    703, 712, 370, 30, 900, 527, 977, 286, 158, 26, 796,
    705, 100, 432, 515, 633, 77, 65, 489, 186, 101, 406,
    560, 148, 358, 742, 113, 878, 453, 501, 882, 525,
    925, 377, 324, 589, 594, 496, 972,
];

/// Length in bytes of the `aux_sync` trailer (100 words).
const AUX_SYNC_BYTES: usize = 100 * 2;

/// The leading portion of a frame this parser actually decodes: the
/// `frame_sync` prefix, the `id` block, and the `timecode`. Everything after
/// this is opaque and addressed by byte offset instead of being named here.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct FrameHead {
    frame_sync: [[u8; 2]; 6],
    id: [[u8; 2]; 2],
    timecode: [[u8; 2]; 4],
}

impl FrameHead {
    fn frame_sync_words(&self) -> [u16; 6] {
        self.frame_sync.map(u16::from_be_bytes)
    }

    fn id_word(&self) -> u16 {
        u16::from_be_bytes(self.id[0])
    }

    fn timecode_words(&self) -> [u16; 4] {
        self.timecode.map(u16::from_be_bytes)
    }
}

/// Fixed satellite-id table: bits 3–6 of the `id` word map to a satellite name.
fn satellite_name(code: u8) -> Option<&'static str> {
    match code {
        7 => Some("NOAA 15"),
        3 => Some("NOAA 16"),
        13 => Some("NOAA 18"),
        15 => Some("NOAA 19"),
        _ => None,
    }
}

/// Decode the four `timecode` words into `(day, milliseconds)`.
pub fn decode_timecode(words: [u16; 4]) -> (u16, u32) {
    let day = words[0];
    let msecs = ((u32::from(words[1]) & 0x7F) << 20)
        | ((u32::from(words[2]) & 0x3FF) << 10)
        | (u32::from(words[3]) & 0x3FF);
    (day, msecs)
}

/// Encode `(day, milliseconds)` into the four `timecode` words. Inverse of
/// [`decode_timecode`] for `msecs` values that fit in 27 bits (true of every
/// value in a day, which is at most `86_399_999`).
pub fn encode_timecode(day: u16, msecs: u32) -> [u16; 4] {
    let w1 = ((msecs >> 20) & 0x7F) as u16;
    let w2 = ((msecs >> 10) & 0x3FF) as u16;
    let w3 = (msecs & 0x3FF) as u16;
    [day, w1, w2, w3]
}

/// Resolve a `(day, msecs)` timecode to a UTC instant, given the clock at
/// ingest time. Tries the current year first, then the previous year if the
/// result would otherwise be in the future (year wrap at the turn of January).
fn resolve_timestamp(day: u16, msecs: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let offset = Duration::days(i64::from(day) / 2 - 1) + Duration::milliseconds(i64::from(msecs));
    let candidate = |year: i32| Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single().map(|base| base + offset);

    let this_year = candidate(now.year())?;
    if this_year > now { candidate(now.year() - 1) } else { Some(this_year) }
}

use chrono::Datelike;

/// One decoded, addressable unit of HRPT data.
#[derive(Debug, Clone, PartialEq)]
pub struct Scanline {
    /// Satellite name, e.g. `"NOAA 15"`.
    pub satellite: String,
    /// UTC instant the scanline was observed, millisecond resolution.
    pub timestamp: DateTime<Utc>,
    /// Elevation above horizon in degrees, from the injected collaborator.
    pub elevation: f64,
    /// The raw 22,180-byte frame, passed through verbatim.
    pub data: Bytes,
}

/// Collaborator that computes elevation for a given satellite and instant.
/// Injected so the parser stays a pure function of its inputs; production
/// code supplies orbital geometry, tests supply a fixed or pseudo-random
/// stub.
pub trait Elevation: Send + Sync {
    /// Degrees above horizon at the receiving station at `timestamp`.
    fn elevation(&self, satellite: &str, timestamp: DateTime<Utc>) -> f64;
}

/// Elevation stub returning a fixed value, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct ConstantElevation(pub f64);

impl Elevation for ConstantElevation {
    fn elevation(&self, _satellite: &str, _timestamp: DateTime<Utc>) -> f64 {
        self.0
    }
}

/// Decodes a byte stream into scanlines. Stateless: every call is a pure
/// function of its arguments, so the File Tailer (which owns the per-path
/// offset) can call it freely without the parser retaining anything between
/// calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct HrptReader;

impl HrptReader {
    /// Always accepts once there is at least one full frame's worth of data;
    /// matches the registration-order probing described for the File Tailer.
    #[must_use]
    pub fn probe(data: &[u8]) -> bool {
        data.len() >= LINE_SIZE
    }

    /// Decode as many complete frames as `data` holds, starting at its
    /// beginning (the caller is responsible for slicing from its recorded
    /// offset before calling). Returns the decoded scanlines in order and the
    /// number of bytes consumed — always a multiple of [`LINE_SIZE`].
    ///
    /// Frames that fail the integrity check or carry an unrecognized
    /// satellite id are skipped but still consumed; a trailing partial frame
    /// is never consumed.
    pub fn read(&self, data: &[u8], now: DateTime<Utc>, elevation: &dyn Elevation) -> (Vec<Scanline>, usize) {
        let frame_count = data.len() / LINE_SIZE;
        let mut scanlines = Vec::new();

        for i in 0..frame_count {
            let frame = &data[i * LINE_SIZE..(i + 1) * LINE_SIZE];
            if let Some(scanline) = self.decode_frame(frame, now, elevation) {
                scanlines.push(scanline);
            }
        }

        (scanlines, frame_count * LINE_SIZE)
    }

    fn decode_frame(&self, frame: &[u8], now: DateTime<Utc>, elevation: &dyn Elevation) -> Option<Scanline> {
        let head = FrameHead::ref_from_bytes(&frame[..std::mem::size_of::<FrameHead>()]).ok()?;

        if head.frame_sync_words() != FRAME_SYNC_START {
            tracing::info!(error = %ProtocolError::FrameIntegrityFailure, "frame_sync mismatch, skipping frame");
            return None;
        }

        let aux_sync_offset = LINE_SIZE - AUX_SYNC_BYTES;
        let aux_sync_matches = frame[aux_sync_offset..]
            .chunks_exact(2)
            .zip(AUX_SYNC.iter())
            .all(|(chunk, expected)| u16::from_be_bytes([chunk[0], chunk[1]]) == *expected);
        if !aux_sync_matches {
            tracing::info!(error = %ProtocolError::FrameIntegrityFailure, "aux_sync mismatch, skipping frame");
            return None;
        }

        let satellite_code = ((head.id_word() >> 3) & 0xF) as u8;
        let satellite = match satellite_name(satellite_code) {
            Some(satellite) => satellite,
            None => {
                tracing::info!(error = %ProtocolError::UnknownSatelliteCode(satellite_code), "skipping frame");
                return None;
            },
        };

        let (day, msecs) = decode_timecode(head.timecode_words());
        let timestamp = resolve_timestamp(day, msecs, now)?;

        let elev = elevation.elevation(satellite, timestamp);

        Some(Scanline { satellite: satellite.to_string(), timestamp, elevation: elev, data: Bytes::copy_from_slice(frame) })
    }
}

/// The CADU format reader. Reproduced from the station software this system
/// is wire-compatible with, which never recognized CADU data — it exists
/// solely so format probing has more than one candidate to try in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaduReader;

impl CaduReader {
    /// Never accepts; CADU decoding was never implemented upstream either.
    #[must_use]
    pub fn probe(_data: &[u8]) -> bool {
        false
    }
}
