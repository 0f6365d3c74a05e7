//! Framed read/write helpers shared by every TCP endpoint in this server:
//! the mirror watcher's subscriber and request sockets, and the request
//! manager's reply socket. [`orbrelay_proto::Envelope::encode`] already
//! produces a self-describing buffer (length-prefixed header, then
//! length-prefixed optional binary payload); [`read_envelope`] is the
//! streaming counterpart that reads exactly one such buffer off an
//! `AsyncRead` without needing the whole connection buffered up front.

use orbrelay_proto::{Envelope, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read exactly one encoded [`Envelope`] from `reader`.
pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Envelope> {
    let header_len = read_u32(reader).await? as usize;
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).await?;

    let payload_len = read_u32(reader).await? as usize;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    let mut full = Vec::with_capacity(8 + header.len() + payload.len());
    full.extend_from_slice(&u32::try_from(header.len()).unwrap_or(u32::MAX).to_be_bytes());
    full.extend_from_slice(&header);
    full.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_be_bytes());
    full.extend_from_slice(&payload);

    Envelope::decode(&full).map_err(protocol_to_io)
}

/// Write one encoded [`Envelope`] to `writer`.
pub async fn write_envelope<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> std::io::Result<()> {
    let encoded = envelope.encode().map_err(protocol_to_io)?;
    writer.write_all(&encoded).await
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

fn protocol_to_io(error: ProtocolError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orbrelay_proto::Message;

    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let envelope = Envelope::new("subj", "sender", Utc::now(), Message::Ping);
        let mut buf = Vec::new();
        write_envelope(&mut buf, &envelope).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_envelope(&mut cursor).await.unwrap();
        assert_eq!(decoded.message, Message::Ping);
        assert_eq!(decoded.subject, "subj");
    }
}
