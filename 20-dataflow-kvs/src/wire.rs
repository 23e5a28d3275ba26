//! Newline-delimited JSON framing for [`Envelope`]s.
//!
//! One envelope per line keeps the wire readable with netcat:
//!
//! ```text
//! {"from":"127.0.0.1:7001","to":"127.0.0.1:7000","relation":"kvput","tuples":[["127.0.0.1:7000","k","v"]]}
//! ```

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::Envelope;

/// Longest line accepted from a peer, newline included.
pub const MAX_FRAME: u64 = 16 * 1024 * 1024;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reads the next envelope, skipping blank lines. `Ok(None)` at end of stream.
/// A line longer than `limit` bytes fails with `InvalidData` before it is
/// buffered in full.
pub async fn read_envelope<R>(reader: &mut R, limit: u64) -> io::Result<Option<Envelope>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader).take(limit).read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && read as u64 >= limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame longer than {limit} bytes"),
            ));
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return serde_json::from_str(trimmed).map(Some).map_err(invalid);
    }
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(envelope).map_err(invalid)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

fn invalid(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn envelopes_survive_the_wire() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let envelope = Envelope {
            from: "127.0.0.1:7001".into(),
            to: "127.0.0.1:7000".into(),
            relation: "kvget".into(),
            tuples: vec![tuple!["127.0.0.1:7000", "127.0.0.1:7001", 1, "k"]],
        };

        write_envelope(&mut writer, &envelope)
            .await
            .expect("write envelope");
        drop(writer);

        let parsed = read_envelope(&mut reader, MAX_FRAME)
            .await
            .expect("read envelope")
            .expect("expected envelope");
        assert_eq!(parsed, envelope);
        assert!(read_envelope(&mut reader, MAX_FRAME).await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_garbage_is_rejected() {
        let input: &[u8] = b"\r\n\nnot json\n";
        let mut reader = BufReader::new(input);
        let err = read_envelope(&mut reader, MAX_FRAME).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_lines_are_cut_off() {
        let mut input = vec![b'x'; 64];
        input.push(b'\n');
        let mut reader = BufReader::new(input.as_slice());
        let err = read_envelope(&mut reader, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("16 bytes"));
    }
}
