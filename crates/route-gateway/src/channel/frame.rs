//! Newline-delimited JSON framing.

use crate::domain::correlation::CorrelationId;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// One outbound message, already serialized.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Request this frame belongs to (logging only)
    pub id: CorrelationId,
    /// Connection epoch the submitter last observed. Frames from an older
    /// epoch belong to requests that were already failed and are dropped.
    pub epoch: u64,
    /// Past this instant the request has been answered with a timeout and
    /// the frame is no longer written.
    pub deadline: Instant,
    /// JSON text without the trailing newline
    pub line: Vec<u8>,
}

/// Why a frame could not be read.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    TooLarge(usize),
}

/// Read the next non-empty line, without its terminator.
///
/// Cancel safe: partially read bytes stay in `buf` and the next call picks
/// up where the last one stopped. Returns `Ok(None)` on end of stream; a
/// trailing unterminated fragment is discarded.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> Result<Option<Vec<u8>>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let budget = (max_len + 1).saturating_sub(buf.len()) as u64;
        let read = (&mut *reader)
            .take(budget)
            .read_until(b'\n', buf)
            .await
            .map_err(ReadError::Io)?;

        if buf.last() == Some(&b'\n') {
            let mut line = std::mem::take(buf);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line));
        }

        if buf.len() > max_len {
            return Err(ReadError::TooLarge(max_len));
        }

        if read == 0 {
            buf.clear();
            return Ok(None);
        }
    }
}

/// Write one frame followed by a newline.
pub async fn write_frame<W>(writer: &mut W, line: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
