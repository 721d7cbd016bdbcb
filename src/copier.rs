//! Chunked stream copy used by the paced downloader.
//!
//! A batch is a bounded number of buffer-sized read/write pairs. The copier
//! knows nothing about time or rates; pacing lives in [`crate::downloader`].
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What a single call to [`copy_chunks`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Bytes read from the source and written to the sink in this batch.
    pub bytes_moved: u64,
    /// Whether a read returned zero bytes, i.e. the source is at end of stream.
    pub exhausted: bool,
}

/// Copies up to `chunk_limit` reads of at most `buffer.len()` bytes from
/// `reader` into `writer`.
///
/// Stops early as soon as a read returns zero bytes. Neither stream is closed
/// or flushed; the caller owns both. Any I/O error is returned as is and the
/// bytes already written in this batch are not reported.
pub async fn copy_chunks<R, W>(
    reader: &mut R,
    buffer: &mut [u8],
    writer: &mut W,
    chunk_limit: usize,
) -> std::io::Result<BatchOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut outcome = BatchOutcome::default();

    for _ in 0..chunk_limit {
        let read = reader.read(buffer).await?;
        if read == 0 {
            outcome.exhausted = true;
            break;
        }

        writer.write_all(&buffer[..read]).await?;
        outcome.bytes_moved += read as u64;
    }

    Ok(outcome)
}
