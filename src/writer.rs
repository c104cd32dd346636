//! Dedicated writer task for the outbound byte queue.
//!
//! All wire writes for a connection flow through one mpsc channel into a
//! single writer task, so ordering is the channel's ordering and nothing
//! takes a lock on the socket. The engine pushes pre-encoded buffers
//! (preamble or complete frames); the writer batches whatever is ready into
//! one vectored write.
//!
//! ```text
//! Engine ──► mpsc::UnboundedSender<Bytes> ──► Writer Task ──► Socket
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AmqpwireError, Result};

/// Maximum buffers to coalesce into a single write.
const MAX_BATCH_SIZE: usize = 64;

/// Spawn the writer task draining `rx` into `writer`.
///
/// The task ends cleanly when every sender is dropped, or with an error on
/// the first failed write.
pub fn spawn_writer_task<W>(
    writer: W,
    rx: mpsc::UnboundedReceiver<Bytes>,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(rx, writer))
}

async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(bytes) => bytes,
            None => {
                tracing::debug!("outbound queue closed, writer shutting down");
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(bytes) => batch.push(bytes),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch with a single vectored write when the kernel buffer allows,
/// falling back to per-buffer writes for the remainder.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let slices: Vec<IoSlice<'_>> = batch.iter().map(|bytes| IoSlice::new(bytes)).collect();
    let total: usize = batch.iter().map(Bytes::len).sum();

    let written = writer.write_vectored(&slices).await?;
    if written == 0 && total > 0 {
        return Err(AmqpwireError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    if written < total {
        let mut skip = written;
        for chunk in batch {
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            writer.write_all(&chunk[skip..]).await?;
            skip = 0;
        }
    }

    writer.flush().await?;
    Ok(())
}
