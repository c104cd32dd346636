//! Transport module - TCP socket setup.

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::Result;

/// Connect to the broker and split the stream into independently owned
/// halves: the session task reads, the writer task writes.
pub async fn tcp_connect(host: &str, port: u16) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(host, port, "transport connected");
    Ok(stream.into_split())
}
