//! # amqpwire
//!
//! AMQP 0-9-1 client connection engine.
//!
//! Covers the connection-level plumbing a client needs before any
//! messaging can happen:
//!
//! - **Framing**: incremental frame extraction from the byte stream and
//!   frame/method encoding ([`codec`], [`protocol`])
//! - **Negotiation**: the channel-0 handshake from preamble to open vhost
//! - **Call gating**: at most one synchronous request outstanding; later
//!   synchronous sends are deferred and replayed in order
//! - **Demultiplexing**: inbound frames routed to per-channel handles
//!
//! ## Example
//!
//! ```ignore
//! use amqpwire::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::builder()
//!         .host("localhost")
//!         .credentials("guest", "guest")
//!         .connect()
//!         .await?;
//!
//!     let mut channel = connection.open_channel(1).await?;
//!     while let Some(frame) = channel.recv().await {
//!         println!("channel 1: {:?}", frame);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

mod connection;
mod writer;

pub use connection::{Connection, ConnectionBuilder, DEFAULT_PORT};
pub use error::{AmqpwireError, Result};
pub use session::{ChannelHandle, Engine, SessionConfig, SubmitOptions};
