//! Connection builder and session task.
//!
//! The [`ConnectionBuilder`] provides a fluent API for configuring the
//! connection, then `connect()` runs the lifecycle:
//! 1. Open the TCP transport and split it
//! 2. Spawn the writer task on the write half
//! 3. Queue the protocol preamble and spawn the session task
//!
//! The session task is the sole owner of the [`Engine`]: it multiplexes
//! socket reads against commands from [`Connection`] handles, so all
//! connection state is mutated from one place without locks.
//!
//! # Example
//!
//! ```ignore
//! use amqpwire::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::builder()
//!         .host("localhost")
//!         .credentials("guest", "guest")
//!         .virtual_host("/")
//!         .on_startup(|| tracing::info!("negotiated"))
//!         .connect()
//!         .await?;
//!
//!     let channel = connection.open_channel(1).await?;
//!     connection.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use bytes::Bytes;

use crate::error::{AmqpwireError, Result};
use crate::protocol::Frame;
use crate::session::{ChannelHandle, Engine, SessionConfig, SubmitOptions};
use crate::transport::tcp_connect;
use crate::writer::spawn_writer_task;

/// Default AMQP port.
pub const DEFAULT_PORT: u16 = 5672;

/// Commands a [`Connection`] handle sends to the session task.
enum Command {
    Submit {
        options: SubmitOptions,
        frames: Vec<Frame>,
    },
    OpenChannel {
        id: u16,
        reply: oneshot::Sender<Option<ChannelHandle>>,
    },
}

/// Builder for configuring and opening a connection.
pub struct ConnectionBuilder {
    host: Option<String>,
    port: u16,
    config: SessionConfig,
    startup_hooks: Vec<Box<dyn FnMut() + Send>>,
}

impl ConnectionBuilder {
    /// Create a builder with default settings (guest credentials, vhost "/").
    pub fn new() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            config: SessionConfig::default(),
            startup_hooks: Vec::new(),
        }
    }

    /// Set the broker host. Required.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the broker port. Default: 5672.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credentials for AMQPLAIN authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Set the virtual host to open. Default: "/".
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.config.virtual_host = virtual_host.into();
        self
    }

    /// Set the frame-max offered during tuning. Default: 131072.
    pub fn frame_max(mut self, frame_max: u32) -> Self {
        self.config.frame_max = frame_max;
        self
    }

    /// Register a hook to run on the session task when negotiation
    /// completes. Hooks run in registration order.
    pub fn on_startup(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.startup_hooks.push(Box::new(hook));
        self
    }

    /// Open the transport and start the connection.
    ///
    /// Fails fast with [`AmqpwireError::Config`] if no host was set;
    /// otherwise returns once the TCP connection is established. Negotiation
    /// proceeds on the session task; use [`ConnectionBuilder::on_startup`] to
    /// observe its completion.
    pub async fn connect(self) -> Result<Connection> {
        let host = self
            .host
            .ok_or_else(|| AmqpwireError::Config("no host configured".to_string()))?;

        let (reader, write_half) = tcp_connect(&host, self.port).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer_task = spawn_writer_task(write_half, outbound_rx);

        let mut engine = Engine::new(self.config, outbound_tx);
        for hook in self.startup_hooks {
            engine.on_startup(hook);
        }
        engine.on_connected();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Err(error) = session_loop(reader, engine, command_rx).await {
                tracing::error!(%error, "session ended with error");
            }
            let _ = shutdown_tx.send(());
        });

        Ok(Connection {
            commands: command_tx,
            shutdown_rx,
            _writer_task: writer_task,
        })
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Session loop - multiplexes socket reads against handle commands.
async fn session_loop<R>(
    mut reader: R,
    mut engine: Engine,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        tracing::debug!("transport closed by peer");
                        return Ok(());
                    }
                    Ok(n) => engine.on_bytes(&buf[..n])?,
                    Err(e) => return Err(AmqpwireError::Io(e)),
                }
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Submit { options, frames }) => {
                        engine.submit(options, frames);
                    }
                    Some(Command::OpenChannel { id, reply }) => {
                        let _ = reply.send(engine.open_channel(id));
                    }
                    None => {
                        tracing::debug!("all connection handles dropped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// A running connection.
pub struct Connection {
    /// Command channel to the session task.
    commands: mpsc::UnboundedSender<Command>,
    /// Shutdown signal receiver.
    shutdown_rx: oneshot::Receiver<()>,
    /// Writer task handle.
    _writer_task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Submit an ordered batch of frames for transmission.
    ///
    /// Synchronous frames go through the call gate and may be deferred
    /// behind an outstanding call; use
    /// [`SubmitOptions::with_on_complete`] to observe completion.
    pub fn submit(&self, options: SubmitOptions, frames: Vec<Frame>) -> Result<()> {
        self.commands
            .send(Command::Submit { options, frames })
            .map_err(|_| AmqpwireError::ConnectionClosed)
    }

    /// Open channel `id`, issuing `channel.open` if the session has not seen
    /// the channel before, and return its collaborator handle.
    ///
    /// Handles are single-owner, not aliased: unlike clients where repeated
    /// lookups of a channel id return the same shared object, the receiving
    /// end of a channel can be claimed exactly once. The session still keeps
    /// one entry per id and never issues a second `channel.open`.
    ///
    /// # Errors
    ///
    /// [`AmqpwireError::ChannelInUse`] if the handle for this id was already
    /// claimed; [`AmqpwireError::ConnectionClosed`] if the session is gone.
    pub async fn open_channel(&self, id: u16) -> Result<ChannelHandle> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::OpenChannel { id, reply: reply_tx })
            .map_err(|_| AmqpwireError::ConnectionClosed)?;

        match reply_rx.await {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => Err(AmqpwireError::ChannelInUse(id)),
            Err(_) => Err(AmqpwireError::ConnectionClosed),
        }
    }

    /// Wait for the session to end (transport close or protocol error).
    ///
    /// Consumes the connection.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let _ = self.shutdown_rx.await;
        Ok(())
    }
}
