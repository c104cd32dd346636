//! Connection engine - the per-connection frame dispatcher.
//!
//! The engine is owned by a single session task and never shared, so it
//! holds plain state with no locks. Inbound bytes flow in through
//! [`Engine::on_bytes`]; everything going to the wire leaves as encoded
//! [`Bytes`] on the outbound queue, which the socket writer task drains.
//!
//! Dispatch order per inbound frame:
//! 1. offer it to the [`SyncGate`] (completing an outstanding call flushes
//!    deferred sends)
//! 2. channel 0 methods go to the [`Handshake`] machine
//! 3. everything else routes through the [`ChannelRegistry`]

use bytes::Bytes;
use tokio::sync::mpsc;

use super::channels::{ChannelHandle, ChannelRegistry};
use super::gate::{SubmitOptions, SyncGate};
use super::handshake::{Handshake, HandshakeStep};
use crate::codec::{encode_frame, FrameBuffer, DEFAULT_FRAME_MAX};
use crate::error::Result;
use crate::protocol::{Frame, FramePayload, CONTROL_CHANNEL};

/// Connection-level settings the engine negotiates with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Username for AMQPLAIN authentication.
    pub username: String,
    /// Password for AMQPLAIN authentication.
    pub password: String,
    /// Virtual host to open.
    pub virtual_host: String,
    /// Frame-max offered during tuning.
    pub frame_max: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            frame_max: DEFAULT_FRAME_MAX,
        }
    }
}

/// Hook fired once when negotiation reaches Ready.
pub type StartupHook = Box<dyn FnMut() + Send>;

/// Frame dispatcher for one connection.
pub struct Engine {
    codec: FrameBuffer,
    gate: SyncGate,
    handshake: Handshake,
    channels: ChannelRegistry,
    startup_hooks: Vec<StartupHook>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Engine {
    /// Create an engine writing to `outbound`.
    pub fn new(config: SessionConfig, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            codec: FrameBuffer::with_frame_max(config.frame_max),
            gate: SyncGate::new(),
            handshake: Handshake::new(
                config.username,
                config.password,
                config.virtual_host,
                config.frame_max,
            ),
            channels: ChannelRegistry::new(),
            startup_hooks: Vec::new(),
            outbound,
        }
    }

    /// Register a hook to run when negotiation completes. Hooks run on the
    /// session task, in registration order.
    pub fn on_startup(&mut self, hook: impl FnMut() + Send + 'static) {
        self.startup_hooks.push(Box::new(hook));
    }

    /// Transport established: queue the protocol preamble.
    pub fn on_connected(&mut self) {
        let preamble = self.handshake.on_connected();
        self.send_raw(Bytes::from_static(preamble));
    }

    /// Feed bytes read from the socket through decode and dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte stream is malformed (bad framing or a
    /// method payload that cannot be decoded). The session cannot continue
    /// past such an error.
    pub fn on_bytes(&mut self, data: &[u8]) -> Result<()> {
        for frame in self.codec.push(data)? {
            self.dispatch(frame)?;
        }
        Ok(())
    }

    /// Submit an ordered batch of frames through the gate.
    pub fn submit(&mut self, options: SubmitOptions, frames: Vec<Frame>) {
        let sendable = self.gate.submit(options, frames);
        self.transmit(sendable);
    }

    /// Obtain the collaborator handle for channel `id`, creating the channel
    /// and issuing `channel.open` on first explicit reference.
    ///
    /// Returns `None` if the handle for this id was already claimed.
    pub fn open_channel(&mut self, id: u16) -> Option<ChannelHandle> {
        let (handle, open_frame) = self.channels.open(id);
        if let Some(frame) = open_frame {
            self.submit(SubmitOptions::new(), vec![frame]);
        }
        handle
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        // Gate first: a reply completing the outstanding call may flush
        // deferred submissions, which must hit the wire before anything the
        // frame's own handler produces.
        let flushed = self.gate.on_inbound(&frame);
        self.transmit(flushed);

        if frame.channel == CONTROL_CHANNEL {
            return self.dispatch_control(frame);
        }

        self.channels.route(frame.channel, frame);
        Ok(())
    }

    fn dispatch_control(&mut self, frame: Frame) -> Result<()> {
        let method = match &frame.payload {
            FramePayload::Method(method) => method,
            FramePayload::Heartbeat => {
                tracing::debug!("heartbeat from broker");
                return Ok(());
            }
            other => {
                tracing::warn!(payload = ?other, "content frame on channel 0, dropping");
                return Ok(());
            }
        };

        match self.handshake.on_method(method)? {
            HandshakeStep::Send(frames) => {
                self.submit(SubmitOptions::new(), frames);
            }
            HandshakeStep::Ready => {
                for hook in &mut self.startup_hooks {
                    hook();
                }
            }
            HandshakeStep::Ignored => {}
        }
        Ok(())
    }

    fn transmit(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            match encode_frame(&frame) {
                Ok(bytes) => self.send_raw(bytes),
                Err(error) => {
                    tracing::error!(channel = frame.channel, %error, "failed to encode frame");
                }
            }
        }
    }

    fn send_raw(&mut self, bytes: Bytes) {
        if self.outbound.send(bytes).is_err() {
            tracing::warn!("outbound queue closed, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PROTOCOL_HEADER;
    use crate::protocol::{Method, MethodKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Harness {
        engine: Engine,
        outbound: mpsc::UnboundedReceiver<Bytes>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                engine: Engine::new(SessionConfig::default(), tx),
                outbound: rx,
            }
        }

        /// Decode everything queued for the wire back into frames.
        fn drain_frames(&mut self) -> Vec<Frame> {
            let mut decoder = FrameBuffer::new();
            let mut frames = Vec::new();
            while let Ok(bytes) = self.outbound.try_recv() {
                frames.extend(decoder.push(&bytes).unwrap());
            }
            frames
        }

        fn drain_raw(&mut self) -> Vec<Bytes> {
            let mut out = Vec::new();
            while let Ok(bytes) = self.outbound.try_recv() {
                out.push(bytes);
            }
            out
        }

        /// Feed a broker-side frame into the engine.
        fn feed(&mut self, frame: &Frame) {
            let bytes = encode_frame(frame).unwrap();
            self.engine.on_bytes(&bytes).unwrap();
        }
    }

    fn broker_start() -> Frame {
        Frame::method(
            0,
            Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: Vec::new(),
                mechanisms: "PLAIN AMQPLAIN".to_string(),
                locales: "en_US".to_string(),
            },
        )
    }

    fn broker_tune() -> Frame {
        Frame::method(
            0,
            Method::ConnectionTune {
                channel_max: 2047,
                frame_max: 131072,
                heartbeat: 60,
            },
        )
    }

    fn broker_open_ok() -> Frame {
        Frame::method(
            0,
            Method::ConnectionOpenOk {
                known_hosts: String::new(),
            },
        )
    }

    fn broker_channel_open_ok(channel: u16) -> Frame {
        Frame::method(
            channel,
            Method::ChannelOpenOk {
                channel_id: Vec::new(),
            },
        )
    }

    fn kinds(frames: &[Frame]) -> Vec<MethodKind> {
        frames.iter().filter_map(Frame::method_kind).collect()
    }

    #[test]
    fn test_connect_queues_preamble_raw() {
        let mut h = Harness::new();
        h.engine.on_connected();

        let raw = h.drain_raw();
        assert_eq!(raw, vec![Bytes::from_static(&PROTOCOL_HEADER)]);
    }

    #[test]
    fn test_handshake_drives_full_sequence() {
        let mut h = Harness::new();
        h.engine.on_connected();
        h.drain_raw();

        h.feed(&broker_start());
        assert_eq!(kinds(&h.drain_frames()), vec![MethodKind::ConnectionStartOk]);

        h.feed(&broker_tune());
        assert_eq!(
            kinds(&h.drain_frames()),
            vec![MethodKind::ConnectionTuneOk, MethodKind::ConnectionOpen]
        );

        h.feed(&broker_open_ok());
        assert!(h.drain_frames().is_empty());
    }

    #[test]
    fn test_startup_hooks_fire_once_in_order() {
        let mut h = Harness::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = order.clone();
            h.engine.on_startup(move || order.lock().unwrap().push(tag));
        }

        h.engine.on_connected();
        h.feed(&broker_start());
        h.feed(&broker_tune());
        assert!(order.lock().unwrap().is_empty());

        h.feed(&broker_open_ok());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        // A stray duplicate open-ok is ignored and must not re-fire hooks.
        h.feed(&broker_open_ok());
        assert_eq!(order.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_open_channel_issues_open_and_demuxes() {
        let mut h = Harness::new();
        h.engine.on_connected();
        h.feed(&broker_start());
        h.feed(&broker_tune());
        h.feed(&broker_open_ok());
        h.drain_raw();

        let mut handle = h.engine.open_channel(1).unwrap();
        assert_eq!(kinds(&h.drain_frames()), vec![MethodKind::ChannelOpen]);

        h.feed(&broker_channel_open_ok(1));
        let frame = handle.try_recv().unwrap();
        assert_eq!(frame.method_kind(), Some(MethodKind::ChannelOpenOk));

        // Second claim of the same id fails.
        assert!(h.engine.open_channel(1).is_none());
    }

    #[test]
    fn test_gate_defers_second_channel_open() {
        let mut h = Harness::new();
        h.engine.on_connected();
        h.feed(&broker_start());
        h.feed(&broker_tune());
        h.feed(&broker_open_ok());
        h.drain_raw();

        let mut first = h.engine.open_channel(1).unwrap();
        let mut second = h.engine.open_channel(2).unwrap();

        // Only channel 1's open is on the wire; channel 2's waits.
        assert_eq!(kinds(&h.drain_frames()), vec![MethodKind::ChannelOpen]);

        h.feed(&broker_channel_open_ok(1));
        assert_eq!(kinds(&h.drain_frames()), vec![MethodKind::ChannelOpen]);
        assert!(first.try_recv().is_some());
        assert!(second.try_recv().is_none());

        h.feed(&broker_channel_open_ok(2));
        assert!(second.try_recv().is_some());
    }

    #[test]
    fn test_submit_completion_callback() {
        let mut h = Harness::new();
        h.engine.on_connected();
        h.feed(&broker_start());
        h.feed(&broker_tune());
        h.feed(&broker_open_ok());
        h.drain_raw();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        h.engine.submit(
            SubmitOptions::with_on_complete(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            vec![Frame::method(
                3,
                Method::ChannelOpen {
                    out_of_band: String::new(),
                },
            )],
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        h.feed(&broker_channel_open_ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_stream_is_fatal() {
        let mut h = Harness::new();
        h.engine.on_connected();

        // A frame claiming a payload far beyond frame-max.
        let mut bad = vec![1u8, 0, 0];
        bad.extend_from_slice(&u32::MAX.to_be_bytes());

        assert!(h.engine.on_bytes(&bad).is_err());
    }

    #[test]
    fn test_heartbeat_on_control_channel_ignored() {
        let mut h = Harness::new();
        h.engine.on_connected();
        h.drain_raw();

        h.feed(&Frame::heartbeat());
        assert!(h.drain_raw().is_empty());
    }
}
