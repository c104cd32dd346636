//! Connection negotiation state machine for channel 0.
//!
//! Drives the fixed sequence from byte-stream connect to Ready:
//!
//! ```text
//! ┌──────────────┐ connect  ┌───────────────┐ Start    ┌──────────────┐
//! │ Disconnected │─────────>│ AwaitingStart │─────────>│ AwaitingTune │
//! └──────────────┘ preamble └───────────────┘ StartOk  └──────┬───────┘
//!                                                 Tune        │
//!                                          TuneOk + Open      │
//!                           ┌───────┐ OpenOk  ┌───────────────▼┐
//!                           │ Ready │<────────│ AwaitingOpenOk │
//!                           └───────┘         └────────────────┘
//! ```
//!
//! The machine is pure: inbound methods go in, submission batches come out,
//! and the driver pushes them through the synchronous call gate. Channel-0
//! methods that do not match the current phase are logged and dropped,
//! non-fatal.

use crate::codec::{encode_amqplain, PROTOCOL_HEADER};
use crate::error::Result;
use crate::protocol::{FieldTable, FieldValue, Frame, Method, CONTROL_CHANNEL};

/// Authentication mechanism offered in `start-ok`.
const AUTH_MECHANISM: &str = "AMQPLAIN";

/// Locale offered in `start-ok`.
const LOCALE: &str = "en_US";

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No transport yet.
    Disconnected,
    /// Preamble sent, waiting for `connection.start`.
    AwaitingStart,
    /// `start-ok` sent, waiting for `connection.tune`.
    AwaitingTune,
    /// `tune-ok` + `open` sent, waiting for `connection.open-ok`.
    AwaitingOpenOk,
    /// Negotiation complete.
    Ready,
}

/// Result of offering an inbound control method to the machine.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Submit this batch (in order, as one submission) through the gate.
    Send(Vec<Frame>),
    /// Negotiation finished; fire the startup hooks.
    Ready,
    /// Not a recognized transition for the current phase; already logged.
    Ignored,
}

/// Handshake state machine.
pub struct Handshake {
    phase: HandshakePhase,
    username: String,
    password: String,
    virtual_host: String,
    frame_max: u32,
    negotiated_frame_max: u32,
    negotiated_heartbeat: u16,
}

impl Handshake {
    /// Create a machine in [`HandshakePhase::Disconnected`].
    pub fn new(username: String, password: String, virtual_host: String, frame_max: u32) -> Self {
        Self {
            phase: HandshakePhase::Disconnected,
            username,
            password,
            virtual_host,
            frame_max,
            negotiated_frame_max: frame_max,
            negotiated_heartbeat: 0,
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Frame-max in effect after `tune`.
    pub fn negotiated_frame_max(&self) -> u32 {
        self.negotiated_frame_max
    }

    /// Heartbeat interval in effect after `tune` (always 0: disabled).
    pub fn negotiated_heartbeat(&self) -> u16 {
        self.negotiated_heartbeat
    }

    /// Transport connected: returns the protocol preamble to write raw
    /// (before any frame) and moves to [`HandshakePhase::AwaitingStart`].
    pub fn on_connected(&mut self) -> &'static [u8] {
        self.phase = HandshakePhase::AwaitingStart;
        &PROTOCOL_HEADER
    }

    /// Offer an inbound channel-0 method to the machine.
    pub fn on_method(&mut self, method: &Method) -> Result<HandshakeStep> {
        match (self.phase, method) {
            (HandshakePhase::AwaitingStart, Method::ConnectionStart { version_major, version_minor, .. }) => {
                tracing::debug!(
                    version = format!("{}-{}", version_major, version_minor),
                    "broker opened negotiation"
                );
                let start_ok = Method::ConnectionStartOk {
                    client_properties: client_properties(),
                    mechanism: AUTH_MECHANISM.to_string(),
                    response: encode_amqplain(&self.username, &self.password)?,
                    locale: LOCALE.to_string(),
                };
                self.phase = HandshakePhase::AwaitingTune;
                Ok(HandshakeStep::Send(vec![Frame::method(CONTROL_CHANNEL, start_ok)]))
            }

            (HandshakePhase::AwaitingTune, Method::ConnectionTune { channel_max, frame_max, heartbeat }) => {
                tracing::debug!(channel_max, frame_max, heartbeat, "broker proposed limits");
                // Fixed counter-offer: unlimited channels, our frame-max,
                // heartbeats disabled.
                self.negotiated_frame_max = self.frame_max;
                self.negotiated_heartbeat = 0;
                let tune_ok = Method::ConnectionTuneOk {
                    channel_max: 0,
                    frame_max: self.frame_max,
                    heartbeat: 0,
                };
                let open = Method::ConnectionOpen {
                    virtual_host: self.virtual_host.clone(),
                    capabilities: String::new(),
                    insist: true,
                };
                self.phase = HandshakePhase::AwaitingOpenOk;
                // One submission batch: tune-ok must precede open on the wire.
                Ok(HandshakeStep::Send(vec![
                    Frame::method(CONTROL_CHANNEL, tune_ok),
                    Frame::method(CONTROL_CHANNEL, open),
                ]))
            }

            (HandshakePhase::AwaitingOpenOk, Method::ConnectionOpenOk { .. }) => {
                tracing::debug!(virtual_host = %self.virtual_host, "connection ready");
                self.phase = HandshakePhase::Ready;
                Ok(HandshakeStep::Ready)
            }

            (phase, method) => {
                tracing::warn!(
                    ?phase,
                    method = ?method.kind(),
                    "unhandled control-channel method, dropping"
                );
                Ok(HandshakeStep::Ignored)
            }
        }
    }
}

fn client_properties() -> FieldTable {
    vec![
        (
            "product".to_string(),
            FieldValue::LongString(env!("CARGO_PKG_NAME").to_string()),
        ),
        (
            "version".to_string(),
            FieldValue::LongString(env!("CARGO_PKG_VERSION").to_string()),
        ),
        (
            "platform".to_string(),
            FieldValue::LongString("Rust".to_string()),
        ),
        ("capabilities".to_string(), FieldValue::Table(Vec::new())),
    ]
}
