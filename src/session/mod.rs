//! Session module - the connection-level engine.
//!
//! Everything here runs on the single session task that owns a connection's
//! state; none of it takes locks:
//!
//! - [`SyncGate`] - serializes synchronous remote calls and replays deferred
//!   sends
//! - [`Handshake`] - drives connection negotiation on channel 0
//! - [`ChannelRegistry`] - maps channel ids to collaborator routing targets
//! - [`Engine`] - the frame dispatcher tying the three together

mod channels;
mod engine;
mod gate;
mod handshake;

pub use channels::{ChannelHandle, ChannelRegistry};
pub use engine::{Engine, SessionConfig};
pub use gate::{SubmitOptions, SyncGate};
pub use handshake::{Handshake, HandshakePhase, HandshakeStep};
