//! Protocol module - frame model and method definitions.
//!
//! This module describes the decoded shape of AMQP 0-9-1 traffic:
//! - [`Frame`] with its channel id and tagged payload
//! - [`Method`] payloads for the connection and channel classes
//! - [`MethodSpec`] metadata driving the synchronous-call gate

mod frame;
mod method;

pub use frame::{Frame, FramePayload, CONTROL_CHANNEL};
pub use method::{FieldTable, FieldValue, Method, MethodKind, MethodSpec};
