//! Frame struct with typed accessors.
//!
//! A [`Frame`] is one decoded protocol unit: a channel id plus a tagged
//! payload. Channel 0 is the control channel; everything else belongs to a
//! channel collaborator. Content payloads use `bytes::Bytes` and stay opaque
//! to the engine (body reassembly is a higher-level concern).
//!
//! # Example
//!
//! ```
//! use amqpwire::protocol::{Frame, Method, MethodKind};
//!
//! let frame = Frame::method(0, Method::ConnectionTuneOk {
//!     channel_max: 0,
//!     frame_max: 131072,
//!     heartbeat: 0,
//! });
//!
//! assert!(frame.is_control());
//! assert_eq!(frame.method_kind(), Some(MethodKind::ConnectionTuneOk));
//! ```

use bytes::Bytes;

use super::method::{Method, MethodKind};

/// Channel 0 carries connection-level (control) traffic only.
pub const CONTROL_CHANNEL: u16 = 0;

/// Tagged frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A decoded class method.
    Method(Method),
    /// Content header, carried opaque (zero-copy via `bytes::Bytes`).
    ContentHeader(Bytes),
    /// Content body, carried opaque.
    ContentBody(Bytes),
    /// Heartbeat, no payload.
    Heartbeat,
}

/// A complete decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to (0 = control channel).
    pub channel: u16,
    /// Tagged payload.
    pub payload: FramePayload,
}

impl Frame {
    /// Create a new frame from channel and payload.
    pub fn new(channel: u16, payload: FramePayload) -> Self {
        Self { channel, payload }
    }

    /// Create a method frame.
    pub fn method(channel: u16, method: Method) -> Self {
        Self {
            channel,
            payload: FramePayload::Method(method),
        }
    }

    /// Create a heartbeat frame on the control channel.
    pub fn heartbeat() -> Self {
        Self {
            channel: CONTROL_CHANNEL,
            payload: FramePayload::Heartbeat,
        }
    }

    /// Check if this frame is on the control channel.
    #[inline]
    pub fn is_control(&self) -> bool {
        self.channel == CONTROL_CHANNEL
    }

    /// Check if this is a method frame.
    #[inline]
    pub fn is_method(&self) -> bool {
        matches!(self.payload, FramePayload::Method(_))
    }

    /// Get the method payload, if this is a method frame.
    pub fn as_method(&self) -> Option<&Method> {
        match &self.payload {
            FramePayload::Method(m) => Some(m),
            _ => None,
        }
    }

    /// Get the method type tag, if this is a method frame.
    pub fn method_kind(&self) -> Option<MethodKind> {
        self.as_method().map(Method::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_frame_accessors() {
        let frame = Frame::method(5, Method::ChannelOpen { out_of_band: String::new() });

        assert_eq!(frame.channel, 5);
        assert!(!frame.is_control());
        assert!(frame.is_method());
        assert_eq!(frame.method_kind(), Some(MethodKind::ChannelOpen));
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = Frame::heartbeat();

        assert!(frame.is_control());
        assert!(!frame.is_method());
        assert_eq!(frame.as_method(), None);
        assert_eq!(frame.method_kind(), None);
    }

    #[test]
    fn test_content_body_is_opaque() {
        let frame = Frame::new(3, FramePayload::ContentBody(Bytes::from_static(b"data")));

        assert!(!frame.is_method());
        assert_eq!(frame.method_kind(), None);
    }
}
