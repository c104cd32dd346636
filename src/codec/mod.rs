//! Codec module - wire encoding and incremental frame extraction.
//!
//! Implements the AMQP 0-9-1 wire grammar this engine needs:
//!
//! - [`wire`] - frame layout, method argument marshaling, field tables,
//!   the AMQPLAIN credential blob, protocol preamble
//! - [`FrameBuffer`] - accumulator turning raw socket chunks into complete
//!   [`Frame`](crate::protocol::Frame)s, tolerant of arbitrary fragmentation
//!
//! # Example
//!
//! ```
//! use amqpwire::codec::{encode_frame, FrameBuffer};
//! use amqpwire::protocol::Frame;
//!
//! let bytes = encode_frame(&Frame::heartbeat()).unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//! assert_eq!(frames, vec![Frame::heartbeat()]);
//! ```

mod frame_buffer;
pub mod wire;

pub use frame_buffer::FrameBuffer;
pub use wire::{
    decode_method, encode_amqplain, encode_frame, encode_method, DEFAULT_FRAME_MAX, FRAME_END,
    FRAME_HEADER_SIZE, PROTOCOL_HEADER,
};
