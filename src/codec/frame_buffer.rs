//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a two-state
//! machine for fragmented frames:
//! - `WaitingForHeader`: need the 7-octet frame header
//! - `WaitingForPayload`: header parsed, need `size` payload octets plus the
//!   frame-end octet
//!
//! A frame whose declared size exceeds the configured maximum, or whose end
//! octet is not `0xCE`, is a protocol error: the byte stream cannot be
//! resynchronized past it.

use bytes::BytesMut;

use super::wire::{decode_method, frame_type, FRAME_END, FRAME_HEADER_SIZE};
use crate::error::{AmqpwireError, Result};
use crate::protocol::{Frame, FramePayload};

/// State machine for frame extraction.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete 7-octet header.
    WaitingForHeader,
    /// Header parsed, waiting for payload + frame-end octet.
    WaitingForPayload {
        frame_type: u8,
        channel: u16,
        size: u32,
    },
}

/// Buffer accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame payload size.
    frame_max: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default frame-max (131072).
    pub fn new() -> Self {
        Self::with_frame_max(super::wire::DEFAULT_FRAME_MAX)
    }

    /// Create a new frame buffer with a custom frame-max.
    pub fn with_frame_max(frame_max: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            frame_max,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// May be called with partial or multiple frames' worth of bytes;
    /// fragments are buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error on an oversize declared payload, a bad frame-end
    /// octet, an unknown frame type, or a malformed method payload. The
    /// stream is unusable after any of these.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }

                let frame_type = self.buffer[0];
                let channel = u16::from_be_bytes([self.buffer[1], self.buffer[2]]);
                let size = u32::from_be_bytes([
                    self.buffer[3],
                    self.buffer[4],
                    self.buffer[5],
                    self.buffer[6],
                ]);

                if size > self.frame_max {
                    return Err(AmqpwireError::Protocol(format!(
                        "frame size {} exceeds maximum {}",
                        size, self.frame_max
                    )));
                }

                let _ = self.buffer.split_to(FRAME_HEADER_SIZE);
                self.state = State::WaitingForPayload {
                    frame_type,
                    channel,
                    size,
                };

                self.try_extract_one()
            }

            State::WaitingForPayload {
                frame_type: ftype,
                channel,
                size,
            } => {
                // Payload plus the frame-end octet.
                let needed = size as usize + 1;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let mut chunk = self.buffer.split_to(needed);
                let end = chunk[chunk.len() - 1];
                if end != FRAME_END {
                    return Err(AmqpwireError::Protocol(format!(
                        "bad frame end octet 0x{:02x}",
                        end
                    )));
                }
                chunk.truncate(size as usize);
                let payload = chunk.freeze();

                self.state = State::WaitingForHeader;

                let payload = match ftype {
                    frame_type::METHOD => FramePayload::Method(decode_method(&payload)?),
                    frame_type::HEADER => FramePayload::ContentHeader(payload),
                    frame_type::BODY => FramePayload::ContentBody(payload),
                    frame_type::HEARTBEAT => FramePayload::Heartbeat,
                    other => {
                        return Err(AmqpwireError::Protocol(format!(
                            "unknown frame type {}",
                            other
                        )))
                    }
                };

                Ok(Some(Frame::new(channel, payload)))
            }
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::wire::encode_frame;
    use crate::protocol::Method;
    use bytes::Bytes;

    fn tune_frame() -> Frame {
        Frame::method(
            0,
            Method::ConnectionTune {
                channel_max: 0,
                frame_max: 131072,
                heartbeat: 60,
            },
        )
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = encode_frame(&tune_frame()).unwrap();

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames, vec![tune_frame()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend_from_slice(&encode_frame(&tune_frame()).unwrap());
        combined.extend_from_slice(&encode_frame(&Frame::heartbeat()).unwrap());
        combined.extend_from_slice(
            &encode_frame(&Frame::new(
                7,
                FramePayload::ContentBody(Bytes::from_static(b"body")),
            ))
            .unwrap(),
        );

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], tune_frame());
        assert_eq!(frames[1], Frame::heartbeat());
        assert_eq!(frames[2].channel, 7);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = encode_frame(&tune_frame()).unwrap();

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames, vec![tune_frame()]);
    }

    #[test]
    fn test_fragmented_header_and_payload() {
        let mut buffer = FrameBuffer::new();
        let bytes = encode_frame(&tune_frame()).unwrap();

        assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
        assert!(buffer.push(&bytes[4..FRAME_HEADER_SIZE + 2]).unwrap().is_empty());

        let frames = buffer.push(&bytes[FRAME_HEADER_SIZE + 2..]).unwrap();
        assert_eq!(frames, vec![tune_frame()]);
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let first = encode_frame(&Frame::heartbeat()).unwrap();
        let second = encode_frame(&tune_frame()).unwrap();

        let mut data = first.to_vec();
        data.extend_from_slice(&second[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames, vec![Frame::heartbeat()]);

        let frames = buffer.push(&second[5..]).unwrap();
        assert_eq!(frames, vec![tune_frame()]);
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut buffer = FrameBuffer::with_frame_max(16);

        let mut header = vec![frame_type::BODY, 0, 1];
        header.extend_from_slice(&1000u32.to_be_bytes());

        let err = buffer.push(&header).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_bad_frame_end_rejected() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = encode_frame(&Frame::heartbeat()).unwrap().to_vec();
        *bytes.last_mut().unwrap() = 0x00;

        let err = buffer.push(&bytes).unwrap_err();
        assert!(err.to_string().contains("bad frame end"));
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = vec![9u8, 0, 0]; // type 9 does not exist
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.push(FRAME_END);

        let err = buffer.push(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown frame type"));
    }

    #[test]
    fn test_content_frames_stay_opaque() {
        let mut buffer = FrameBuffer::new();
        let frame = Frame::new(2, FramePayload::ContentHeader(Bytes::from_static(b"\x00\x3c")));
        let bytes = encode_frame(&frame).unwrap();

        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames, vec![frame]);
    }
}
