//! Wire format encoding and decoding.
//!
//! AMQP 0-9-1 frame layout:
//! ```text
//! ┌──────┬─────────┬─────────┬───────────────┬───────────┐
//! │ Type │ Channel │ Size    │ Payload       │ Frame end │
//! │ u8   │ u16 BE  │ u32 BE  │ `size` octets │ 0xCE      │
//! └──────┴─────────┴─────────┴───────────────┴───────────┘
//! ```
//!
//! Method payloads start with `class-id: u16 BE`, `method-id: u16 BE`,
//! followed by the method's arguments. All multi-byte integers are Big
//! Endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AmqpwireError, Result};
use crate::protocol::{FieldTable, FieldValue, Frame, FramePayload, Method, MethodKind};

/// Protocol preamble sent before any frame: "AMQP" + version 0-9-1.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Frame header size in bytes (type + channel + size).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Sentinel octet terminating every frame.
pub const FRAME_END: u8 = 0xCE;

/// Default maximum frame payload size, also what we offer in `tune-ok`.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Frame type octets.
pub(crate) mod frame_type {
    pub const METHOD: u8 = 1;
    pub const HEADER: u8 = 2;
    pub const BODY: u8 = 3;
    pub const HEARTBEAT: u8 = 8;
}

/// Encode a complete frame to bytes, frame-end octet included.
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let (frame_type, payload) = match &frame.payload {
        FramePayload::Method(method) => (frame_type::METHOD, encode_method(method)?),
        FramePayload::ContentHeader(bytes) => (frame_type::HEADER, bytes.clone()),
        FramePayload::ContentBody(bytes) => (frame_type::BODY, bytes.clone()),
        FramePayload::Heartbeat => (frame_type::HEARTBEAT, Bytes::new()),
    };

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len() + 1);
    buf.put_u8(frame_type);
    buf.put_u16(frame.channel);
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    buf.put_u8(FRAME_END);
    Ok(buf.freeze())
}

/// Encode a method payload (class-id, method-id, arguments).
pub fn encode_method(method: &Method) -> Result<Bytes> {
    let (class_id, method_id) = method.kind().ids();

    let mut buf = BytesMut::with_capacity(64);
    buf.put_u16(class_id);
    buf.put_u16(method_id);

    match method {
        Method::ConnectionStart {
            version_major,
            version_minor,
            server_properties,
            mechanisms,
            locales,
        } => {
            buf.put_u8(*version_major);
            buf.put_u8(*version_minor);
            put_table(&mut buf, server_properties)?;
            put_longstr(&mut buf, mechanisms.as_bytes());
            put_longstr(&mut buf, locales.as_bytes());
        }
        Method::ConnectionStartOk {
            client_properties,
            mechanism,
            response,
            locale,
        } => {
            put_table(&mut buf, client_properties)?;
            put_shortstr(&mut buf, mechanism)?;
            put_longstr(&mut buf, response);
            put_shortstr(&mut buf, locale)?;
        }
        Method::ConnectionTune {
            channel_max,
            frame_max,
            heartbeat,
        }
        | Method::ConnectionTuneOk {
            channel_max,
            frame_max,
            heartbeat,
        } => {
            buf.put_u16(*channel_max);
            buf.put_u32(*frame_max);
            buf.put_u16(*heartbeat);
        }
        Method::ConnectionOpen {
            virtual_host,
            capabilities,
            insist,
        } => {
            put_shortstr(&mut buf, virtual_host)?;
            put_shortstr(&mut buf, capabilities)?;
            buf.put_u8(u8::from(*insist));
        }
        Method::ConnectionOpenOk { known_hosts } => {
            put_shortstr(&mut buf, known_hosts)?;
        }
        Method::ConnectionClose {
            reply_code,
            reply_text,
            class_id,
            method_id,
        }
        | Method::ChannelClose {
            reply_code,
            reply_text,
            class_id,
            method_id,
        } => {
            buf.put_u16(*reply_code);
            put_shortstr(&mut buf, reply_text)?;
            buf.put_u16(*class_id);
            buf.put_u16(*method_id);
        }
        Method::ConnectionCloseOk | Method::ChannelCloseOk => {}
        Method::ChannelOpen { out_of_band } => {
            put_shortstr(&mut buf, out_of_band)?;
        }
        Method::ChannelOpenOk { channel_id } => {
            put_longstr(&mut buf, channel_id);
        }
    }

    Ok(buf.freeze())
}

/// Decode a method payload.
pub fn decode_method(payload: &[u8]) -> Result<Method> {
    let mut dec = Decoder::new(payload);
    let class_id = dec.u16()?;
    let method_id = dec.u16()?;

    let kind = MethodKind::from_ids(class_id, method_id).ok_or_else(|| {
        AmqpwireError::Protocol(format!("unknown method {}.{}", class_id, method_id))
    })?;

    let method = match kind {
        MethodKind::ConnectionStart => Method::ConnectionStart {
            version_major: dec.u8()?,
            version_minor: dec.u8()?,
            server_properties: dec.table()?,
            mechanisms: dec.longstr_utf8()?,
            locales: dec.longstr_utf8()?,
        },
        MethodKind::ConnectionStartOk => Method::ConnectionStartOk {
            client_properties: dec.table()?,
            mechanism: dec.shortstr()?,
            response: dec.longstr()?,
            locale: dec.shortstr()?,
        },
        MethodKind::ConnectionTune => Method::ConnectionTune {
            channel_max: dec.u16()?,
            frame_max: dec.u32()?,
            heartbeat: dec.u16()?,
        },
        MethodKind::ConnectionTuneOk => Method::ConnectionTuneOk {
            channel_max: dec.u16()?,
            frame_max: dec.u32()?,
            heartbeat: dec.u16()?,
        },
        MethodKind::ConnectionOpen => Method::ConnectionOpen {
            virtual_host: dec.shortstr()?,
            capabilities: dec.shortstr()?,
            insist: dec.u8()? & 0x01 != 0,
        },
        MethodKind::ConnectionOpenOk => Method::ConnectionOpenOk {
            known_hosts: dec.shortstr()?,
        },
        MethodKind::ConnectionClose => Method::ConnectionClose {
            reply_code: dec.u16()?,
            reply_text: dec.shortstr()?,
            class_id: dec.u16()?,
            method_id: dec.u16()?,
        },
        MethodKind::ConnectionCloseOk => Method::ConnectionCloseOk,
        MethodKind::ChannelOpen => Method::ChannelOpen {
            out_of_band: dec.shortstr()?,
        },
        MethodKind::ChannelOpenOk => Method::ChannelOpenOk {
            channel_id: dec.longstr()?,
        },
        MethodKind::ChannelClose => Method::ChannelClose {
            reply_code: dec.u16()?,
            reply_text: dec.shortstr()?,
            class_id: dec.u16()?,
            method_id: dec.u16()?,
        },
        MethodKind::ChannelCloseOk => Method::ChannelCloseOk,
    };

    Ok(method)
}

/// Encode an AMQPLAIN security response: field-table *contents* (no length
/// prefix) carrying `LOGIN` and `PASSWORD` long strings.
pub fn encode_amqplain(username: &str, password: &str) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(32 + username.len() + password.len());
    put_shortstr(&mut buf, "LOGIN")?;
    buf.put_u8(b'S');
    put_longstr(&mut buf, username.as_bytes());
    put_shortstr(&mut buf, "PASSWORD")?;
    buf.put_u8(b'S');
    put_longstr(&mut buf, password.as_bytes());
    Ok(buf.to_vec())
}

fn put_shortstr(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.len() > u8::MAX as usize {
        return Err(AmqpwireError::Protocol(format!(
            "short string exceeds 255 bytes: {} bytes",
            s.len()
        )));
    }
    buf.put_u8(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_longstr(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn put_table(buf: &mut BytesMut, table: &FieldTable) -> Result<()> {
    let mut inner = BytesMut::new();
    for (name, value) in table {
        put_shortstr(&mut inner, name)?;
        match value {
            FieldValue::LongString(s) => {
                inner.put_u8(b'S');
                put_longstr(&mut inner, s.as_bytes());
            }
            FieldValue::Long(n) => {
                inner.put_u8(b'I');
                inner.put_i32(*n);
            }
            FieldValue::Bool(b) => {
                inner.put_u8(b't');
                inner.put_u8(u8::from(*b));
            }
            FieldValue::Table(nested) => {
                inner.put_u8(b'F');
                put_table(&mut inner, nested)?;
            }
        }
    }
    buf.put_u32(inner.len() as u32);
    buf.extend_from_slice(&inner);
    Ok(())
}

/// Cursor over a method payload.
struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(AmqpwireError::Protocol(format!(
                "truncated method payload: wanted {} bytes, {} left",
                n,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn shortstr(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AmqpwireError::Protocol("short string is not UTF-8".to_string()))
    }

    fn longstr(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn longstr_utf8(&mut self) -> Result<String> {
        let bytes = self.longstr()?;
        String::from_utf8(bytes)
            .map_err(|_| AmqpwireError::Protocol("long string is not UTF-8".to_string()))
    }

    fn table(&mut self) -> Result<FieldTable> {
        let len = self.u32()? as usize;
        let mut inner = Decoder::new(self.take(len)?);

        let mut table = FieldTable::new();
        while !inner.is_empty() {
            let name = inner.shortstr()?;
            let value = match inner.u8()? {
                b'S' => FieldValue::LongString(inner.longstr_utf8()?),
                b'I' => FieldValue::Long(inner.i32()?),
                b't' => FieldValue::Bool(inner.u8()? != 0),
                b'F' => FieldValue::Table(inner.table()?),
                other => {
                    return Err(AmqpwireError::Protocol(format!(
                        "unsupported field type 0x{:02x} for '{}'",
                        other, name
                    )))
                }
            };
            table.push((name, value));
        }
        Ok(table)
    }
}
