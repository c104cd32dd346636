//! Method payloads and their metadata.
//!
//! Covers the two classes this engine speaks: `connection` (class 10) and
//! `channel` (class 20). Each [`Method`] variant carries its decoded
//! arguments; [`MethodKind`] is the explicit type tag used to key
//! synchronous-call state, and [`MethodSpec`] tells the gate whether a method
//! is synchronous and which replies legally complete it.

/// Value of a field-table entry.
///
/// Only the subset of AMQP field types this engine produces or expects from
/// brokers: long strings, signed 32-bit integers, booleans, nested tables.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Long string (`S`).
    LongString(String),
    /// Signed 32-bit integer (`I`).
    Long(i32),
    /// Boolean (`t`).
    Bool(bool),
    /// Nested table (`F`).
    Table(FieldTable),
}

/// Ordered field table (order-preserving, unlike a hash map, so encoded
/// output is deterministic).
pub type FieldTable = Vec<(String, FieldValue)>;

/// Explicit type tag for method payloads.
///
/// Replaces identity-of-class keying with a plain enum usable for equality
/// and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    ConnectionStart,
    ConnectionStartOk,
    ConnectionTune,
    ConnectionTuneOk,
    ConnectionOpen,
    ConnectionOpenOk,
    ConnectionClose,
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose,
    ChannelCloseOk,
}

/// Metadata for a method, looked up by its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    /// Whether this method takes part in the synchronous request/reply
    /// discipline.
    pub synchronous: bool,
    /// Method tags that legally complete this request. Empty for replies and
    /// for synchronous methods that expect nothing back.
    pub responses: &'static [MethodKind],
}

impl MethodKind {
    /// Look up the spec for this method tag.
    pub fn spec(self) -> MethodSpec {
        use MethodKind::*;

        match self {
            ConnectionStart => MethodSpec {
                synchronous: true,
                responses: &[ConnectionStartOk],
            },
            ConnectionStartOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
            ConnectionTune => MethodSpec {
                synchronous: true,
                responses: &[ConnectionTuneOk],
            },
            ConnectionTuneOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
            ConnectionOpen => MethodSpec {
                synchronous: true,
                responses: &[ConnectionOpenOk],
            },
            ConnectionOpenOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
            ConnectionClose => MethodSpec {
                synchronous: true,
                responses: &[ConnectionCloseOk],
            },
            ConnectionCloseOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
            ChannelOpen => MethodSpec {
                synchronous: true,
                responses: &[ChannelOpenOk],
            },
            ChannelOpenOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
            ChannelClose => MethodSpec {
                synchronous: true,
                responses: &[ChannelCloseOk],
            },
            ChannelCloseOk => MethodSpec {
                synchronous: true,
                responses: &[],
            },
        }
    }

    /// Wire identifiers `(class-id, method-id)` for this tag.
    pub fn ids(self) -> (u16, u16) {
        use MethodKind::*;

        match self {
            ConnectionStart => (10, 10),
            ConnectionStartOk => (10, 11),
            ConnectionTune => (10, 30),
            ConnectionTuneOk => (10, 31),
            ConnectionOpen => (10, 40),
            ConnectionOpenOk => (10, 41),
            ConnectionClose => (10, 50),
            ConnectionCloseOk => (10, 51),
            ChannelOpen => (20, 10),
            ChannelOpenOk => (20, 11),
            ChannelClose => (20, 40),
            ChannelCloseOk => (20, 41),
        }
    }

    /// Resolve a tag from wire identifiers.
    pub fn from_ids(class_id: u16, method_id: u16) -> Option<Self> {
        use MethodKind::*;

        Some(match (class_id, method_id) {
            (10, 10) => ConnectionStart,
            (10, 11) => ConnectionStartOk,
            (10, 30) => ConnectionTune,
            (10, 31) => ConnectionTuneOk,
            (10, 40) => ConnectionOpen,
            (10, 41) => ConnectionOpenOk,
            (10, 50) => ConnectionClose,
            (10, 51) => ConnectionCloseOk,
            (20, 10) => ChannelOpen,
            (20, 11) => ChannelOpenOk,
            (20, 40) => ChannelClose,
            (20, 41) => ChannelCloseOk,
            _ => return None,
        })
    }
}

/// A decoded method payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// `connection.start` - broker opens negotiation.
    ConnectionStart {
        version_major: u8,
        version_minor: u8,
        server_properties: FieldTable,
        mechanisms: String,
        locales: String,
    },
    /// `connection.start-ok` - client identification and credentials.
    ConnectionStartOk {
        client_properties: FieldTable,
        mechanism: String,
        /// Security response blob (AMQPLAIN table contents).
        response: Vec<u8>,
        locale: String,
    },
    /// `connection.tune` - broker proposes limits.
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    /// `connection.tune-ok` - client echoes or overrides limits.
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    /// `connection.open` - attach to a virtual host.
    ConnectionOpen {
        virtual_host: String,
        capabilities: String,
        insist: bool,
    },
    /// `connection.open-ok`.
    ConnectionOpenOk { known_hosts: String },
    /// `connection.close`.
    ConnectionClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    /// `connection.close-ok`.
    ConnectionCloseOk,
    /// `channel.open`.
    ChannelOpen { out_of_band: String },
    /// `channel.open-ok`.
    ChannelOpenOk { channel_id: Vec<u8> },
    /// `channel.close`.
    ChannelClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    /// `channel.close-ok`.
    ChannelCloseOk,
}

impl Method {
    /// Get the type tag for this method.
    pub fn kind(&self) -> MethodKind {
        match self {
            Method::ConnectionStart { .. } => MethodKind::ConnectionStart,
            Method::ConnectionStartOk { .. } => MethodKind::ConnectionStartOk,
            Method::ConnectionTune { .. } => MethodKind::ConnectionTune,
            Method::ConnectionTuneOk { .. } => MethodKind::ConnectionTuneOk,
            Method::ConnectionOpen { .. } => MethodKind::ConnectionOpen,
            Method::ConnectionOpenOk { .. } => MethodKind::ConnectionOpenOk,
            Method::ConnectionClose { .. } => MethodKind::ConnectionClose,
            Method::ConnectionCloseOk => MethodKind::ConnectionCloseOk,
            Method::ChannelOpen { .. } => MethodKind::ChannelOpen,
            Method::ChannelOpenOk { .. } => MethodKind::ChannelOpenOk,
            Method::ChannelClose { .. } => MethodKind::ChannelClose,
            Method::ChannelCloseOk => MethodKind::ChannelCloseOk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let method = Method::ConnectionOpen {
            virtual_host: "/".to_string(),
            capabilities: String::new(),
            insist: true,
        };
        assert_eq!(method.kind(), MethodKind::ConnectionOpen);
    }

    #[test]
    fn test_ids_roundtrip() {
        let all = [
            MethodKind::ConnectionStart,
            MethodKind::ConnectionStartOk,
            MethodKind::ConnectionTune,
            MethodKind::ConnectionTuneOk,
            MethodKind::ConnectionOpen,
            MethodKind::ConnectionOpenOk,
            MethodKind::ConnectionClose,
            MethodKind::ConnectionCloseOk,
            MethodKind::ChannelOpen,
            MethodKind::ChannelOpenOk,
            MethodKind::ChannelClose,
            MethodKind::ChannelCloseOk,
        ];

        for kind in all {
            let (class_id, method_id) = kind.ids();
            assert_eq!(MethodKind::from_ids(class_id, method_id), Some(kind));
        }
    }

    #[test]
    fn test_unknown_ids_rejected() {
        assert_eq!(MethodKind::from_ids(10, 99), None);
        assert_eq!(MethodKind::from_ids(60, 10), None);
    }

    #[test]
    fn test_requests_declare_their_replies() {
        let spec = MethodKind::ConnectionOpen.spec();
        assert!(spec.synchronous);
        assert_eq!(spec.responses, &[MethodKind::ConnectionOpenOk]);

        let spec = MethodKind::ChannelOpen.spec();
        assert!(spec.synchronous);
        assert_eq!(spec.responses, &[MethodKind::ChannelOpenOk]);
    }

    #[test]
    fn test_replies_have_no_responses() {
        assert!(MethodKind::ConnectionStartOk.spec().responses.is_empty());
        assert!(MethodKind::ConnectionTuneOk.spec().responses.is_empty());
        assert!(MethodKind::ChannelOpenOk.spec().responses.is_empty());
    }
}
