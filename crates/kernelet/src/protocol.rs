//! Wire protocol types for kernel <-> front-end communication.
//!
//! A message travels as a multipart envelope: routing identities, a
//! delimiter frame, an HMAC signature, then four JSON sections
//! (header, parent_header, metadata, content). The open sections stay
//! `serde_json::Value`; only the header is typed.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision reported verbatim in kernel_info replies.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Raw multipart message as delivered by the transport.
pub type WireMessage = Vec<Vec<u8>>;

/// Channel a routed message travels on.
///
/// Broadcasts are topic-addressed and carry no `Channel` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Request/reply, primary execution traffic.
    Shell,
    /// Request/reply, high-priority out-of-band (interrupt, shutdown).
    Control,
    /// Kernel-initiated input requests and front-end replies.
    Stdin,
}

/// Message header. Field names are the wire names.
///
/// Decoding is tolerant of missing fields (they default to empty), the way
/// the protocol treats header fields as advisory except `msg_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: String,
    pub username: String,
    pub session: String,
    pub date: String,
    pub version: String,
}

impl Header {
    /// Fresh header with a v4 message id and current ISO-8601 timestamp.
    pub fn new(msg_type: &str, username: &str, session: &str, version: &str) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            msg_type: msg_type.to_string(),
            username: username.to_string(),
            session: session.to_string(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: version.to_string(),
        }
    }
}

/// A fully decoded protocol message. Immutable once constructed; encoding is
/// a pure function of its fields plus the signing key.
#[derive(Debug, Clone)]
pub struct Message {
    /// Ordered opaque routing frames of the original sender. Empty for
    /// broadcasts (the topic frame is added at encode time).
    pub identities: Vec<Vec<u8>>,
    pub header: Header,
    /// Header of the message that caused this one, `None` if unprompted.
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
}

/// The request currently being answered: routing identities for replies plus
/// the header every reply/broadcast stamps as `parent_header`.
///
/// Threaded by value through each dispatch call. Shell and Control never
/// share one, so concurrent Control traffic cannot mis-stamp in-flight
/// Shell replies.
#[derive(Debug, Clone)]
pub struct ParentContext {
    pub identities: Vec<Vec<u8>>,
    pub header: Header,
}

impl ParentContext {
    pub fn of(message: &Message) -> Self {
        Self {
            identities: message.identities.clone(),
            header: message.header.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serializes_wire_field_names() {
        let header = Header::new("execute_request", "user", "sess-1", PROTOCOL_VERSION);
        let value = serde_json::to_value(&header).unwrap();

        assert_eq!(value["msg_type"], "execute_request");
        assert_eq!(value["username"], "user");
        assert_eq!(value["session"], "sess-1");
        assert_eq!(value["version"], PROTOCOL_VERSION);
        assert!(!value["msg_id"].as_str().unwrap().is_empty());
        assert!(!value["date"].as_str().unwrap().is_empty());
    }

    #[test]
    fn header_ids_are_unique() {
        let a = Header::new("kernel_info_request", "u", "s", PROTOCOL_VERSION);
        let b = Header::new("kernel_info_request", "u", "s", PROTOCOL_VERSION);
        assert_ne!(a.msg_id, b.msg_id);
    }

    #[test]
    fn header_decodes_with_missing_fields() {
        let header: Header = serde_json::from_str(r#"{"msg_type":"comm_open"}"#).unwrap();
        assert_eq!(header.msg_type, "comm_open");
        assert_eq!(header.msg_id, "");
        assert_eq!(header.username, "");
    }
}
