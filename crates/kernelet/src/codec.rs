//! Envelope codec: multipart wire frames <-> [`Message`].
//!
//! Decoding verifies the signature over the raw section bytes before any
//! JSON is parsed, so business logic never sees unauthenticated content.
//! Encoding signs the serialized sections and is pure.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::auth::Authenticator;
use crate::protocol::{Header, Message, WireMessage};

/// Frame separating routing identities from the signed envelope.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Frame structure problems. These drop the message with no reply.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("missing <IDS|MSG> delimiter frame")]
    MissingDelimiter,

    #[error("expected signature plus four envelope sections, got {found} frames")]
    TruncatedEnvelope { found: usize },

    #[error("signature frame is not valid UTF-8")]
    BadSignatureFrame,

    #[error("invalid {section} section: {source}")]
    InvalidSection {
        section: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    #[error("signature verification failed")]
    Authentication,
}

fn parse_section<T: DeserializeOwned>(
    section: &'static str,
    frame: &[u8],
) -> Result<T, MalformedMessage> {
    serde_json::from_slice(frame).map_err(|source| MalformedMessage::InvalidSection { section, source })
}

/// An empty or null parent_header section means "no parent".
fn parse_parent(frame: &[u8]) -> Result<Option<Header>, MalformedMessage> {
    let value: Value = parse_section("parent_header", frame)?;
    match &value {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        _ => {
            let header = serde_json::from_value(value).map_err(|source| {
                MalformedMessage::InvalidSection {
                    section: "parent_header",
                    source,
                }
            })?;
            Ok(Some(header))
        }
    }
}

/// Decode and authenticate a wire message.
///
/// The signature is checked over the raw header/parent_header/metadata/
/// content frames first; only then are the sections parsed.
pub fn decode(frames: &WireMessage, auth: &dyn Authenticator) -> Result<Message, DecodeError> {
    let delimiter = frames
        .iter()
        .position(|frame| frame.as_slice() == DELIMITER)
        .ok_or(MalformedMessage::MissingDelimiter)?;

    let envelope = &frames[delimiter + 1..];
    if envelope.len() < 5 {
        return Err(MalformedMessage::TruncatedEnvelope {
            found: envelope.len(),
        }
        .into());
    }

    let signature =
        std::str::from_utf8(&envelope[0]).map_err(|_| MalformedMessage::BadSignatureFrame)?;
    let sections: [&[u8]; 4] = [&envelope[1], &envelope[2], &envelope[3], &envelope[4]];
    if !auth.verify(&sections, signature) {
        return Err(DecodeError::Authentication);
    }

    Ok(Message {
        identities: frames[..delimiter].to_vec(),
        header: parse_section("header", sections[0])?,
        parent_header: parse_parent(sections[1])?,
        metadata: parse_section("metadata", sections[2])?,
        content: parse_section("content", sections[3])?,
    })
}

/// Encode and sign a message for the wire.
pub fn encode(message: &Message, auth: &dyn Authenticator) -> WireMessage {
    let header = to_json_frame(&message.header);
    let parent_header = match &message.parent_header {
        Some(parent) => to_json_frame(parent),
        None => b"{}".to_vec(),
    };
    let metadata = to_json_frame(&message.metadata);
    let content = to_json_frame(&message.content);

    let sections: [&[u8]; 4] = [&header, &parent_header, &metadata, &content];
    let signature = auth.sign(&sections);

    let mut frames = Vec::with_capacity(message.identities.len() + 6);
    frames.extend(message.identities.iter().cloned());
    frames.push(DELIMITER.to_vec());
    frames.push(signature.into_bytes());
    frames.push(header);
    frames.push(parent_header);
    frames.push(metadata);
    frames.push(content);
    frames
}

fn to_json_frame<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("string-keyed JSON sections always serialize")
}
