//! Message bodies and the outgoing envelope.
//!
//! A body is either a JSON object or a Protobuf [`FunMessage`]; which one is
//! decided per transport by its [`Encoding`]. Both encodings carry the same
//! reserved fields (message type, session id, seq, ack), and [`MessageBody`]
//! gives one accessor for each so that transports and the session layer never
//! match on the encoding themselves.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{FunMessage, ProtocolError, SessionId};

// ---------------------------------------------------------------------------
// Reserved names
// ---------------------------------------------------------------------------

/// JSON member holding the message type.
pub const MSGTYPE_FIELD: &str = "_msgtype";
/// JSON member holding the session id.
pub const SESSION_ID_FIELD: &str = "_sid";
/// JSON member holding the reliability sequence number.
pub const SEQ_FIELD: &str = "_seq";
/// JSON member holding the reliability acknowledgement.
pub const ACK_FIELD: &str = "_ack";
/// JSON member holding a ping timestamp in milliseconds.
pub const PING_TIMESTAMP_FIELD: &str = "timestamp";

/// Built-in message type names.
pub mod msg_type {
    /// The server created a session.
    pub const SESSION_OPENED: &str = "_session_opened";
    /// The server closed the session.
    pub const SESSION_CLOSED: &str = "_session_closed";
    /// Scheduled maintenance notice.
    pub const MAINTENANCE: &str = "_maintenance";
    /// Server-initiated ping, echoed back by the client.
    pub const SERVER_PING: &str = "_ping_s";
    /// Client-initiated ping, echoed back by the server.
    pub const CLIENT_PING: &str = "_ping_c";
    /// The server moves the session to another host.
    pub const REDIRECT: &str = "_sc_redirect";
    /// Token handshake after a redirect.
    pub const REDIRECT_CONNECT: &str = "_cs_redirect_connect";
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// How a transport encodes message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Protobuf,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Protobuf => f.write_str("protobuf"),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageBody
// ---------------------------------------------------------------------------

/// Reliability fields pulled out of an inbound body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sequencing {
    pub seq: Option<u32>,
    pub ack: Option<u32>,
}

/// A decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Json(Map<String, Value>),
    Protobuf(FunMessage),
}

impl MessageBody {
    /// An empty body of the given encoding.
    pub fn empty(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => Self::Json(Map::new()),
            Encoding::Protobuf => Self::Protobuf(FunMessage::default()),
        }
    }

    /// Decodes `bytes` as a body of the given encoding.
    ///
    /// # Errors
    /// [`ProtocolError::Json`], [`ProtocolError::NotAnObject`] or
    /// [`ProtocolError::Protobuf`].
    pub fn decode(encoding: Encoding, bytes: &[u8]) -> Result<Self, ProtocolError> {
        match encoding {
            Encoding::Json => match serde_json::from_slice::<Value>(bytes)? {
                Value::Object(map) => Ok(Self::Json(map)),
                _ => Err(ProtocolError::NotAnObject),
            },
            Encoding::Protobuf => Ok(Self::Protobuf(FunMessage::decode(bytes)?)),
        }
    }

    /// Parses an application-supplied JSON object.
    ///
    /// # Errors
    /// [`ProtocolError::Json`] or [`ProtocolError::NotAnObject`].
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        Self::decode(Encoding::Json, json.as_bytes())
    }

    /// The encoding of this body.
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Json(_) => Encoding::Json,
            Self::Protobuf(_) => Encoding::Protobuf,
        }
    }

    /// Serializes the body.
    ///
    /// # Errors
    /// [`ProtocolError::Json`] if a JSON value cannot be written.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Json(map) => Ok(serde_json::to_vec(map)?),
            Self::Protobuf(msg) => Ok(msg.encode_to_vec()),
        }
    }

    /// The string message type, if any.
    pub fn msg_type(&self) -> Option<&str> {
        match self {
            Self::Json(map) => map.get(MSGTYPE_FIELD).and_then(Value::as_str),
            Self::Protobuf(msg) => msg.msgtype.as_deref(),
        }
    }

    /// The integer message type. Only Protobuf bodies carry one.
    pub fn msg_type_int(&self) -> Option<i32> {
        match self {
            Self::Json(_) => None,
            Self::Protobuf(msg) => msg.msgtype2,
        }
    }

    /// Sets the string message type.
    pub fn set_msg_type(&mut self, msg_type: &str) {
        match self {
            Self::Json(map) => {
                map.insert(MSGTYPE_FIELD.to_owned(), Value::from(msg_type));
            }
            Self::Protobuf(msg) => msg.msgtype = Some(msg_type.to_owned()),
        }
    }

    /// The session id carried by the body, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Json(map) => map
                .get(SESSION_ID_FIELD)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(SessionId::from_text),
            Self::Protobuf(msg) => msg
                .sid
                .as_ref()
                .filter(|b| !b.is_empty())
                .map(|b| SessionId::from_bytes(b.clone())),
        }
    }

    /// Stamps the session id in the form this encoding uses.
    pub fn set_session_id(&mut self, id: &SessionId) {
        match self {
            Self::Json(map) => {
                map.insert(SESSION_ID_FIELD.to_owned(), Value::from(id.as_str()));
            }
            Self::Protobuf(msg) => msg.sid = Some(id.as_bytes().to_vec()),
        }
    }

    /// The sequence number, if stamped.
    pub fn seq(&self) -> Option<u32> {
        match self {
            Self::Json(map) => map
                .get(SEQ_FIELD)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok()),
            Self::Protobuf(msg) => msg.seq,
        }
    }

    /// Stamps a sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        match self {
            Self::Json(map) => {
                map.insert(SEQ_FIELD.to_owned(), Value::from(seq));
            }
            Self::Protobuf(msg) => msg.seq = Some(seq),
        }
    }

    /// Stamps an acknowledgement.
    pub fn set_ack(&mut self, ack: u32) {
        match self {
            Self::Json(map) => {
                map.insert(ACK_FIELD.to_owned(), Value::from(ack));
            }
            Self::Protobuf(msg) => msg.ack = Some(ack),
        }
    }

    /// Removes and returns the seq and ack fields.
    ///
    /// The application never sees reliability bookkeeping, so inbound bodies
    /// go through this before they are handed upward.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidField`] when a JSON seq or ack is not an
    /// unsigned 32-bit number.
    pub fn take_sequencing(&mut self) -> Result<Sequencing, ProtocolError> {
        match self {
            Self::Json(map) => Ok(Sequencing {
                seq: take_u32(map, SEQ_FIELD)?,
                ack: take_u32(map, ACK_FIELD)?,
            }),
            Self::Protobuf(msg) => Ok(Sequencing {
                seq: msg.seq.take(),
                ack: msg.ack.take(),
            }),
        }
    }

    /// The JSON object, if this is a JSON body.
    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Json(map) => Some(map),
            Self::Protobuf(_) => None,
        }
    }

    /// The Protobuf message, if this is a Protobuf body.
    pub fn as_protobuf(&self) -> Option<&FunMessage> {
        match self {
            Self::Json(_) => None,
            Self::Protobuf(msg) => Some(msg),
        }
    }
}

fn take_u32(map: &mut Map<String, Value>, field: &'static str) -> Result<Option<u32>, ProtocolError> {
    let Some(value) = map.remove(field) else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| ProtocolError::InvalidField {
            field,
            reason: format!("expected u32, got {value}"),
        })
}

impl From<FunMessage> for MessageBody {
    fn from(msg: FunMessage) -> Self {
        Self::Protobuf(msg)
    }
}

impl From<Map<String, Value>> for MessageBody {
    fn from(map: Map<String, Value>) -> Self {
        Self::Json(map)
    }
}

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// A body queued for sending, with its delivery flags.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub body: MessageBody,
    /// Stamp a sequence number if the transport is sequencing.
    pub use_seq: bool,
    /// Keep in the replay buffer until acknowledged.
    pub retain: bool,
    /// Assigned on first send; a replayed message keeps its number.
    pub seq: Option<u32>,
}

impl OutgoingMessage {
    /// A plain message: no sequencing, not retained.
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            use_seq: false,
            retain: false,
            seq: None,
        }
    }

    /// An application message: sequenced, and retained if `retain`.
    pub fn sequenced(body: MessageBody, retain: bool) -> Self {
        Self {
            body,
            use_seq: true,
            retain,
            seq: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn json_body(value: Value) -> MessageBody {
        match value {
            Value::Object(map) => MessageBody::Json(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_decode_rejects_non_object_json() {
        assert!(matches!(
            MessageBody::decode(Encoding::Json, b"[1,2]"),
            Err(ProtocolError::NotAnObject)
        ));
    }

    #[test]
    fn test_take_sequencing_removes_json_fields() {
        let mut body = json_body(json!({"_msgtype": "echo", "_seq": 7, "_ack": 3}));
        let sequencing = body.take_sequencing().unwrap();
        assert_eq!(sequencing, Sequencing { seq: Some(7), ack: Some(3) });
        assert_eq!(body, json_body(json!({"_msgtype": "echo"})));
    }

    #[test]
    fn test_take_sequencing_rejects_negative_seq() {
        let mut body = json_body(json!({"_seq": -1}));
        assert!(matches!(
            body.take_sequencing(),
            Err(ProtocolError::InvalidField { field: SEQ_FIELD, .. })
        ));
    }

    #[test]
    fn test_session_id_reads_both_encodings() {
        let body = json_body(json!({"_sid": "abc"}));
        assert_eq!(body.session_id().unwrap().as_str(), "abc");

        let body = MessageBody::Protobuf(FunMessage {
            sid: Some(vec![0xab; 16]),
            ..Default::default()
        });
        assert_eq!(body.session_id().unwrap().as_bytes(), &[0xab; 16]);
    }

    #[test]
    fn test_empty_session_id_is_absent() {
        let body = json_body(json!({"_sid": ""}));
        assert!(body.session_id().is_none());
    }

    #[test]
    fn test_set_msg_type_on_json_body() {
        let mut body = MessageBody::from_json_str(r#"{"message":"hello world"}"#).unwrap();
        body.set_msg_type("echo");
        assert_eq!(body.msg_type(), Some("echo"));
        assert_eq!(body.msg_type_int(), None);
    }

    #[test]
    fn test_encoding_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Encoding::Protobuf).unwrap(), "\"protobuf\"");
    }
}
