//! Builders for the control messages the client sends on its own.

use serde_json::{Map, Value};

use crate::message::{msg_type, PING_TIMESTAMP_FIELD};
use crate::{
    Encoding, FunMessage, FunPingMessage, FunRedirectConnectMessage, MessageBody,
};

/// A bare acknowledgement: "the next seq I expect is `ack`".
pub fn ack(encoding: Encoding, ack: u32) -> MessageBody {
    let mut body = MessageBody::empty(encoding);
    body.set_ack(ack);
    body
}

/// A client ping carrying the local clock in milliseconds.
pub fn client_ping(encoding: Encoding, timestamp_ms: i64) -> MessageBody {
    match encoding {
        Encoding::Json => {
            let mut map = Map::new();
            map.insert(PING_TIMESTAMP_FIELD.to_owned(), Value::from(timestamp_ms));
            let mut body = MessageBody::Json(map);
            body.set_msg_type(msg_type::CLIENT_PING);
            body
        }
        Encoding::Protobuf => MessageBody::Protobuf(FunMessage {
            msgtype: Some(msg_type::CLIENT_PING.to_owned()),
            cs_ping: Some(FunPingMessage {
                timestamp: timestamp_ms,
                data: Vec::new(),
            }),
            ..Default::default()
        }),
    }
}

/// Reads the timestamp out of a ping body (either direction).
pub fn ping_timestamp(body: &MessageBody) -> Option<i64> {
    match body {
        MessageBody::Json(map) => map.get(PING_TIMESTAMP_FIELD).and_then(Value::as_i64),
        MessageBody::Protobuf(msg) => msg.cs_ping.as_ref().map(|p| p.timestamp),
    }
}

/// Announces a redirect token on the new host.
pub fn redirect_connect(encoding: Encoding, token: &str) -> MessageBody {
    match encoding {
        Encoding::Json => {
            let mut map = Map::new();
            map.insert("token".to_owned(), Value::from(token));
            let mut body = MessageBody::Json(map);
            body.set_msg_type(msg_type::REDIRECT_CONNECT);
            body
        }
        Encoding::Protobuf => MessageBody::Protobuf(FunMessage {
            msgtype: Some(msg_type::REDIRECT_CONNECT.to_owned()),
            cs_redirect_connect: Some(FunRedirectConnectMessage {
                token: token.to_owned(),
                result: 0,
            }),
            ..Default::default()
        }),
    }
}
