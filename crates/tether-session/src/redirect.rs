//! Parsing of server-initiated redirects.
//!
//! A redirect names a new host, a token to present there, and the ports to
//! connect to. JSON servers send it as plain object members; Protobuf
//! servers send a `FunRedirectMessage`. Both end up as a [`RedirectTarget`].

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::{
    Encoding, FunRedirectMessage, MessageBody, ProtocolError, RedirectConnectResult,
    RedirectEncoding, RedirectProtocol, ServerPort,
};
use tether_transport::TransportProtocol;
use tracing::debug;

use crate::ErrorCode;

/// Where to go and what to present when we get there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RedirectTarget {
    pub(crate) token: String,
    pub(crate) host: String,
    pub(crate) flavor: String,
    pub(crate) ports: Vec<RedirectPort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RedirectPort {
    pub(crate) protocol: TransportProtocol,
    pub(crate) port: u16,
    pub(crate) encoding: Encoding,
}

#[derive(Deserialize)]
struct JsonRedirect {
    #[serde(default)]
    token: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    flavor: String,
    #[serde(default)]
    ports: Vec<JsonPort>,
}

#[derive(Deserialize)]
struct JsonPort {
    #[serde(default)]
    port: i32,
    #[serde(default)]
    protocol: i32,
    #[serde(default)]
    encoding: i32,
}

/// Reads a `_sc_redirect` body.
///
/// Port entries with an unknown protocol, an unknown encoding, or a port
/// outside `u16` are skipped.
pub(crate) fn parse_redirect(body: &MessageBody) -> Result<RedirectTarget, ProtocolError> {
    let message = match body {
        MessageBody::Json(map) => {
            let json: JsonRedirect = serde_json::from_value(Value::Object(map.clone()))?;
            FunRedirectMessage {
                token: json.token,
                host: json.host,
                flavor: json.flavor,
                ports: json
                    .ports
                    .into_iter()
                    .map(|p| ServerPort {
                        port: p.port,
                        protocol: p.protocol,
                        encoding: p.encoding,
                    })
                    .collect(),
            }
        }
        MessageBody::Protobuf(msg) => {
            msg.sc_redirect
                .clone()
                .ok_or_else(|| ProtocolError::InvalidField {
                    field: "sc_redirect",
                    reason: "missing from redirect message".into(),
                })?
        }
    };

    let ports = message.ports.iter().filter_map(port_from_wire).collect();
    Ok(RedirectTarget {
        token: message.token,
        host: message.host,
        flavor: message.flavor,
        ports,
    })
}

fn port_from_wire(entry: &ServerPort) -> Option<RedirectPort> {
    let protocol = match RedirectProtocol::try_from(entry.protocol) {
        Ok(RedirectProtocol::Tcp) => TransportProtocol::Tcp,
        Ok(RedirectProtocol::Udp) => TransportProtocol::Udp,
        Ok(RedirectProtocol::Http) => TransportProtocol::Http,
        Err(_) => {
            debug!(protocol = entry.protocol, "skipping redirect port with unknown protocol");
            return None;
        }
    };
    let encoding = match RedirectEncoding::try_from(entry.encoding) {
        Ok(RedirectEncoding::Json) => Encoding::Json,
        Ok(RedirectEncoding::Protobuf) => Encoding::Protobuf,
        Err(_) => {
            debug!(encoding = entry.encoding, "skipping redirect port with unknown encoding");
            return None;
        }
    };
    let Ok(port) = u16::try_from(entry.port) else {
        debug!(port = entry.port, "skipping redirect port out of range");
        return None;
    };
    Some(RedirectPort {
        protocol,
        port,
        encoding,
    })
}

/// Reads the verdict out of a `_cs_redirect_connect` reply. A missing
/// result means OK.
pub(crate) fn connect_result(body: &MessageBody) -> Result<(), ErrorCode> {
    let result = match body {
        MessageBody::Json(map) => map
            .get("result")
            .and_then(Value::as_i64)
            .and_then(|r| i32::try_from(r).ok())
            .unwrap_or(0),
        MessageBody::Protobuf(msg) => msg.cs_redirect_connect.as_ref().map_or(0, |r| r.result),
    };

    match RedirectConnectResult::try_from(result) {
        Ok(RedirectConnectResult::Ok) => Ok(()),
        Ok(RedirectConnectResult::Expired) => Err(ErrorCode::RedirectConnectExpired),
        Ok(RedirectConnectResult::InvalidToken) => Err(ErrorCode::RedirectConnectInvalidToken),
        Ok(RedirectConnectResult::AuthFailed) => Err(ErrorCode::RedirectConnectAuthFailed),
        Err(_) => Err(ErrorCode::RedirectConnectRejected(result)),
    }
}

#[cfg(test)]
mod tests {
    use tether_protocol::{FunMessage, FunRedirectConnectMessage};

    use super::*;

    #[test]
    fn test_parse_redirect_json_skips_unknown_entries() {
        let body = MessageBody::from_json_str(
            r#"{
                "_msgtype": "_sc_redirect",
                "token": "tok-1",
                "host": "10.0.0.7",
                "flavor": "lobby",
                "ports": [
                    {"port": 8012, "protocol": 1, "encoding": 1},
                    {"port": 8013, "protocol": 9, "encoding": 1},
                    {"port": 8014, "protocol": 3, "encoding": 0},
                    {"port": 8015, "protocol": 2, "encoding": 2}
                ]
            }"#,
        )
        .unwrap();

        let target = parse_redirect(&body).unwrap();
        assert_eq!(target.token, "tok-1");
        assert_eq!(target.host, "10.0.0.7");
        assert_eq!(target.flavor, "lobby");
        assert_eq!(
            target.ports,
            vec![
                RedirectPort {
                    protocol: TransportProtocol::Tcp,
                    port: 8012,
                    encoding: Encoding::Json,
                },
                RedirectPort {
                    protocol: TransportProtocol::Udp,
                    port: 8015,
                    encoding: Encoding::Protobuf,
                },
            ]
        );
    }

    #[test]
    fn test_parse_redirect_protobuf_reads_extension() {
        let body = MessageBody::Protobuf(FunMessage {
            msgtype: Some("_sc_redirect".into()),
            sc_redirect: Some(FunRedirectMessage {
                token: "tok-2".into(),
                host: "game-2.example".into(),
                ports: vec![ServerPort {
                    port: 9000,
                    protocol: RedirectProtocol::Http as i32,
                    encoding: RedirectEncoding::Protobuf as i32,
                }],
                flavor: String::new(),
            }),
            ..Default::default()
        });

        let target = parse_redirect(&body).unwrap();
        assert_eq!(target.host, "game-2.example");
        assert_eq!(target.ports[0].protocol, TransportProtocol::Http);
        assert_eq!(target.ports[0].port, 9000);
    }

    #[test]
    fn test_parse_redirect_protobuf_without_extension_is_error() {
        let body = MessageBody::empty(Encoding::Protobuf);
        assert!(matches!(
            parse_redirect(&body),
            Err(ProtocolError::InvalidField { field: "sc_redirect", .. })
        ));
    }

    #[test]
    fn test_connect_result_maps_error_codes() {
        let json = |text: &str| MessageBody::from_json_str(text).unwrap();
        assert_eq!(connect_result(&json(r#"{"result":0}"#)), Ok(()));
        assert_eq!(connect_result(&json("{}")), Ok(()));
        assert_eq!(
            connect_result(&json(r#"{"result":1}"#)),
            Err(ErrorCode::RedirectConnectExpired)
        );
        assert_eq!(
            connect_result(&json(r#"{"result":2}"#)),
            Err(ErrorCode::RedirectConnectInvalidToken)
        );
        assert_eq!(
            connect_result(&json(r#"{"result":3}"#)),
            Err(ErrorCode::RedirectConnectAuthFailed)
        );
        assert_eq!(
            connect_result(&json(r#"{"result":12}"#)),
            Err(ErrorCode::RedirectConnectRejected(12))
        );

        let pb = MessageBody::Protobuf(FunMessage {
            cs_redirect_connect: Some(FunRedirectConnectMessage {
                token: String::new(),
                result: RedirectConnectResult::Expired as i32,
            }),
            ..Default::default()
        });
        assert_eq!(connect_result(&pb), Err(ErrorCode::RedirectConnectExpired));
    }
}
