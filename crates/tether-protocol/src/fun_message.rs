//! Protobuf message schema.
//!
//! These are hand-written `prost` structs rather than `build.rs` output, so
//! the crate builds without `protoc`. The `#[prost(...)]` attributes carry
//! the field tags; they are the wire contract and must never be renumbered.
//!
//! Note that `prost::Message` also generates `Debug` and `Default`, so those
//! are not in the derive lists below.

/// The envelope every Protobuf-encoded message travels in.
///
/// Reserved fields (`sid`, `msgtype`, `seq`, `ack`) mirror the `_sid`,
/// `_msgtype`, `_seq`, `_ack` keys of the JSON encoding. Control payloads
/// each get their own optional field; application data goes in `payload`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FunMessage {
    /// Session id as raw bytes (16 for a UUID).
    #[prost(bytes = "vec", optional, tag = "1")]
    pub sid: Option<Vec<u8>>,
    /// Message type name.
    #[prost(string, optional, tag = "2")]
    pub msgtype: Option<String>,
    /// Reliability sequence number.
    #[prost(uint32, optional, tag = "3")]
    pub seq: Option<u32>,
    /// Reliability acknowledgement: the next sequence number expected.
    #[prost(uint32, optional, tag = "4")]
    pub ack: Option<u32>,
    /// Integer message type, used instead of `msgtype` by some servers.
    #[prost(int32, optional, tag = "5")]
    pub msgtype2: Option<i32>,

    /// Client ping payload (`_ping_c` / `_ping_s`).
    #[prost(message, optional, tag = "8")]
    pub cs_ping: Option<FunPingMessage>,
    /// Server-initiated redirect (`_sc_redirect`).
    #[prost(message, optional, tag = "9")]
    pub sc_redirect: Option<FunRedirectMessage>,
    /// Client's reply after reconnecting to a redirect target.
    #[prost(message, optional, tag = "10")]
    pub cs_redirect_connect: Option<FunRedirectConnectMessage>,
    /// Maintenance notice (`_maintenance`).
    #[prost(message, optional, tag = "11")]
    pub maintenance: Option<FunMaintenanceMessage>,

    /// Opaque application payload.
    #[prost(bytes = "vec", optional, tag = "16")]
    pub payload: Option<Vec<u8>>,
}

/// Ping request/response body.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FunPingMessage {
    /// Sender's clock in milliseconds.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    /// Optional padding echoed back by the server.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// One listening endpoint of a redirect target.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerPort {
    #[prost(int32, tag = "1")]
    pub port: i32,
    #[prost(enumeration = "RedirectProtocol", tag = "2")]
    pub protocol: i32,
    #[prost(enumeration = "RedirectEncoding", tag = "3")]
    pub encoding: i32,
}

/// Server instruction to move the session to another host.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FunRedirectMessage {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub host: String,
    #[prost(message, repeated, tag = "3")]
    pub ports: Vec<ServerPort>,
    /// Server flavor, passed to the application's option resolver.
    #[prost(string, tag = "4")]
    pub flavor: String,
}

/// Client announcement of the redirect token on the new host, and the
/// server's verdict on it.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FunRedirectConnectMessage {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(enumeration = "RedirectConnectResult", tag = "2")]
    pub result: i32,
}

/// Scheduled maintenance window.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FunMaintenanceMessage {
    #[prost(string, tag = "1")]
    pub date_start: String,
    #[prost(string, tag = "2")]
    pub date_end: String,
    #[prost(string, tag = "3")]
    pub messages: String,
}

/// Transport named in a redirect port entry. Zero is "unspecified".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RedirectProtocol {
    Tcp = 1,
    Udp = 2,
    Http = 3,
}

/// Encoding named in a redirect port entry. Zero is "unspecified".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RedirectEncoding {
    Json = 1,
    Protobuf = 2,
}

/// Server's verdict on a redirect token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RedirectConnectResult {
    Ok = 0,
    Expired = 1,
    InvalidToken = 2,
    AuthFailed = 3,
}
