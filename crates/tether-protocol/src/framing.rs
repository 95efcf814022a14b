//! Length-prefixed text framing.
//!
//! Every message on the wire (TCP stream, UDP datagram, HTTP body) is one
//! frame:
//!
//! ```text
//! VER:1\n
//! PVER:110\n        <- first frame of a connection only
//! LEN:17\n
//! \n
//! {"_msgtype":"x"}  <- exactly LEN bytes
//! ```
//!
//! [`FrameDecoder`] is the receive side for byte streams. It is a two-phase
//! parser: first it scans for the blank line that ends the header block, then
//! it waits until `LEN` body bytes are buffered. Both phases keep their
//! progress between calls, so bytes can arrive in arbitrarily small pieces.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::ProtocolError;

/// Protocol version written in every `VER` field.
pub const PROTOCOL_VERSION: u32 = 1;
/// Plugin version written in the `PVER` field of a connection's first frame.
pub const PLUGIN_VERSION: u32 = 110;

/// Header field carrying the protocol version.
pub const VERSION_FIELD: &str = "VER";
/// Header field carrying the plugin version.
pub const PLUGIN_VERSION_FIELD: &str = "PVER";
/// Header field carrying the body length in bytes.
pub const LENGTH_FIELD: &str = "LEN";

const LINE_DELIMITER: u8 = b'\n';
const FIELD_DELIMITER: char = ':';

// ---------------------------------------------------------------------------
// HeaderFields
// ---------------------------------------------------------------------------

/// Ordered header-name to value mapping.
///
/// Insertion order is kept so that encoded frames always read
/// `VER`, `PVER`, `LEN`. Inserting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    fields: Vec<(String, String)>,
}

impl HeaderFields {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Header fields for an outgoing frame with a body of `body_len` bytes.
    pub fn for_body(body_len: usize, include_plugin_version: bool) -> Self {
        let mut header = Self::new();
        header.insert(VERSION_FIELD, PROTOCOL_VERSION.to_string());
        if include_plugin_version {
            header.insert(PLUGIN_VERSION_FIELD, PLUGIN_VERSION.to_string());
        }
        header.insert(LENGTH_FIELD, body_len.to_string());
        header
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// The value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The value of `name`, compared case-insensitively.
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes `name` and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `LEN` value as a byte count.
    ///
    /// # Errors
    /// [`ProtocolError::MissingHeader`] or [`ProtocolError::MalformedHeader`].
    pub fn body_length(&self) -> Result<usize, ProtocolError> {
        let value = self
            .get(LENGTH_FIELD)
            .ok_or(ProtocolError::MissingHeader(LENGTH_FIELD))?;
        value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::MalformedHeader(format!("{LENGTH_FIELD}:{value}")))
    }

    /// Checks that `VER` is present and equals [`PROTOCOL_VERSION`].
    ///
    /// # Errors
    /// [`ProtocolError::MissingHeader`] or [`ProtocolError::UnsupportedVersion`].
    pub fn check_version(&self) -> Result<(), ProtocolError> {
        let value = self
            .get(VERSION_FIELD)
            .ok_or(ProtocolError::MissingHeader(VERSION_FIELD))?;
        match value.trim().parse::<u32>() {
            Ok(PROTOCOL_VERSION) => Ok(()),
            _ => Err(ProtocolError::UnsupportedVersion(value.to_owned())),
        }
    }

    /// Parses one `NAME:VALUE` line (without its line delimiter).
    fn parse_line(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::MalformedHeader("header line is not utf-8".into()))?;
        let (name, value) = line
            .split_once(FIELD_DELIMITER)
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_owned()))?;
        let value = value.trim_start_matches([' ', '\t']);
        trace!(name, value, "decoded header field");
        self.insert(name, value);
        Ok(())
    }
}

impl fmt::Display for HeaderFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{name}{FIELD_DELIMITER}{value}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Writes `header` and `body` as one frame.
///
/// `LEN` is always rewritten to the actual body size, so the header may be
/// built before an encryption hook changes the body.
pub fn encode_frame(header: &HeaderFields, body: &[u8]) -> Vec<u8> {
    let mut header = header.clone();
    header.insert(LENGTH_FIELD, body.len().to_string());

    let text = header.to_string();
    let mut out = Vec::with_capacity(text.len() + 1 + body.len());
    out.extend_from_slice(text.as_bytes());
    out.push(LINE_DELIMITER);
    out.extend_from_slice(body);
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The header fields, in wire order.
    pub header: HeaderFields,
    /// Exactly `LEN` bytes of body. Empty for encryption-handshake frames.
    pub body: Bytes,
}

/// Re-entrant two-phase frame parser over a growable receive buffer.
///
/// Invariant: `offset <= buffer.len()`. Bytes before `offset` belong to the
/// header lines already parsed for the frame in progress.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    offset: usize,
    header: HeaderFields,
    header_done: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The decoding offset into the buffer of the frame in progress.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Drops all buffered bytes and any partially parsed header.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.offset = 0;
        self.header = HeaderFields::new();
        self.header_done = false;
    }

    /// Decodes the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Call repeatedly to
    /// drain every complete frame.
    ///
    /// # Errors
    /// Any [`ProtocolError`] from a malformed header. The decoder state is
    /// unspecified afterwards; callers stop the connection.
    pub fn decode(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if !self.header_done && !self.decode_header()? {
            return Ok(None);
        }

        // Phase 2: wait for the body.
        self.header.check_version()?;
        let body_len = self.header.body_length()?;
        if self.buffer.len() - self.offset < body_len {
            trace!(
                need = body_len,
                have = self.buffer.len() - self.offset,
                "waiting for more body bytes"
            );
            return Ok(None);
        }

        self.buffer.advance(self.offset);
        let body = self.buffer.split_to(body_len).freeze();
        self.offset = 0;
        self.header_done = false;
        let header = std::mem::take(&mut self.header);

        Ok(Some(Frame { header, body }))
    }

    /// Phase 1: scan header lines until the terminating blank line.
    /// Returns `false` when the blank line has not arrived yet.
    fn decode_header(&mut self) -> Result<bool, ProtocolError> {
        while self.offset < self.buffer.len() {
            let rest = &self.buffer[self.offset..];
            let Some(eol) = rest.iter().position(|&b| b == LINE_DELIMITER) else {
                return Ok(false);
            };

            let line_start = self.offset;
            self.offset += eol + 1;

            if eol == 0 {
                self.header_done = true;
                return Ok(true);
            }

            let line = self.buffer[line_start..line_start + eol].to_vec();
            self.header.parse_line(&line)?;
        }
        Ok(false)
    }
}

/// Decodes a buffer that must hold whole frames only (one UDP datagram).
///
/// # Errors
/// A malformed header, or trailing bytes that do not form a complete frame.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(bytes);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.decode()? {
        frames.push(frame);
    }

    if decoder.buffered() > 0 {
        return Err(ProtocolError::MalformedHeader(format!(
            "{} trailing bytes after last frame",
            decoder.buffered()
        )));
    }
    Ok(frames)
}
