//! The open connection behind a transport.
//!
//! Three protocols, one closed enum. The transport task matches on it where
//! the protocols actually differ (how bytes go out, how they come in) and
//! shares everything else.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::{JoinError, JoinHandle};
use tether_protocol::{HeaderFields, LENGTH_FIELD, PROTOCOL_VERSION, VERSION_FIELD};
use tracing::trace;

use crate::{HttpOption, TransportError};

/// Size of one socket read.
pub(crate) const READ_BUFFER_SIZE: usize = 64 * 1024;

const COOKIE_REQUEST_HEADER: &str = "Cookie";
const COOKIE_RESPONSE_HEADER: &str = "Set-Cookie";

pub(crate) enum Link {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Http(HttpLink),
}

impl Link {
    /// Whether this link delivers inbound bytes through [`read_link`].
    pub(crate) fn is_readable(&self) -> bool {
        !matches!(self, Self::Http(_))
    }

    /// Writes frames. TCP concatenates them into one write; UDP sends one
    /// datagram per frame.
    pub(crate) async fn write_frames(&mut self, frames: &[Vec<u8>]) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                let bytes = frames.concat();
                stream.write_all(&bytes).await?;
                trace!(bytes = bytes.len(), "tcp write");
            }
            Self::Udp(socket) => {
                for frame in frames {
                    socket.send(frame).await?;
                }
            }
            Self::Http(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "http sends one request per message",
                ));
            }
        }
        Ok(())
    }
}

/// Reads once from the link. Pends forever when there is nothing to read
/// from, so it can sit in a `select!` unconditionally.
pub(crate) async fn read_link(link: &mut Option<Link>, buf: &mut [u8]) -> io::Result<usize> {
    match link {
        Some(Link::Tcp(stream)) => stream.read(buf).await,
        Some(Link::Udp(socket)) => socket.recv(buf).await,
        Some(Link::Http(_)) | None => std::future::pending().await,
    }
}

/// Opens a connected UDP socket bound to an ephemeral local port.
pub(crate) async fn open_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// An HTTP "connection": a client, the endpoint, and the sticky cookie.
pub(crate) struct HttpLink {
    client: reqwest::Client,
    url: String,
    cookie: Option<String>,
}

impl HttpLink {
    /// Builds the client for `host:port`.
    ///
    /// # Errors
    /// [`TransportError::Certificate`] if the CA file can't be read or
    /// parsed, [`TransportError::Http`] if the client can't be built.
    pub(crate) fn new(host: &str, port: u16, option: &HttpOption) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(option.connect_timeout);

        if let Some(path) = &option.ca_cert_path {
            let certificate_error = |reason: String| TransportError::Certificate {
                path: path.display().to_string(),
                reason,
            };
            let pem = std::fs::read(path).map_err(|e| certificate_error(e.to_string()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| certificate_error(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }

        let scheme = if option.use_https { "https" } else { "http" };
        Ok(Self {
            client: builder.build()?,
            url: format!("{scheme}://{host}:{port}/v1/"),
            cookie: None,
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Starts one POST carrying `body`, with the frame header fields as HTTP
    /// headers. The request runs as its own task.
    pub(crate) fn post(&self, header: &HeaderFields, body: Vec<u8>) -> JoinHandle<Result<HttpResponse, TransportError>> {
        let mut request = self.client.post(&self.url).body(body);
        for (name, value) in header.iter() {
            request = request.header(name, value);
        }
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE_REQUEST_HEADER, cookie.as_str());
        }
        tokio::spawn(send_request(request))
    }

    pub(crate) fn set_cookie(&mut self, cookie: String) {
        self.cookie = Some(cookie);
    }
}

/// A completed HTTP exchange, shaped like a received frame.
#[derive(Debug)]
pub(crate) struct HttpResponse {
    pub(crate) header: HeaderFields,
    pub(crate) body: Bytes,
    pub(crate) cookie: Option<String>,
}

async fn send_request(request: reqwest::RequestBuilder) -> Result<HttpResponse, TransportError> {
    let response = request.send().await?.error_for_status()?;

    let mut header = HeaderFields::new();
    let mut cookie = None;
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if name.as_str().eq_ignore_ascii_case(COOKIE_RESPONSE_HEADER) {
            cookie = Some(value.to_owned());
        }
        header.insert(name.as_str(), value);
    }

    let body = response.bytes().await?;
    header.insert(VERSION_FIELD, PROTOCOL_VERSION.to_string());
    header.insert(LENGTH_FIELD, body.len().to_string());

    Ok(HttpResponse {
        header,
        body,
        cookie,
    })
}

/// Awaits the in-flight request, if any. Pends forever otherwise.
pub(crate) async fn poll_request(
    request: &mut Option<JoinHandle<Result<HttpResponse, TransportError>>>,
) -> Result<Result<HttpResponse, TransportError>, JoinError> {
    match request {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
