//! HTTP/1.1 upgrade handshake (RFC 6455 opening handshake).
//!
//! The upgrader consumes a parsed request plus the raw transport: the HTTP
//! server in front of it owns request parsing and surrenders the byte
//! stream. On success the `101 Switching Protocols` response is written and
//! the transport is handed to a [`Manager`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::connection::ConnectionContext;
use crate::error::{Error, Result};
use crate::manager::Manager;

/// The GUID appended to the client key in the accept derivation
/// (RFC 6455 Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const EXTENSION_PARAMS: &str = "server_no_context_takeover; client_no_context_takeover";
const PER_MESSAGE_DEFLATE: &[u8] = b"permessage-deflate";

/// Compute the `Sec-WebSocket-Accept` value for a client key:
/// `base64(SHA1(key || GUID))`.
///
/// # Example
///
/// ```
/// use wscore::upgrade::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Tokenize a comma-separated header into `(name, value)` pairs.
///
/// Each item is either a bare value, emitted as `("", value)`, or a
/// `name=value` pair. Leading whitespace inside an item is skipped; an
/// empty item emits `("", "")`. The callback returns `false` to abort the
/// scan.
pub fn visit_header(header: &[u8], mut visit: impl FnMut(&[u8], &[u8]) -> bool) {
    let len = header.len();
    let mut i = 0;
    while i < len {
        let byte = header[i];
        if byte != b' ' && byte != b'\t' {
            let start = i;
            let mut emitted = false;
            while i < len {
                let byte = header[i];
                if byte == b',' {
                    if !visit(&header[start..start], &header[start..i]) {
                        return;
                    }
                    emitted = true;
                    break;
                } else if byte == b'=' {
                    let name = &header[start..i];
                    i += 1;
                    while i < len {
                        let byte = header[i];
                        if byte != b' ' && byte != b'\t' {
                            break;
                        }
                        i += 1;
                    }
                    let value_start = i;
                    while i < len && header[i] != b',' {
                        i += 1;
                    }
                    if !visit(name, &header[value_start..i]) {
                        return;
                    }
                    emitted = true;
                    break;
                }
                i += 1;
            }
            if !emitted && !visit(&[], &header[start..i]) {
                return;
            }
        }
        i += 1;
    }
}

/// Whether a tokenized extension offer names permessage-deflate.
///
/// Extension parameters inside an offer are separated by `;`, so the offer
/// name is the head of the token up to the first `;`.
fn offer_is_deflate(name: &[u8], value: &[u8]) -> bool {
    let token = if name.is_empty() { value } else { name };
    let head = match token.iter().position(|&b| b == b';') {
        Some(pos) => &token[..pos],
        None => token,
    };
    head.trim_ascii() == PER_MESSAGE_DEFLATE
}

/// A parsed upgrade request: the method plus the headers the handshake
/// cares about.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Build a request from an already-parsed method.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: String::from("/"),
            headers: Vec::new(),
        }
    }

    /// Add a header (builder style).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header value. Names compare case-insensitively; values are
    /// returned exactly as they arrived.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parse a raw HTTP/1.1 request head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] with status 400 when the request line
    /// or a header line is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| Error::Handshake {
            status: 400,
            reason: "Request is not valid UTF-8".into(),
        })?;

        let mut lines = text.lines();
        let request_line = lines.next().ok_or_else(|| Error::Handshake {
            status: 400,
            reason: "Empty request".into(),
        })?;

        let mut parts = request_line.split_whitespace();
        let (method, path) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(_version), None) => (method, path),
            _ => {
                return Err(Error::Handshake {
                    status: 400,
                    reason: "Malformed request line".into(),
                });
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::Handshake {
                    status: 400,
                    reason: format!("Malformed header line: {line}"),
                });
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Parse a raw request head, rejecting oversized input first.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeTooLarge`] if `data` exceeds `max_size`
    /// - Parse errors as per [`parse`](UpgradeRequest::parse)
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }
}

/// Response bytes producer for rejected handshakes, replacing the built-in
/// plain-text response.
pub type ErrorHook = Box<dyn Fn(&Error) -> Vec<u8> + Send + Sync>;

/// Validates upgrade requests, answers the handshake, and surrenders the
/// transport to a [`Manager`].
pub struct Upgrader<M> {
    manager: M,
    error_hook: Option<ErrorHook>,
}

impl<M> Upgrader<M> {
    /// Create an upgrader in front of `manager`.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            error_hook: None,
        }
    }

    /// Replace the built-in rejection response with a custom one.
    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    /// Validate the request and upgrade the transport.
    ///
    /// Checks, in order: the method is GET (else 405), the `Connection`
    /// header equals `Upgrade`, the `Upgrade` header equals `websocket`,
    /// `Sec-WebSocket-Key` is present, and `Sec-WebSocket-Version` is 13.
    /// On success the `101` response is written (negotiating
    /// permessage-deflate when offered) and the transport is handed to the
    /// manager, which owns its lifecycle from then on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] after writing the rejection response,
    /// or whatever the manager's accept returns.
    pub async fn upgrade<T>(&self, request: &UpgradeRequest, mut io: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
        M: Manager<T>,
    {
        if request.method() != "GET" {
            return self.reject(&mut io, 405, "Method not allowed").await;
        }
        if request.header("Connection") != Some("Upgrade") {
            return self.reject(&mut io, 400, "Invalid connection type").await;
        }
        match request.header("Upgrade") {
            Some("websocket") => {}
            other => {
                let upgrade_to = other.unwrap_or("");
                let reason =
                    format!("This connection cannot be upgraded to '{upgrade_to}'");
                return self.reject(&mut io, 400, &reason).await;
            }
        }
        let Some(key) = request.header("Sec-WebSocket-Key") else {
            return self.reject(&mut io, 400, "The key is missing.").await;
        };
        match request.header("Sec-WebSocket-Version") {
            None => return self.reject(&mut io, 400, "No version provided.").await,
            Some("13") => {}
            Some(_) => {
                return self
                    .reject(&mut io, 400, "The version is not supported.")
                    .await;
            }
        }

        let mut compressed = false;
        if let Some(extensions) = request.header("Sec-WebSocket-Extensions") {
            visit_header(extensions.as_bytes(), |name, value| {
                if offer_is_deflate(name, value) {
                    compressed = true;
                    return false;
                }
                true
            });
        }

        let accept = compute_accept_key(key);
        let extensions = if compressed {
            format!("permessage-deflate; {EXTENSION_PARAMS}")
        } else {
            EXTENSION_PARAMS.to_string()
        };
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             Sec-WebSocket-Extensions: {extensions}\r\n\
             \r\n"
        );
        io.write_all(response.as_bytes()).await?;
        io.flush().await?;

        debug!(path = request.path(), compressed, "connection upgraded");
        self.manager.accept(ConnectionContext { io, compressed }).await
    }

    async fn reject<T: AsyncWrite + Unpin>(
        &self,
        io: &mut T,
        status: u16,
        reason: &str,
    ) -> Result<()> {
        let err = Error::Handshake {
            status,
            reason: reason.to_string(),
        };
        debug!(status, reason, "upgrade rejected");

        let response = match &self.error_hook {
            Some(hook) => hook(&err),
            None => {
                let status_line = match status {
                    405 => "405 Method Not Allowed",
                    _ => "400 Bad Request",
                };
                format!(
                    "HTTP/1.1 {status_line}\r\n\
                     Content-Type: text/plain; charset=utf-8\r\n\
                     Content-Length: {}\r\n\
                     \r\n\
                     {reason}",
                    reason.len()
                )
                .into_bytes()
            }
        };
        io.write_all(&response).await?;
        io.flush().await?;
        Err(err)
    }
}
