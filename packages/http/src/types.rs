use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// HTTP method for requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
}

impl Method {
    /// Methods the transport may resend on its own after an I/O error.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Method::POST)
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::GET => http::Method::GET,
            Method::POST => http::Method::POST,
            Method::PUT => http::Method::PUT,
            Method::DELETE => http::Method::DELETE,
            Method::HEAD => http::Method::HEAD,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(http::Method::from(*self).as_str())
    }
}

/// Request entity: raw bytes plus their content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub bytes: Bytes,
}

impl Body {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(crate::constants::CTYPE_JSON, value.to_string())
    }
}

/// Whether the transport materializes the body or hands back a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Buffered,
    Streaming,
}

impl ResponseMode {
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream {
            ResponseMode::Streaming
        } else {
            ResponseMode::Buffered
        }
    }

    pub fn is_streaming(self) -> bool {
        self == ResponseMode::Streaming
    }
}

/// A response body still attached to its connection.
///
/// Dropping the stream (or calling [`ResponseStream::release`]) gives the
/// connection back. Holding it forever leaks the connection.
pub struct ResponseStream {
    inner: Box<dyn Read + Send>,
}

impl ResponseStream {
    pub fn new(inner: impl Read + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Read everything that is left and release the connection.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    pub fn release(self) {}
}

impl Read for ResponseStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseStream { .. }")
    }
}

/// HTTP response from a request
///
/// Exactly one of `body` and `stream` is populated for a real response; the
/// placeholder handed back after a handled failure has neither and a status
/// of 0.
#[derive(Debug, Default)]
pub struct HttpResponse {
    /// Bucket the request targeted, if any
    pub bucket: Option<String>,

    /// Key the request targeted, if any
    pub key: Option<String>,

    /// HTTP status code, 0 when no status line was produced
    pub status: u16,

    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,

    /// Materialized body (buffered mode)
    pub body: Option<Bytes>,

    /// Live body (streaming mode)
    pub stream: Option<ResponseStream>,
}

impl HttpResponse {
    /// The inert result returned when an installed handler swallowed an error.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == 0
    }

    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if the response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Try to deserialize the body into a specific type
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Some(body) => serde_json::from_slice(body),
            None => serde_json::from_value(serde_json::Value::Null),
        }
    }

    /// Take the live body, leaving the response without one.
    pub fn take_stream(&mut self) -> Option<ResponseStream> {
        self.stream.take()
    }

    /// Release the connection of a streamed response.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
    }
}
