//! HTTP execution abstraction.
//!
//! An [`HttpExecutor`] performs exactly one round-trip against one endpoint.
//! It never retries across endpoints and never panics on I/O trouble; every
//! failure comes back as a [`TransportError`]. Failover lives one layer up,
//! in [`crate::failover`].

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Error, TransportError};
use crate::request::RequestDescriptor;
use crate::types::{HttpResponse, ResponseMode, ResponseStream};

/// How often the transport itself resends an idempotent request whose
/// connection could not be established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn retries(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// Trait for executing HTTP requests.
///
/// Implementations can use real HTTP clients or mock responses for testing.
pub trait HttpExecutor: Send + Sync {
    /// Perform `request` against `endpoint`.
    ///
    /// In [`ResponseMode::Buffered`] the body is read in full and the
    /// connection goes back to the idle pool before returning, whatever the
    /// outcome. In [`ResponseMode::Streaming`] the connection stays checked
    /// out inside the returned [`ResponseStream`].
    fn execute(
        &self,
        endpoint: &Endpoint,
        request: &RequestDescriptor,
        mode: ResponseMode,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production HTTP executor using reqwest.
pub struct ReqwestExecutor {
    client: Client,
    retry: RetryPolicy,
}

impl ReqwestExecutor {
    /// Create a new executor with the given timeout.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        Self::with_settings(Some(timeout), None, RetryPolicy::none())
    }

    /// Create with default timeout of 30 seconds.
    pub fn with_default_timeout() -> Result<Self, Error> {
        Self::new(Duration::from_secs(30))
    }

    /// `timeout` bounds both connecting and each read; `max_connections`
    /// caps idle connections kept per node.
    pub fn with_settings(
        timeout: Option<Duration>,
        max_connections: Option<usize>,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }
        if let Some(max) = max_connections {
            builder = builder.pool_max_idle_per_host(max);
        }

        Ok(Self {
            client: builder.build()?,
            retry,
        })
    }

    fn build_headers(request: &RequestDescriptor) -> Result<HeaderMap, TransportError> {
        let invalid = |e: &dyn std::fmt::Display| TransportError::InvalidRequest {
            message: e.to_string(),
        };

        let mut headers = HeaderMap::new();
        if let Some(body) = request.body() {
            let value = HeaderValue::try_from(body.content_type.as_str()).map_err(|e| invalid(&e))?;
            headers.insert(CONTENT_TYPE, value);
        }
        // Names differing only in case collapse into one header; sorting
        // makes the surviving value deterministic (the last in byte order).
        let mut caller: Vec<_> = request.headers().iter().collect();
        caller.sort();
        for (name, value) in caller {
            let header_name = HeaderName::try_from(name.as_str()).map_err(|e| invalid(&e))?;
            let header_value = HeaderValue::try_from(value.as_str()).map_err(|e| invalid(&e))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    fn send(
        &self,
        endpoint: &Endpoint,
        request: &RequestDescriptor,
    ) -> Result<Response, TransportError> {
        let mut url = endpoint
            .url()
            .map_err(|e| TransportError::InvalidRequest {
                message: e.to_string(),
            })?;
        url.set_path(request.path());
        url.set_query(request.query_string().as_deref());

        let headers = Self::build_headers(request)?;
        let method: http::Method = request.method().into();

        let mut retries = 0;
        loop {
            let mut req_builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = request.body() {
                req_builder = req_builder.body(body.bytes.clone());
            }

            debug!(%endpoint, method = %request.method(), %url, "sending request");
            match req_builder.send() {
                Ok(response) => return Ok(response),
                Err(e) if e.is_builder() => {
                    return Err(TransportError::InvalidRequest {
                        message: e.to_string(),
                    })
                }
                Err(e)
                    if e.is_connect()
                        && request.method().is_idempotent()
                        && retries < self.retry.max_retries =>
                {
                    retries += 1;
                    debug!(%endpoint, retries, error = %e, "retrying connection");
                }
                Err(e) => {
                    return Err(TransportError::Request {
                        endpoint: endpoint.clone(),
                        source: e,
                    })
                }
            }
        }
    }
}

/// Collect response headers, lowercased, joining repeated ones with ", ".
/// Values that are not visible ASCII (UTF-8 user metadata) are decoded
/// lossily.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        let value = value.as_ref();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

impl HttpExecutor for ReqwestExecutor {
    fn execute(
        &self,
        endpoint: &Endpoint,
        request: &RequestDescriptor,
        mode: ResponseMode,
    ) -> Result<HttpResponse, TransportError> {
        let response = self.send(endpoint, request)?;

        let status = response.status().as_u16();
        let headers = header_map(response.headers());

        let mut result = HttpResponse {
            bucket: request.bucket().map(str::to_string),
            key: request.key().map(str::to_string),
            status,
            headers,
            body: None,
            stream: None,
        };

        if mode.is_streaming() {
            result.stream = Some(ResponseStream::new(response));
        } else {
            // Dropping `response` on any path returns the connection.
            let body = response.bytes().map_err(|e| TransportError::Request {
                endpoint: endpoint.clone(),
                source: e,
            })?;
            result.body = Some(body);
        }

        Ok(result)
    }
}
