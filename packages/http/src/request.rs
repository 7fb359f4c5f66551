//! Caller-facing request metadata and the immutable descriptor built from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use url::form_urlencoded;

use crate::constants::HDR_CLIENT_ID;
use crate::error::Error;
use crate::types::{Body, Method};

/// Cooperative cancellation for one or more logical calls.
///
/// Cancellation is observed before each attempt; an attempt already on the
/// wire runs to completion or timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Extra headers and query parameters a caller attaches to an operation.
///
/// Operations only fill in defaults for names the caller left unset.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    headers: HashMap<String, String>,
    query_params: Vec<(String, String)>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header. Names are case-sensitive; the last write wins. Names
    /// that differ only in case go out as one header carrying the value of
    /// the name that sorts last.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Set a query parameter, keeping its original position if it was
    /// already present.
    pub fn set_query_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.query_params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.query_params.push((name, value)),
        }
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_query_param(name, value);
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// Encoded `name=value&...` form of the query parameters, in order.
    pub fn query_string(&self) -> String {
        encode_query(&self.query_params)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.header(HDR_CLIENT_ID)
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.set_header(HDR_CLIENT_ID, client_id);
    }

    /// Give up on the whole logical call once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// Everything needed to perform one logical call, minus the endpoint.
///
/// Built by the client operations and never modified once handed to a
/// dispatcher.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    existing_query: Option<String>,
    bucket: Option<String>,
    key: Option<String>,
    headers: HashMap<String, String>,
    query_params: Vec<(String, String)>,
    body: Option<Body>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl RequestDescriptor {
    /// `target` is an absolute path, optionally followed by `?query`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, existing_query) = match target.split_once('?') {
            Some((path, query)) if !query.is_empty() => (path, Some(query.to_string())),
            Some((path, _)) => (path, None),
            None => (target, None),
        };

        Self {
            method,
            path: path.to_string(),
            existing_query,
            bucket: None,
            key: None,
            headers: HashMap::new(),
            query_params: Vec::new(),
            body: None,
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_object(mut self, bucket: Option<&str>, key: Option<&str>) -> Self {
        self.bucket = bucket.map(str::to_string);
        self.key = key.map(str::to_string);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Fold the caller's metadata in. Headers overwrite, query parameters
    /// are appended after any already present.
    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.headers.extend(meta.headers);
        self.query_params.extend(meta.query_params);
        if let Some(deadline) = meta.deadline {
            self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        }
        if meta.cancel.is_some() {
            self.cancel = meta.cancel;
        }
        self
    }

    /// Apply a per-call budget unless the caller already set a tighter one.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        }
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The query string to send: whatever the target already carried,
    /// then the descriptor's own parameters, joined by `&`.
    pub fn query_string(&self) -> Option<String> {
        let params = encode_query(&self.query_params);
        match (&self.existing_query, params.is_empty()) {
            (None, true) => None,
            (None, false) => Some(params),
            (Some(existing), true) => Some(existing.clone()),
            (Some(existing), false) => Some(format!("{}&{}", existing, params)),
        }
    }

    /// Fail if the call was cancelled or ran out of time before attempt
    /// number `attempts + 1`.
    pub fn ensure_live(&self, attempts: usize) -> Result<(), Error> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled { attempts });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded { attempts });
        }
        Ok(())
    }
}
