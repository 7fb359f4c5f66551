//! Client configuration.
//!
//! A [`ClientConfig`] is plain data and can be loaded from JSON:
//!
//! ```
//! use riak_http::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "url": "http://10.0.0.1:8098/riak",
//!     "failover_urls": ["http://10.0.0.1:8098", "http://10.0.0.2:8098"],
//!     "timeout_ms": 2000
//! }"#).unwrap();
//! assert!(config.is_failover());
//! assert_eq!(config.mapreduce_url().unwrap(), "http://10.0.0.1:8098/mapred");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::{Position, Url};

use crate::constants::{DEFAULT_MAPRED_PATH, DEFAULT_URL};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::executor::RetryPolicy;
use crate::pool::{DuplicatePolicy, Selection};

/// Everything a [`RiakHttpClient`](crate::RiakHttpClient) needs to know
/// about where and how to talk to Riak.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL objects live under, e.g. `http://127.0.0.1:8098/riak`.
    pub url: String,

    /// Path of the map-reduce resource on the same host.
    pub mapred_path: String,

    /// Connect and read timeout of a single attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Idle connections kept per node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Transport-level resend policy for idempotent methods.
    pub retry: RetryPolicy,

    /// Candidate nodes. Non-empty selects failover dispatch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failover_urls: Vec<String>,

    /// Time budget of a whole logical call, across all attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    /// Whether the failover pool keeps repeated nodes.
    pub duplicates: DuplicatePolicy,

    /// How the failover pool picks the node for each attempt.
    pub selection: Selection,

    /// Client id to send with writes; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            mapred_path: DEFAULT_MAPRED_PATH.to_string(),
            timeout_ms: None,
            max_connections: None,
            retry: RetryPolicy::none(),
            failover_urls: Vec::new(),
            deadline_ms: None,
            duplicates: DuplicatePolicy::default(),
            selection: Selection::default(),
            client_id: None,
        }
    }
}

impl ClientConfig {
    /// Direct configuration against the single node `url` points at.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Failover configuration over `urls`. `prefix` is the object base URL
    /// (only its path matters once failover picks the host); it defaults to
    /// [`DEFAULT_URL`].
    pub fn failover<S: Into<String>>(
        urls: impl IntoIterator<Item = S>,
        prefix: Option<&str>,
    ) -> Self {
        Self {
            url: prefix.unwrap_or(DEFAULT_URL).to_string(),
            failover_urls: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parse and [`validate`](Self::validate) a JSON config. Missing fields
    /// take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// True when requests go through the failover pool.
    pub fn is_failover(&self) -> bool {
        !self.failover_urls.is_empty()
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Per-call deadline.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    fn parsed_url(&self) -> Result<Url, Error> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidEndpoint {
            url: self.url.clone(),
            message: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidEndpoint {
                url: self.url.clone(),
                message: "not a hierarchical URL".to_string(),
            });
        }
        Ok(url)
    }

    /// Scheme, host and port of `url`, e.g. `http://127.0.0.1:8098`.
    pub fn base_url(&self) -> Result<String, Error> {
        let url = self.parsed_url()?;
        Ok(url[..Position::BeforePath].to_string())
    }

    /// Path part of `url`, e.g. `/riak`.
    pub fn prefix(&self) -> Result<String, Error> {
        let url = self.parsed_url()?;
        Ok(url.path().trim_end_matches('/').to_string())
    }

    /// Absolute map-reduce URL on the host of `url`.
    pub fn mapreduce_url(&self) -> Result<String, Error> {
        Ok(format!("{}{}", self.base_url()?, self.mapred_path))
    }

    /// The node `url` itself points at; used when not failing over.
    pub fn endpoint(&self) -> Result<Endpoint, Error> {
        Endpoint::parse(&self.url)
    }

    /// Request target for a bucket, an object, or something below an object.
    ///
    /// Bucket and key are percent-encoded path segments; `extra` (a link-walk
    /// spec) is appended verbatim. A query string on `url` is carried along.
    pub fn object_target(
        &self,
        bucket: &str,
        key: Option<&str>,
        extra: Option<&str>,
    ) -> Result<String, Error> {
        let url = self.object_url(bucket, key)?;
        let mut target = url.path().to_string();
        if let Some(extra) = extra {
            target.push('/');
            target.push_str(extra.trim_start_matches('/'));
        }
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        Ok(target)
    }

    /// Encoded path of a bucket or object, without any query. This is the
    /// form used inside `Link` headers.
    pub fn object_path(&self, bucket: &str, key: Option<&str>) -> Result<String, Error> {
        Ok(self.object_url(bucket, key)?.path().to_string())
    }

    fn object_url(&self, bucket: &str, key: Option<&str>) -> Result<Url, Error> {
        let mut url = self.parsed_url()?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    /// Fail fast on anything that would only surface mid-request.
    pub fn validate(&self) -> Result<(), Error> {
        self.parsed_url()?;
        if !self.mapred_path.starts_with('/') {
            return Err(Error::InvalidConfig {
                message: format!("mapred_path '{}' must start with '/'", self.mapred_path),
            });
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::InvalidConfig {
                message: "timeout_ms must be positive".to_string(),
            });
        }
        for url in &self.failover_urls {
            Endpoint::parse(url)?;
        }
        if !self.is_failover() {
            self.endpoint()?;
        }
        Ok(())
    }
}
