use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// One Riak node eligible to receive requests.
///
/// Identity is `(host, port)`: two endpoints that differ only in `secure`
/// name the same node.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Parse an endpoint out of a node URL such as `http://10.0.0.1:8098/riak`.
    ///
    /// Only scheme, host and port are kept. A missing port falls back to the
    /// scheme default.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidEndpoint {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let secure = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::InvalidEndpoint {
                    url: url.to_string(),
                    message: format!("unsupported scheme '{}'", other),
                })
            }
        };

        let host = parsed.host_str().ok_or_else(|| Error::InvalidEndpoint {
            url: url.to_string(),
            message: "missing host".to_string(),
        })?;

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidEndpoint {
                url: url.to_string(),
                message: "missing port".to_string(),
            })?;

        Ok(Self::new(host, port, secure))
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// True when this endpoint names the node at `host:port`.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    /// Root URL of the node, with an empty path.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.to_string())
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.host, other.port)
    }
}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}
