use crate::endpoint::Endpoint;

/// A failure during a single physical attempt against one endpoint.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error talking to {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("no endpoint available")]
    NoEndpoint,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl TransportError {
    /// Whether another endpoint could plausibly serve the same request.
    ///
    /// A request that cannot even be built fails the same way everywhere,
    /// so it is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest { .. })
    }

    /// The endpoint the attempt was made against, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            TransportError::Request { endpoint, .. } | TransportError::Io { endpoint, .. } => {
                Some(endpoint)
            }
            TransportError::NoEndpoint | TransportError::InvalidRequest { .. } => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("No live riak servers available to handle this request")]
    Exhausted {
        attempts: usize,
        #[source]
        source: Option<TransportError>,
    },

    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: usize },

    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },

    #[error("unexpected response {status}: {message}")]
    Response { status: u16, message: String },

    #[error("malformed riak url: {url} ({message})")]
    InvalidEndpoint { url: String, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the errors that mean no endpoint could be reached.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::Exhausted { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidEndpoint { .. } | Error::InvalidConfig { .. })
    }
}
