//! The Riak REST client.
//!
//! Every operation turns its arguments into a [`RequestDescriptor`], fills
//! in the defaults the caller left unset, and hands the descriptor to the
//! [`Dispatcher`] chosen at construction. Whatever goes wrong on the way is
//! routed through the client's [`ErrorStrategy`].
//!
//! ```ignore
//! use riak_http::{ClientBuilder, ClientConfig, RiakObject};
//!
//! let client = ClientBuilder::new(ClientConfig::failover(
//!     ["http://10.0.0.1:8098", "http://10.0.0.2:8098"],
//!     None,
//! ))
//! .build()?;
//!
//! client.store(&RiakObject::new("people", "alice", "{}"), None)?;
//! let response = client.fetch("people", "alice", None, false)?;
//! ```

use std::io;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::constants::{
    CTYPE_JSON, DEFAULT_R, HDR_ACCEPT, HDR_CONNECTION, HDR_CONTENT_TYPE, INCLUDE_KEYS, NO_KEYS,
    QP_KEYS, QP_R, STREAM_KEYS,
};
use crate::dispatch::{DirectDispatcher, Dispatcher};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::executor::{HttpExecutor, ReqwestExecutor};
use crate::failover::FailoverCoordinator;
use crate::handler::{ErrorHandler, ErrorStrategy};
use crate::object::RiakObject;
use crate::pool::{EndpointPool, RemovalHook};
use crate::request::{RequestDescriptor, RequestMeta};
use crate::types::{Body, HttpResponse, Method, ResponseMode, ResponseStream};

/// Builds a [`RiakHttpClient`] from a [`ClientConfig`] plus the pieces that
/// cannot live in a config file.
pub struct ClientBuilder {
    config: ClientConfig,
    strategy: ErrorStrategy,
    executor: Option<Arc<dyn HttpExecutor>>,
    on_remove: Option<RemovalHook>,
}

impl ClientBuilder {
    /// Start from `config`, propagating errors to the caller.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            strategy: ErrorStrategy::Propagate,
            executor: None,
            on_remove: None,
        }
    }

    /// How failed operations reach the caller.
    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shorthand for `error_strategy(ErrorStrategy::handler(handler))`.
    pub fn error_handler(self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_strategy(ErrorStrategy::handler(handler))
    }

    /// Use `executor` instead of a reqwest client built from the config.
    pub fn executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Called for every endpoint taken out of the failover pool.
    pub fn on_endpoint_removed(
        mut self,
        hook: impl Fn(&Endpoint) + Send + Sync + 'static,
    ) -> Self {
        self.on_remove = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// Malformed URLs fail here, never during a request.
    pub fn build(self) -> Result<RiakHttpClient, Error> {
        let config = self.config;
        config.validate()?;

        let executor: Arc<dyn HttpExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ReqwestExecutor::with_settings(
                config.timeout(),
                config.max_connections,
                config.retry,
            )?),
        };

        let dispatcher: Arc<dyn Dispatcher>;
        let mut pool = None;
        if config.is_failover() {
            let endpoints = config
                .failover_urls
                .iter()
                .map(|url| Endpoint::parse(url))
                .collect::<Result<Vec<_>, _>>()?;

            let mut endpoint_pool = EndpointPool::new()
                .with_duplicates(config.duplicates)
                .with_policy(config.selection.policy());
            if let Some(hook) = self.on_remove {
                endpoint_pool = endpoint_pool.with_removal_hook(hook);
            }
            for endpoint in endpoints {
                endpoint_pool.add(endpoint);
            }

            let endpoint_pool = Arc::new(endpoint_pool);
            dispatcher = Arc::new(FailoverCoordinator::new(executor, endpoint_pool.clone()));
            pool = Some(endpoint_pool);
        } else {
            dispatcher = Arc::new(DirectDispatcher::new(executor, config.endpoint()?));
        }

        let client_id = match &config.client_id {
            Some(id) => id.as_bytes().to_vec(),
            None => rand::thread_rng().gen::<[u8; 4]>().to_vec(),
        };

        Ok(RiakHttpClient {
            encoded_client_id: STANDARD.encode(&client_id),
            client_id,
            config,
            strategy: self.strategy,
            dispatcher,
            pool,
        })
    }
}

/// Blocking client for one Riak cluster.
///
/// Operations return the raw [`HttpResponse`] whatever its status; status
/// interpretation belongs to the caller. With an error handler installed, a
/// swallowed failure comes back as [`HttpResponse::placeholder`].
pub struct RiakHttpClient {
    config: ClientConfig,
    client_id: Vec<u8>,
    encoded_client_id: String,
    strategy: ErrorStrategy,
    dispatcher: Arc<dyn Dispatcher>,
    pool: Option<Arc<EndpointPool>>,
}

impl RiakHttpClient {
    /// A client with the default strategy and a reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Raw bytes of the id sent with writes.
    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    pub fn error_strategy(&self) -> &ErrorStrategy {
        &self.strategy
    }

    /// Route an error through the client's strategy, as the operations do.
    pub fn toss(&self, error: Error) -> Result<HttpResponse, Error> {
        self.strategy.toss(error)
    }

    /// Replace the bucket's properties with `schema` (`{}` when `None`).
    pub fn set_bucket_schema(
        &self,
        bucket: &str,
        schema: Option<&Value>,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            let mut meta = meta.unwrap_or_default();
            meta.set_header(HDR_ACCEPT, CTYPE_JSON);

            let body = match schema {
                Some(schema) => Body::json(schema),
                None => Body::json(&Value::Object(Default::default())),
            };
            let target = self.config.object_target(bucket, None, None)?;
            Ok(RequestDescriptor::new(Method::PUT, &target)
                .with_object(Some(bucket), None)
                .with_body(body)
                .with_meta(meta))
        })
    }

    /// Bucket properties without the key list.
    pub fn get_bucket_schema(
        &self,
        bucket: &str,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        let mut meta = meta.unwrap_or_default();
        if meta.query_param(QP_KEYS).is_none() {
            meta.set_query_param(QP_KEYS, NO_KEYS);
        }
        self.list_bucket(bucket, Some(meta), false)
    }

    /// Bucket properties and keys. With `stream`, keys are requested in
    /// chunks and the body is left on the connection.
    pub fn list_bucket(
        &self,
        bucket: &str,
        meta: Option<RequestMeta>,
        stream: bool,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::from_stream_flag(stream), || {
            let mut meta = meta.unwrap_or_default();
            if meta.query_param(QP_KEYS).is_none() {
                let keys = if stream { STREAM_KEYS } else { INCLUDE_KEYS };
                meta.set_query_param(QP_KEYS, keys);
            }
            set_default_header(&mut meta, HDR_CONTENT_TYPE, CTYPE_JSON);
            set_default_header(&mut meta, HDR_ACCEPT, CTYPE_JSON);

            let target = self.config.object_target(bucket, None, None)?;
            Ok(RequestDescriptor::new(Method::GET, &target)
                .with_object(Some(bucket), None)
                .with_meta(meta))
        })
    }

    pub fn store(
        &self,
        object: &RiakObject,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            let mut meta = meta.unwrap_or_default();
            if meta.client_id().is_none() {
                meta.set_client_id(self.encoded_client_id.as_str());
            }
            set_default_header(&mut meta, HDR_CONNECTION, "keep-alive");

            let body = object.write_to_request(&self.config, &mut meta)?;
            let target = self
                .config
                .object_target(object.bucket(), Some(object.key()), None)?;
            Ok(RequestDescriptor::new(Method::PUT, &target)
                .with_object(Some(object.bucket()), Some(object.key()))
                .with_body(body)
                .with_meta(meta))
        })
    }

    /// Headers of an object without its value.
    pub fn fetch_meta(
        &self,
        bucket: &str,
        key: &str,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            self.object_request(Method::HEAD, bucket, key, with_read_quorum(meta))
        })
    }

    pub fn fetch(
        &self,
        bucket: &str,
        key: &str,
        meta: Option<RequestMeta>,
        stream: bool,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::from_stream_flag(stream), || {
            self.object_request(Method::GET, bucket, key, with_read_quorum(meta))
        })
    }

    /// Fetch an object and hand its live body to `handler`.
    ///
    /// The connection is released when this returns, whatever the handler
    /// did. Returns the handler's verdict, or `false` if an installed error
    /// handler swallowed a failure.
    pub fn stream<F>(
        &self,
        bucket: &str,
        key: &str,
        handler: F,
        meta: Option<RequestMeta>,
    ) -> Result<bool, Error>
    where
        F: FnOnce(&HttpResponse, &mut ResponseStream) -> io::Result<bool>,
    {
        let mut response = self.call(ResponseMode::Streaming, || {
            self.object_request(Method::GET, bucket, key, with_read_quorum(meta))
        })?;

        let Some(mut stream) = response.take_stream() else {
            return Ok(false);
        };
        let outcome = handler(&response, &mut stream);
        drop(stream);
        debug!(bucket, key, "stream released");

        match outcome {
            Ok(verdict) => Ok(verdict),
            Err(e) => self.toss(Error::Io(e)).map(|_| false),
        }
    }

    pub fn delete(
        &self,
        bucket: &str,
        key: &str,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            self.object_request(Method::DELETE, bucket, key, meta.unwrap_or_default())
        })
    }

    /// Follow links from `bucket/key`. `walk_spec` is one or more
    /// `bucket,tag,keep` steps separated by `/`, used as-is.
    pub fn walk(
        &self,
        bucket: &str,
        key: &str,
        walk_spec: &str,
        meta: Option<RequestMeta>,
    ) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            let target = self
                .config
                .object_target(bucket, Some(key), Some(walk_spec))?;
            Ok(RequestDescriptor::new(Method::GET, &target)
                .with_object(Some(bucket), Some(key))
                .with_meta(meta.unwrap_or_default()))
        })
    }

    /// Submit a map-reduce job given as a JSON document.
    pub fn map_reduce(&self, job: &str, meta: Option<RequestMeta>) -> Result<HttpResponse, Error> {
        self.call(ResponseMode::Buffered, || {
            Ok(RequestDescriptor::new(Method::POST, &self.config.mapred_path)
                .with_body(Body::new(CTYPE_JSON, job.to_string()))
                .with_meta(meta.unwrap_or_default()))
        })
    }

    /// Add failover endpoints. Every URL is checked before any is added;
    /// returns how many were actually added.
    pub fn add_urls<S: AsRef<str>>(
        &self,
        urls: impl IntoIterator<Item = S>,
    ) -> Result<usize, Error> {
        let pool = self.pool()?;
        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint::parse(url.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(endpoints.into_iter().filter(|e| pool.add(e.clone())).count())
    }

    pub fn add_host(&self, host: &str, port: u16, secure: bool) -> Result<bool, Error> {
        Ok(self.pool()?.add(Endpoint::new(host, port, secure)))
    }

    /// Remove every endpoint for `host:port`; returns how many went.
    pub fn remove_host(&self, host: &str, port: u16) -> Result<usize, Error> {
        Ok(self.pool()?.remove(host, port))
    }

    /// The failover endpoints currently live, in selection order.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, Error> {
        Ok(self.pool()?.snapshot())
    }

    fn pool(&self) -> Result<&Arc<EndpointPool>, Error> {
        self.pool.as_ref().ok_or_else(|| Error::InvalidConfig {
            message: "client was not configured with failover urls".to_string(),
        })
    }

    fn object_request(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        meta: RequestMeta,
    ) -> Result<RequestDescriptor, Error> {
        let target = self.config.object_target(bucket, Some(key), None)?;
        Ok(RequestDescriptor::new(method, &target)
            .with_object(Some(bucket), Some(key))
            .with_meta(meta))
    }

    fn call(
        &self,
        mode: ResponseMode,
        build: impl FnOnce() -> Result<RequestDescriptor, Error>,
    ) -> Result<HttpResponse, Error> {
        let result = build().and_then(|request| {
            let request = request.with_default_timeout(self.config.deadline());
            self.dispatcher.dispatch(&request, mode)
        });
        result.or_else(|e| self.strategy.toss(e))
    }
}

impl std::fmt::Debug for RiakHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiakHttpClient")
            .field("url", &self.config.url)
            .field("pool", &self.pool)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn set_default_header(meta: &mut RequestMeta, name: &str, value: &str) {
    if meta.header(name).is_none() {
        meta.set_header(name, value);
    }
}

fn with_read_quorum(meta: Option<RequestMeta>) -> RequestMeta {
    let mut meta = meta.unwrap_or_default();
    if meta.query_param(QP_R).is_none() {
        meta.set_query_param(QP_R, DEFAULT_R.to_string());
    }
    meta
}
