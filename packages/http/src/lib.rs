//! # riak-http
//!
//! Blocking client for the Riak REST interface that survives node failure.
//!
//! A client is either *direct* (every request goes to the node in
//! [`ClientConfig::url`]) or *failover* (requests go to a pool of nodes
//! seeded from [`ClientConfig::failover_urls`]). In failover mode a node that
//! fails at the transport level is evicted from the pool and the request is
//! retried on the next one, at most once per node the pool held when the
//! call started.
//!
//! ```ignore
//! use riak_http::{ClientBuilder, ClientConfig, Error};
//!
//! let client = ClientBuilder::new(ClientConfig::failover(
//!     ["http://10.0.0.1:8098", "http://10.0.0.2:8098", "http://10.0.0.3:8098"],
//!     Some("http://10.0.0.1:8098/riak"),
//! ))
//! .error_handler(|e: Error| -> Result<(), Error> {
//!     eprintln!("riak call failed: {e}");
//!     Ok(())
//! })
//! .build()?;
//!
//! let response = client.fetch("people", "alice", None, false)?;
//! if response.is_placeholder() {
//!     // every node was down; the handler already saw the error
//! }
//! ```
//!
//! ## Layers
//!
//! - [`HttpExecutor`] performs one round-trip against one [`Endpoint`].
//!   [`ReqwestExecutor`] is the production implementation.
//! - [`Dispatcher`] turns a logical call into attempts:
//!   [`DirectDispatcher`] makes one, [`FailoverCoordinator`] walks the
//!   [`EndpointPool`].
//! - [`RiakHttpClient`] builds [`RequestDescriptor`]s for the Riak
//!   operations and routes failures through its [`ErrorStrategy`].

pub mod client;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod failover;
pub mod handler;
pub mod object;
pub mod pool;
pub mod request;
pub mod types;

pub use client::{ClientBuilder, RiakHttpClient};
pub use config::ClientConfig;
pub use dispatch::{DirectDispatcher, Dispatcher};
pub use endpoint::Endpoint;
pub use error::{Error, TransportError};
pub use executor::{HttpExecutor, ReqwestExecutor, RetryPolicy};
pub use failover::FailoverCoordinator;
pub use handler::{ErrorHandler, ErrorStrategy};
pub use object::{Link, RiakObject};
pub use pool::{DuplicatePolicy, EndpointPool, RoundRobin, Selection, SelectionPolicy, StickyHead};
pub use request::{CancelToken, RequestDescriptor, RequestMeta};
pub use types::{Body, HttpResponse, Method, ResponseMode, ResponseStream};
