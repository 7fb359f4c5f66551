//! Turning one logical call into one or more executor attempts.

use std::sync::Arc;

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::executor::HttpExecutor;
use crate::request::RequestDescriptor;
use crate::types::{HttpResponse, ResponseMode};

/// Runs a logical call to completion: a response, or the error the caller
/// should see.
pub trait Dispatcher: Send + Sync {
    fn dispatch(
        &self,
        request: &RequestDescriptor,
        mode: ResponseMode,
    ) -> Result<HttpResponse, Error>;
}

/// Sends every request to a single fixed node.
pub struct DirectDispatcher {
    executor: Arc<dyn HttpExecutor>,
    endpoint: Endpoint,
}

impl DirectDispatcher {
    /// Dispatch through `executor` to `endpoint` only.
    pub fn new(executor: Arc<dyn HttpExecutor>, endpoint: Endpoint) -> Self {
        Self { executor, endpoint }
    }
}

impl Dispatcher for DirectDispatcher {
    fn dispatch(
        &self,
        request: &RequestDescriptor,
        mode: ResponseMode,
    ) -> Result<HttpResponse, Error> {
        request.ensure_live(0)?;
        debug!(endpoint = %self.endpoint, path = request.path(), "direct dispatch");
        self.executor
            .execute(&self.endpoint, request, mode)
            .map_err(Error::from)
    }
}
