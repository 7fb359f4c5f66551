//! What the client does with an error before the caller sees it.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::types::HttpResponse;

/// Intercepts client errors instead of letting them propagate.
///
/// Returning `Ok(())` swallows the error and the operation yields a
/// zero-status [`HttpResponse::placeholder`]. Returning `Err` (the same error
/// or a substitute) propagates it to the caller.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: Error) -> Result<(), Error>;
}

impl<F> ErrorHandler for F
where
    F: Fn(Error) -> Result<(), Error> + Send + Sync,
{
    fn handle(&self, error: Error) -> Result<(), Error> {
        self(error)
    }
}

/// Fixed at client construction.
#[derive(Clone, Default)]
pub enum ErrorStrategy {
    /// Return every error to the caller.
    #[default]
    Propagate,
    /// Hand every error to the handler first.
    Handle(Arc<dyn ErrorHandler>),
}

impl ErrorStrategy {
    pub fn handler(handler: impl ErrorHandler + 'static) -> Self {
        ErrorStrategy::Handle(Arc::new(handler))
    }

    /// Route `error` through the strategy.
    pub fn toss(&self, error: Error) -> Result<HttpResponse, Error> {
        match self {
            ErrorStrategy::Propagate => Err(error),
            ErrorStrategy::Handle(handler) => {
                handler.handle(error)?;
                Ok(HttpResponse::placeholder())
            }
        }
    }
}

impl fmt::Debug for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::Propagate => f.write_str("Propagate"),
            ErrorStrategy::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}
