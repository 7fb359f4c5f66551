//! Retrying a logical call across the endpoint pool.
//!
//! The attempt budget of a call is the pool size observed when the call
//! starts. Every failed endpoint is evicted from the pool before the next
//! attempt, so a call makes at most one attempt per endpoint it knew about
//! and always terminates, even while other threads add or remove nodes.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, TransportError};
use crate::executor::HttpExecutor;
use crate::pool::EndpointPool;
use crate::request::RequestDescriptor;
use crate::types::{HttpResponse, ResponseMode};

/// A [`Dispatcher`] that tries pooled endpoints in turn, evicting each one
/// that fails, until a response comes back or the budget runs out.
pub struct FailoverCoordinator {
    executor: Arc<dyn HttpExecutor>,
    pool: Arc<EndpointPool>,
}

impl FailoverCoordinator {
    pub fn new(executor: Arc<dyn HttpExecutor>, pool: Arc<EndpointPool>) -> Self {
        Self { executor, pool }
    }

    /// The pool this coordinator selects from and evicts into.
    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    fn exhausted(attempts: usize, last: Option<TransportError>) -> Error {
        let last_error = last.as_ref().map(|e| e.to_string());
        error!(attempts, ?last_error, "no live riak servers");
        Error::Exhausted {
            attempts,
            source: last,
        }
    }
}

impl Dispatcher for FailoverCoordinator {
    fn dispatch(
        &self,
        request: &RequestDescriptor,
        mode: ResponseMode,
    ) -> Result<HttpResponse, Error> {
        let budget = self.pool.len();
        let mut attempts = 0;
        let mut last: Option<TransportError> = None;

        loop {
            if self.pool.is_empty() {
                return Err(Self::exhausted(attempts, last));
            }
            request.ensure_live(attempts)?;

            let outcome = match self.pool.select() {
                Some(endpoint) => {
                    debug!(
                        %endpoint,
                        attempt = attempts + 1,
                        budget,
                        path = request.path(),
                        "attempting request"
                    );
                    self.executor
                        .execute(&endpoint, request, mode)
                        .map_err(|e| (Some(endpoint), e))
                }
                // Emptied by another thread between the check and the select.
                None => Err((None, TransportError::NoEndpoint)),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err((_, e)) if !e.is_retryable() => return Err(Error::Transport(e)),
                Err((endpoint, e)) => {
                    if let Some(endpoint) = endpoint {
                        warn!(%endpoint, error = %e, "evicting riak endpoint");
                        self.pool.report_failure(&endpoint);
                        self.pool.remove(&endpoint.host, endpoint.port);
                    }
                    last = Some(e);
                }
            }

            attempts += 1;
            if attempts >= budget {
                return Err(Self::exhausted(attempts, last));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::executor::mock::MockExecutor;
    use crate::pool::{DuplicatePolicy, Selection, SelectionPolicy};
    use crate::request::{CancelToken, RequestMeta};
    use crate::types::Method;
    use std::time::Duration;

    fn node(name: &str) -> Endpoint {
        Endpoint::new(name, 8098, false)
    }

    fn pool(names: &[&str]) -> Arc<EndpointPool> {
        let pool = EndpointPool::new();
        for name in names {
            pool.add(node(name));
        }
        Arc::new(pool)
    }

    fn fetch() -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, "/riak/b/k").with_object(Some("b"), Some("k"))
    }

    #[test]
    fn all_endpoints_refusing_exhausts_after_one_attempt_each() {
        let executor = Arc::new(
            MockExecutor::new()
                .refuse("a", 8098)
                .refuse("b", 8098)
                .refuse("c", 8098),
        );
        let pool = pool(&["a", "b", "c"]);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let err = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap_err();

        match err {
            Error::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.unwrap().endpoint(), Some(&node("c")));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(executor.attempts(), vec![node("a"), node("b"), node("c")]);
        assert!(pool.is_empty());
    }

    #[test]
    fn fails_over_to_first_live_endpoint() {
        let executor = Arc::new(
            MockExecutor::new()
                .refuse("a", 8098)
                .refuse("b", 8098)
                .with_response("/riak/b/k", 200, "value"),
        );
        let pool = pool(&["a", "b", "c", "d"]);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let response = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.header("server"), Some("http://c:8098"));
        assert_eq!(executor.attempts().len(), 3);
        assert_eq!(pool.snapshot(), vec![node("c"), node("d")]);
    }

    #[test]
    fn empty_pool_makes_no_attempt() {
        let executor = Arc::new(MockExecutor::new());
        let coordinator = FailoverCoordinator::new(executor.clone(), pool(&[]));

        let err = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap_err();

        assert!(matches!(
            err,
            Error::Exhausted {
                attempts: 0,
                source: None
            }
        ));
        assert_eq!(
            err.to_string(),
            "No live riak servers available to handle this request"
        );
        assert!(executor.attempts().is_empty());
    }

    struct NeverSelects;

    impl SelectionPolicy for NeverSelects {
        fn select(&self, _endpoints: &[Endpoint]) -> Option<Endpoint> {
            None
        }
    }

    #[test]
    fn policy_selecting_nothing_spends_budget_without_eviction() {
        let executor = Arc::new(MockExecutor::new());
        let pool = EndpointPool::new().with_policy(Arc::new(NeverSelects));
        for name in ["a", "b", "c"] {
            pool.add(node(name));
        }
        let pool = Arc::new(pool);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let err = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap_err();

        assert!(matches!(
            err,
            Error::Exhausted {
                attempts: 3,
                source: Some(TransportError::NoEndpoint)
            }
        ));
        assert!(executor.attempts().is_empty());
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn success_keeps_pool_intact() {
        let executor = Arc::new(MockExecutor::new().with_response("/riak/b/k", 200, "v"));
        let pool = pool(&["a", "b"]);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        for _ in 0..3 {
            coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap();
        }
        assert_eq!(executor.attempts(), vec![node("a"); 3]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn invalid_request_aborts_without_eviction() {
        let executor = Arc::new(MockExecutor::new().reject_requests("bad header"));
        let pool = pool(&["a", "b"]);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let err = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap_err();

        assert!(matches!(
            err,
            Error::Transport(TransportError::InvalidRequest { .. })
        ));
        assert_eq!(executor.attempts().len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn duplicates_inflate_budget_but_are_evicted_together() {
        let executor = Arc::new(MockExecutor::new().refuse("a", 8098));
        let pool = EndpointPool::new().with_duplicates(DuplicatePolicy::Allow);
        pool.add(node("a"));
        pool.add(node("a"));
        pool.add(node("b"));
        let pool = Arc::new(pool);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let response = coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(executor.attempts(), vec![node("a"), node("b")]);
        assert_eq!(pool.snapshot(), vec![node("b")]);
    }

    #[test]
    fn round_robin_policy_spreads_successes() {
        let executor = Arc::new(MockExecutor::new());
        let pool = EndpointPool::new().with_policy(Selection::RoundRobin.policy());
        pool.add(node("a"));
        pool.add(node("b"));
        let coordinator = FailoverCoordinator::new(executor.clone(), Arc::new(pool));

        coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap();
        coordinator.dispatch(&fetch(), ResponseMode::Buffered).unwrap();

        assert_eq!(executor.attempts(), vec![node("a"), node("b")]);
    }

    #[test]
    fn deadline_is_checked_between_attempts() {
        let executor = Arc::new(
            MockExecutor::new()
                .refuse("a", 8098)
                .refuse("b", 8098)
                .with_delay(Duration::from_millis(30)),
        );
        let pool = pool(&["a", "b", "c"]);
        let coordinator = FailoverCoordinator::new(executor.clone(), pool.clone());

        let request = fetch().with_meta(RequestMeta::new().with_timeout(Duration::from_millis(10)));
        let err = coordinator.dispatch(&request, ResponseMode::Buffered).unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded { attempts: 1 }));
        assert_eq!(executor.attempts(), vec![node("a")]);
        assert_eq!(pool.snapshot(), vec![node("b"), node("c")]);
    }

    #[test]
    fn cancelled_call_makes_no_attempt() {
        let executor = Arc::new(MockExecutor::new());
        let coordinator = FailoverCoordinator::new(executor.clone(), pool(&["a"]));
        let token = CancelToken::new();
        token.cancel();

        let request = fetch().with_meta(RequestMeta::new().with_cancel_token(token));
        let err = coordinator.dispatch(&request, ResponseMode::Buffered).unwrap_err();

        assert!(matches!(err, Error::Cancelled { attempts: 0 }));
        assert!(executor.attempts().is_empty());
    }

    #[test]
    fn streaming_connection_stays_open_until_caller_releases() {
        let executor = Arc::new(
            MockExecutor::new()
                .refuse("a", 8098)
                .with_response("/riak/b/k", 200, "streamed"),
        );
        let coordinator = FailoverCoordinator::new(executor.clone(), pool(&["a", "b"]));

        let mut response = coordinator.dispatch(&fetch(), ResponseMode::Streaming).unwrap();

        assert!(response.body.is_none());
        assert_eq!(executor.open_streams(), 1);
        response.close();
        assert_eq!(executor.open_streams(), 0);
    }

    #[test]
    fn concurrent_calls_terminate() {
        let executor = Arc::new(
            MockExecutor::new()
                .refuse("a", 8098)
                .refuse("b", 8098)
                .refuse("c", 8098)
                .with_delay(Duration::from_millis(2)),
        );
        let pool = pool(&["a", "b", "c"]);
        let coordinator = Arc::new(FailoverCoordinator::new(executor.clone(), pool.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                std::thread::spawn(move || coordinator.dispatch(&fetch(), ResponseMode::Buffered))
            })
            .collect();
        for handle in handles {
            let err = handle.join().unwrap().unwrap_err();
            assert!(err.is_exhausted());
        }
        assert!(pool.is_empty());
        assert!(executor.attempts().len() <= 4 * 3);
    }
}
