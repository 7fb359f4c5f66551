//! The live set of Riak nodes for one client.
//!
//! The pool is shared between every thread issuing requests through the
//! client. Its lock is only held for the duration of a single
//! add/remove/select, never across a network call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::endpoint::Endpoint;

/// What `add` does with an endpoint whose `(host, port)` is already pooled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Ignore the second add.
    #[default]
    Reject,
    /// Keep both entries. Each copy counts towards the attempt budget of a
    /// call, so duplicates act as weighting.
    Allow,
}

/// Chooses which pooled endpoint serves the next attempt.
pub trait SelectionPolicy: Send + Sync {
    /// Pick an endpoint out of the current snapshot. `None` only when empty.
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;

    /// Told about every endpoint the coordinator gave up on.
    fn on_failure(&self, _endpoint: &Endpoint) {}
}

/// Always use the head of the pool until it is evicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct StickyHead;

impl SelectionPolicy for StickyHead {
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        endpoints.first().cloned()
    }
}

/// Walk the pool in order, one endpoint per selection.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl SelectionPolicy for RoundRobin {
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.get(index).cloned()
    }
}

/// Serializable name of a built-in selection policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// [`StickyHead`]
    #[default]
    StickyHead,
    /// [`RoundRobin`]
    RoundRobin,
}

impl Selection {
    /// A fresh instance of the named policy.
    pub fn policy(self) -> Arc<dyn SelectionPolicy> {
        match self {
            Selection::StickyHead => Arc::new(StickyHead),
            Selection::RoundRobin => Arc::new(RoundRobin::default()),
        }
    }
}

/// Called once for every entry taken out of the pool.
pub type RemovalHook = Arc<dyn Fn(&Endpoint) + Send + Sync>;

/// Ordered, thread-safe collection of candidate endpoints.
///
/// `add`, `remove`, `peek`, `select` and `len` are the whole surface. There
/// is no iterator; `snapshot` hands out a copy.
pub struct EndpointPool {
    endpoints: RwLock<Vec<Endpoint>>,
    duplicates: DuplicatePolicy,
    policy: Arc<dyn SelectionPolicy>,
    on_remove: Option<RemovalHook>,
}

impl EndpointPool {
    /// An empty pool that rejects duplicates and sticks to its head.
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            duplicates: DuplicatePolicy::default(),
            policy: Arc::new(StickyHead),
            on_remove: None,
        }
    }

    /// Set the [`DuplicatePolicy`] used by `add`.
    pub fn with_duplicates(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Set the [`SelectionPolicy`] used by `select`.
    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Install a hook run after each removal (alerting, metrics, ...).
    pub fn with_removal_hook(mut self, hook: RemovalHook) -> Self {
        self.on_remove = Some(hook);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Endpoint>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.endpoints.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Endpoint>> {
        self.endpoints.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an endpoint. Returns false if the duplicate policy refused it.
    pub fn add(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.write();
        if self.duplicates == DuplicatePolicy::Reject && endpoints.contains(&endpoint) {
            return false;
        }
        info!(endpoint = %endpoint, "adding riak endpoint");
        endpoints.push(endpoint);
        true
    }

    /// Remove every entry for `host:port`, running the removal hook once per
    /// entry removed. Returns how many were removed.
    pub fn remove(&self, host: &str, port: u16) -> usize {
        let removed: Vec<Endpoint> = {
            let mut endpoints = self.write();
            let (gone, kept): (Vec<Endpoint>, Vec<Endpoint>) =
                endpoints.drain(..).partition(|e| e.matches(host, port));
            *endpoints = kept;
            gone
        };

        for endpoint in &removed {
            info!(endpoint = %endpoint, "removed riak endpoint");
            if let Some(hook) = &self.on_remove {
                hook(endpoint);
            }
        }
        removed.len()
    }

    /// The head endpoint, without removing it. `None` when empty.
    pub fn peek(&self) -> Option<Endpoint> {
        self.read().first().cloned()
    }

    /// The endpoint the selection policy wants for the next attempt.
    pub fn select(&self) -> Option<Endpoint> {
        let endpoints = self.read();
        self.policy.select(&endpoints)
    }

    pub(crate) fn report_failure(&self, endpoint: &Endpoint) {
        self.policy.on_failure(endpoint);
    }

    /// Number of pooled entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current endpoints, in order.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.read().clone()
    }
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &*self.read())
            .field("duplicates", &self.duplicates)
            .finish()
    }
}
