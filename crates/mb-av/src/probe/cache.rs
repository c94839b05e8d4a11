//! Bounded, single-flight cache of [`ProbeResult`]s.
//!
//! Concurrent requests for the same uncached path share one underlying probe.
//! Results are installed atomically on success; failures leave nothing behind
//! so the next request probes again. Eviction is strict FIFO by insertion
//! order: reading an entry never refreshes it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use mb_core::{Error, Result};
use parking_lot::Mutex;

use super::{ProbeResult, Prober};

type SharedProbe = Shared<BoxFuture<'static, std::result::Result<Arc<ProbeResult>, Arc<Error>>>>;

/// Outcome of a non-blocking cache lookup.
pub enum CacheLookup {
    /// The result is cached.
    Ready(Arc<ProbeResult>),
    /// A probe for this path is in flight.
    Pending(PendingProbe),
    /// Nothing is known about this path.
    Absent,
}

/// Handle to an in-flight probe started by another caller.
pub struct PendingProbe {
    path: PathBuf,
    future: SharedProbe,
}

impl PendingProbe {
    /// Wait for the in-flight probe to finish.
    pub async fn wait(self) -> Result<Arc<ProbeResult>> {
        self.future
            .await
            .map_err(|e| shared_error(&self.path, &e))
    }
}

/// Bounded FIFO cache of probe results with request coalescing.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ProbeCache {
    inner: Arc<Inner>,
}

struct Inner {
    prober: Arc<dyn Prober>,
    capacity: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, Arc<ProbeResult>>,
    /// Insertion order; the front is evicted first.
    order: VecDeque<PathBuf>,
    pending: HashMap<PathBuf, SharedProbe>,
}

impl CacheState {
    fn install(&mut self, path: PathBuf, result: Arc<ProbeResult>, capacity: usize) {
        if self.entries.contains_key(&path) {
            self.entries.insert(path, result);
            return;
        }
        while self.entries.len() >= capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::trace!(path = %oldest.display(), "Evicted probe cache entry");
        }
        self.order.push_back(path.clone());
        self.entries.insert(path, result);
    }
}

impl ProbeCache {
    /// Create a cache holding at most `capacity` results (minimum 1).
    pub fn new(prober: Arc<dyn Prober>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                prober,
                capacity: capacity.max(1),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Maximum number of cached results.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether the cache holds no results.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `path` without starting a probe.
    pub fn get(&self, path: &Path) -> CacheLookup {
        let state = self.inner.state.lock();
        if let Some(result) = state.entries.get(path) {
            return CacheLookup::Ready(result.clone());
        }
        match state.pending.get(path) {
            Some(future) => CacheLookup::Pending(PendingProbe {
                path: path.to_path_buf(),
                future: future.clone(),
            }),
            None => CacheLookup::Absent,
        }
    }

    /// Return the cached result for `path`, joining an in-flight probe or
    /// starting a new one as needed.
    pub async fn probe(&self, path: &Path) -> Result<Arc<ProbeResult>> {
        let future = {
            let mut state = self.inner.state.lock();
            if let Some(result) = state.entries.get(path) {
                return Ok(result.clone());
            }
            match state.pending.get(path) {
                Some(future) => future.clone(),
                None => {
                    let future = self.start_probe(path.to_path_buf());
                    state.pending.insert(path.to_path_buf(), future.clone());
                    future
                }
            }
        };

        future.await.map_err(|e| shared_error(path, &e))
    }

    /// Run the probe on its own task so the pending entry is always resolved,
    /// even if every caller stops waiting.
    ///
    /// Must be called with the state lock held: the task takes the same lock
    /// before touching `pending`, so it cannot finish before its own entry
    /// has been inserted.
    fn start_probe(&self, path: PathBuf) -> SharedProbe {
        let inner = self.inner.clone();
        let task_path = path.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!(
                path = %task_path.display(),
                prober = inner.prober.name(),
                "Probing media file"
            );
            let outcome = inner.prober.probe(&task_path).await;

            let mut state = inner.state.lock();
            state.pending.remove(&task_path);
            match outcome {
                Ok(result) => {
                    let result = Arc::new(result);
                    state.install(task_path, result.clone(), inner.capacity);
                    Ok(result)
                }
                Err(e) => {
                    tracing::warn!(path = %task_path.display(), error = %e, "Probe failed");
                    Err(Arc::new(e))
                }
            }
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(Arc::new(Error::probe(&path, format!("probe task failed: {e}"))))
            })
        }
        .boxed()
        .shared()
    }
}

/// Rebuild an owned error for one waiter from the shared failure.
fn shared_error(path: &Path, err: &Error) -> Error {
    match err {
        Error::ProbeFailure { message, .. } => Error::probe(path, message.clone()),
        other => Error::probe(path, other.to_string()),
    }
}
