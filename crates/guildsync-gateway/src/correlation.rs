//! Request/response correlation for multi-chunk responses.
//!
//! A caller registers a key (the guild id for member requests), sends its
//! request, and awaits the handle. The read loop feeds each response chunk
//! under the same key; the registration completes once its [`Completion`]
//! rule is met, or fails when its deadline elapses. Every registration is
//! settled exactly once, at the moment it leaves the registry, so a late chunk
//! after a timeout (or a timer firing after completion) finds nothing to act
//! on.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use guildsync_core::{GatewayError, GatewayResult};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::metrics::GATEWAY_CORRELATIONS_TOTAL;

// ─────────────────────────────────────────────────────────────────────────────
// Chunks and completion
// ─────────────────────────────────────────────────────────────────────────────

/// Progress observed by the feeder at the time a chunk was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Items held locally.
    pub have: u64,
    /// Items the remote says exist.
    pub want: u64,
}

/// One response chunk.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Raw chunk payload.
    pub payload: Value,
    /// Local progress after the chunk was applied, when the feeder tracks it.
    pub progress: Option<Progress>,
}

/// Rule deciding when a correlation has received everything.
pub enum Completion {
    /// Local progress reached the remote's count.
    ReachedTarget,
    /// The chunk's `chunk_index + 1` reached its `chunk_count`.
    FinalChunk,
    /// Custom predicate over the accumulated chunks.
    Custom(Box<dyn Fn(&[Chunk]) -> bool + Send + Sync>),
}

impl Completion {
    fn is_complete(&self, chunks: &[Chunk]) -> bool {
        let Some(last) = chunks.last() else {
            return false;
        };
        match self {
            Self::ReachedTarget => last.progress.is_some_and(|p| p.have >= p.want),
            Self::FinalChunk => {
                let index = last.payload.get("chunk_index").and_then(Value::as_u64);
                let count = last.payload.get("chunk_count").and_then(Value::as_u64);
                match (index, count) {
                    (Some(index), Some(count)) => index + 1 >= count,
                    // Without chunk metadata a single response is all there is.
                    _ => true,
                }
            }
            Self::Custom(predicate) => predicate(chunks),
        }
    }
}

/// Everything received for a completed correlation.
#[derive(Clone, Debug, Default)]
pub struct CorrelationResult {
    /// Chunks, in arrival order.
    pub chunks: Vec<Chunk>,
}

impl CorrelationResult {
    /// Items of array field `field`, flattened across chunks.
    pub fn items<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.chunks
            .iter()
            .filter_map(move |chunk| chunk.payload.get(field).and_then(Value::as_array))
            .flatten()
    }
}

/// What happened to a fed chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Accumulated; the correlation is still waiting.
    Pending,
    /// The chunk completed the correlation.
    Complete,
    /// Nothing is registered under the key.
    Unmatched,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

type Settle = oneshot::Sender<GatewayResult<CorrelationResult>>;

struct Pending {
    generation: u64,
    completion: Completion,
    chunks: Vec<Chunk>,
    settle: Settle,
    timer: Option<AbortHandle>,
}

impl Pending {
    fn complete(mut self) {
        let chunks = std::mem::take(&mut self.chunks);
        self.settle(Ok(CorrelationResult { chunks }));
    }

    fn settle(self, outcome: GatewayResult<CorrelationResult>) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        let label = match &outcome {
            Ok(_) => "complete",
            Err(GatewayError::CorrelationTimeout { .. }) => "timeout",
            Err(_) => "rejected",
        };
        counter!(GATEWAY_CORRELATIONS_TOTAL, "outcome" => label).increment(1);
        // The waiter may have given up; nothing to do then.
        let _ = self.settle.send(outcome);
    }
}

struct Inner<K> {
    pending: Mutex<HashMap<K, Pending>>,
    generation: AtomicU64,
}

/// Pending correlations keyed by `K`.
pub struct CorrelationRegistry<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for CorrelationRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for CorrelationRegistry<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> CorrelationRegistry<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register a correlation. Must be called within a Tokio runtime.
    ///
    /// Fails with [`GatewayError::DuplicateCorrelation`] while another
    /// correlation holds the same key.
    pub fn register(
        &self,
        key: K,
        completion: Completion,
        timeout: Duration,
    ) -> GatewayResult<CorrelationHandle> {
        let (settle, receiver) = oneshot::channel();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&key) {
                return Err(GatewayError::DuplicateCorrelation {
                    key: key.to_string(),
                });
            }
            let _ = pending.insert(
                key.clone(),
                Pending {
                    generation,
                    completion,
                    chunks: Vec::new(),
                    settle,
                    timer: None,
                },
            );
        }

        let weak = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                Self { inner }.expire(&timer_key, generation, timeout);
            }
        });

        // Attach the timer unless the correlation already settled.
        if let Some(entry) = self.inner.pending.lock().get_mut(&key) {
            if entry.generation == generation {
                entry.timer = Some(timer.abort_handle());
            }
        }

        debug!(key = %key, timeout_ms = timeout.as_millis(), "correlation registered");
        Ok(CorrelationHandle {
            key: key.to_string(),
            receiver,
        })
    }

    /// Feed one chunk to the correlation under `key`.
    pub fn feed(&self, key: &K, chunk: Chunk) -> FeedOutcome {
        let finished = {
            let mut pending = self.inner.pending.lock();
            let Some(entry) = pending.get_mut(key) else {
                return FeedOutcome::Unmatched;
            };
            entry.chunks.push(chunk);
            if !entry.completion.is_complete(&entry.chunks) {
                return FeedOutcome::Pending;
            }
            pending.remove(key)
        };

        if let Some(entry) = finished {
            debug!(key = %key, chunks = entry.chunks.len(), "correlation complete");
            entry.complete();
        }
        FeedOutcome::Complete
    }

    /// Reject the correlation under `key`, if any.
    pub fn cancel(&self, key: &K, error: GatewayError) -> bool {
        let removed = self.inner.pending.lock().remove(key);
        match removed {
            Some(entry) => {
                entry.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every pending correlation (session shutdown or resync).
    pub fn reject_all(&self, error: &GatewayError) -> usize {
        let drained: Vec<(K, Pending)> = self.inner.pending.lock().drain().collect();
        let count = drained.len();
        for (key, entry) in drained {
            debug!(key = %key, error = %error, "correlation rejected");
            entry.settle(Err(error.clone()));
        }
        count
    }

    /// Whether a correlation is pending under `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Number of pending correlations.
    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, key: &K, generation: u64, timeout: Duration) {
        let expired = {
            let mut pending = self.inner.pending.lock();
            match pending.get(key) {
                Some(entry) if entry.generation == generation => pending.remove(key),
                _ => None,
            }
        };
        if let Some(entry) = expired {
            warn!(key = %key, timeout_ms = timeout.as_millis(), chunks = entry.chunks.len(), "correlation timed out");
            entry.settle(Err(GatewayError::CorrelationTimeout {
                key: key.to_string(),
                timeout,
            }));
        }
    }
}

/// Awaitable side of a registration.
#[derive(Debug)]
pub struct CorrelationHandle {
    key: String,
    receiver: oneshot::Receiver<GatewayResult<CorrelationResult>>,
}

impl CorrelationHandle {
    /// The rendered key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for completion, timeout, or rejection.
    pub async fn wait(self) -> GatewayResult<CorrelationResult> {
        self.receiver.await.unwrap_or(Err(GatewayError::SessionClosed))
    }
}
