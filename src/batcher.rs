//! Coalesces keyed lookups issued within a short window into one bulk call.
//!
//! Callers `add` a key and await its value. The first key of a cycle
//! schedules a flush `delay` later; the flush hands every queued key, in
//! arrival order, to the batch function and fans the results back out by
//! position. A batch is all-or-nothing: if the batch function fails, every
//! caller in that flush receives the same error.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(10);

pub type BatchFn<K, V, E> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<V>, E>> + Send + Sync>;

#[derive(Error, Debug)]
pub enum BatchError<E> {
    #[error("Batch request failed: {0}")]
    Failed(Arc<E>),

    #[error("Batch returned {returned} results, none for position {position}")]
    MissingResult { position: usize, returned: usize },

    #[error("Batch was dropped before it completed")]
    Dropped,
}

struct PendingRequest<K, V, E> {
    key: K,
    reply: oneshot::Sender<Result<V, BatchError<E>>>,
}

struct BatchQueue<K, V, E> {
    pending: Vec<PendingRequest<K, V, E>>,
    flush_scheduled: bool,
}

struct BatcherInner<K, V, E> {
    name: String,
    batch_fn: BatchFn<K, V, E>,
    delay: Duration,
    queue: Mutex<BatchQueue<K, V, E>>,
}

pub struct RequestBatcher<K, V, E> {
    inner: Arc<BatcherInner<K, V, E>>,
}

impl<K, V, E> Clone for RequestBatcher<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> RequestBatcher<K, V, E>
where
    K: Send + 'static,
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    pub fn new<F>(name: impl Into<String>, delay: Duration, batch_fn: F) -> Self
    where
        F: Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<V>, E>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BatcherInner {
                name: name.into(),
                batch_fn: Arc::new(batch_fn),
                delay,
                queue: Mutex::new(BatchQueue {
                    pending: Vec::new(),
                    flush_scheduled: false,
                }),
            }),
        }
    }

    /// queue `key` for the next flush and wait for its result
    pub async fn add(&self, key: K) -> Result<V, BatchError<E>> {
        let (reply, receiver) = oneshot::channel();

        let schedule = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push(PendingRequest { key, reply });
            !std::mem::replace(&mut queue.flush_scheduled, true)
        };

        if schedule {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.delay).await;
                inner.flush().await;
            });
        }

        receiver.await.unwrap_or(Err(BatchError::Dropped))
    }

    /// number of keys waiting for the next flush
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }
}

impl<K, V, E> BatcherInner<K, V, E> {
    async fn flush(&self) {
        let pending = {
            let mut queue = self.queue.lock();
            queue.flush_scheduled = false;
            std::mem::take(&mut queue.pending)
        };
        if pending.is_empty() {
            return;
        }

        let (keys, replies): (Vec<K>, Vec<_>) = pending.into_iter().map(|p| (p.key, p.reply)).unzip();
        let batch_len = keys.len();
        tracing::trace!(batcher = %self.name, keys = batch_len, "Flushing batch");

        match (self.batch_fn)(keys).await {
            Ok(values) => {
                let returned = values.len();
                if returned != batch_len {
                    tracing::warn!(
                        batcher = %self.name,
                        expected = batch_len,
                        returned,
                        "Batch function returned a mismatched number of results"
                    );
                }
                let mut values = values.into_iter();
                for (position, reply) in replies.into_iter().enumerate() {
                    let result = values
                        .next()
                        .ok_or(BatchError::MissingResult { position, returned });
                    // caller may have gone away
                    let _ = reply.send(result);
                }
            }
            Err(err) => {
                tracing::debug!(batcher = %self.name, keys = batch_len, "Batch function failed");
                let err = Arc::new(err);
                for reply in replies {
                    let _ = reply.send(Err(BatchError::Failed(Arc::clone(&err))));
                }
            }
        }
    }
}
