//! Request batcher: coalesces compatible in-flight requests on
//! batch-eligible endpoints.
//!
//! A batch fires when either its pending list reaches `batch_size`, or
//! `batch_timeout` elapses since the first request in the batch was
//! enqueued. Responses are returned in enqueue order; a batch-level error
//! propagates to every caller in the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::errors::CoreError;

type BatchResult<T> = Result<T, CoreError>;

struct PendingEntry<Req, Resp> {
    request: Req,
    reply: oneshot::Sender<BatchResult<Resp>>,
}

struct PendingBatch<Req, Resp> {
    entries: Vec<PendingEntry<Req, Resp>>,
}

impl<Req, Resp> Default for PendingBatch<Req, Resp> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

/// Coalesces requests sharing a batch key. `executor` receives the ordered
/// list of requests in a fired batch and returns one result per request, in
/// the same order (or a single `Err` that is propagated to every caller).
pub struct Batcher<Req, Resp> {
    batch_size: usize,
    batch_timeout: Duration,
    pending: Mutex<HashMap<String, Arc<Mutex<PendingBatch<Req, Resp>>>>>,
}

impl<Req, Resp> Batcher<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(batch_size: usize, batch_timeout: Duration) -> Self {
        Self { batch_size, batch_timeout, pending: Mutex::new(HashMap::new()) }
    }

    /// Enqueues `request` under `batch_key` and awaits its slice of the
    /// batch result once `executor` has run.
    pub async fn submit<F, Fut>(&self, batch_key: &str, request: Req, executor: F) -> BatchResult<Resp>
    where
        F: FnOnce(Vec<Req>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = BatchResult<Vec<BatchResult<Resp>>>> + Send,
    {
        let (tx, mut rx) = oneshot::channel();
        let is_first;
        let batch = {
            let mut pending = self.pending.lock();
            let batch = pending
                .entry(batch_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(PendingBatch::default())))
                .clone();
            let mut guard = batch.lock();
            is_first = guard.entries.is_empty();
            guard.entries.push(PendingEntry { request, reply: tx });
            let should_fire = guard.entries.len() >= self.batch_size;
            drop(guard);
            if should_fire {
                pending.remove(batch_key);
            }
            batch
        };

        let fired_now = {
            let guard = batch.lock();
            guard.entries.len() >= self.batch_size || guard.entries.is_empty()
        };

        if fired_now {
            self.fire(batch, executor).await;
        } else if is_first {
            // The batch-opening caller races its own reply against the
            // timeout, rather than blocking for the full `batch_timeout`
            // regardless of whether a later caller already filled the
            // batch and fired it early.
            tokio::select! {
                biased;
                reply = &mut rx => {
                    return reply.unwrap_or(Err(CoreError::internal(anyhow::anyhow!("batch executor dropped reply channel"))));
                }
                _ = sleep(self.batch_timeout) => {
                    let maybe_batch = self.pending.lock().remove(batch_key);
                    if let Some(batch) = maybe_batch {
                        self.fire(batch, executor).await;
                    }
                }
            }
        }

        rx.await.unwrap_or(Err(CoreError::internal(anyhow::anyhow!("batch executor dropped reply channel"))))
    }

    async fn fire<F, Fut>(&self, batch: Arc<Mutex<PendingBatch<Req, Resp>>>, executor: F)
    where
        F: FnOnce(Vec<Req>) -> Fut,
        Fut: std::future::Future<Output = BatchResult<Vec<BatchResult<Resp>>>>,
    {
        let entries = {
            let mut guard = batch.lock();
            std::mem::take(&mut guard.entries)
        };
        if entries.is_empty() {
            return;
        }
        let (requests, replies): (Vec<Req>, Vec<oneshot::Sender<BatchResult<Resp>>>) =
            entries.into_iter().map(|e| (e.request, e.reply)).unzip();

        match executor(requests).await {
            Ok(results) => {
                for (reply, result) in replies.into_iter().zip(results.into_iter()) {
                    let _ = reply.send(result);
                }
            }
            Err(err) => {
                let message = err.to_string();
                for reply in replies {
                    let _ = reply.send(Err(CoreError::Dependency(message.clone())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_immediately_at_batch_size() {
        let batcher: Batcher<i32, i32> = Batcher::new(2, Duration::from_secs(5));
        let a = batcher.submit("k", 1, |reqs| async move { Ok(reqs.into_iter().map(Ok).collect()) });
        let b = batcher.submit("k", 2, |reqs| async move { Ok(reqs.into_iter().map(Ok).collect()) });
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 2);
    }
}
