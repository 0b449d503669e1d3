//! Deferred-deletion scheduler (spec.md §4.8): delays object deletions by
//! a configurable window so late-opening readers and just-resurrected
//! writers don't observe a vanished predecessor.

use crate::config::BucketPrefix;
use crate::error::Result;
use crate::object_store_client::ObjectStoreClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct PendingKey {
    bucket: String,
    prefix: String,
    key: String,
}

/// A single in-process map `{object-key -> earliest-delete-time}` guarded
/// by one mutex; critical sections are O(log N) (spec.md §5).
pub struct DeferredDeleteScheduler {
    store: Arc<ObjectStoreClient>,
    delay: Duration,
    pending: Mutex<HashMap<PendingKey, Instant>>,
}

impl DeferredDeleteScheduler {
    pub fn new(store: Arc<ObjectStoreClient>, delay: Duration) -> Arc<Self> {
        Arc::new(DeferredDeleteScheduler {
            store,
            delay,
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn pending_key(prefix: &BucketPrefix, key: &str) -> PendingKey {
        PendingKey {
            bucket: prefix.bucket.clone(),
            prefix: prefix.prefix.clone(),
            key: key.to_string(),
        }
    }

    /// Enqueue `key` for deletion at `now + delay`.
    pub fn enqueue(&self, prefix: &BucketPrefix, key: &str) {
        let deadline = Instant::now() + self.delay;
        self.pending
            .lock()
            .insert(Self::pending_key(prefix, key), deadline);
    }

    /// Cancel a pending delete because the same key was re-created before
    /// its deadline (spec.md §4.8: "the SAME key is re-created before its
    /// deadline, the pending delete is CANCELLED"). Returns whether there
    /// actually was a pending delete to cancel.
    pub fn cancel(&self, prefix: &BucketPrefix, key: &str) -> bool {
        self.pending.lock().remove(&Self::pending_key(prefix, key)).is_some()
    }

    pub fn is_pending(&self, prefix: &BucketPrefix, key: &str) -> bool {
        self.pending.lock().contains_key(&Self::pending_key(prefix, key))
    }

    /// Issue deletes for every entry whose deadline has passed. Called by
    /// the background worker on each wake; transient failures are logged
    /// and simply retried on the next wake (spec.md §7).
    pub async fn sweep(&self) -> Result<()> {
        let now = Instant::now();
        let due: Vec<PendingKey> = {
            let pending = self.pending.lock();
            pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(key, _)| key.clone())
                .collect()
        };

        for entry in due {
            let prefix = BucketPrefix::new(entry.bucket.clone(), entry.prefix.clone());
            match self.store.delete(&prefix, &entry.key).await {
                Ok(()) => {
                    self.pending.lock().remove(&entry);
                }
                Err(err) => {
                    tracing::warn!(key = %entry.key, error = %err, "deferred delete failed, will retry on next sweep");
                }
            }
        }
        Ok(())
    }

    /// Run `sweep` on a fixed interval until `running` goes false
    /// (cooperative shutdown, spec.md §5). Intended to be spawned as a
    /// background task per open database.
    pub async fn run(self: Arc<Self>, running: Arc<std::sync::atomic::AtomicBool>) {
        use std::sync::atomic::Ordering;
        // Wake more often than the delay so cancellations are observed
        // promptly; never less often than once a second.
        let tick = (self.delay / 4).max(Duration::from_millis(1)).min(Duration::from_secs(1));
        while running.load(Ordering::Relaxed) {
            tokio::time::sleep(tick).await;
            if let Err(err) = self.sweep().await {
                tracing::warn!(error = %err, "deferred-delete sweep failed");
            }
        }
    }
}
