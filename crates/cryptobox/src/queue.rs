//! Per-session operation queues
//!
//! Each session id maps to a FIFO mutex so at most one operation runs on a
//! session at a time. Queues for different ids are independent.

use std::future::Future;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Mutex as QueueLock;
use tracing::trace;

/// Lazily created queues, bounded by the number of idle entries kept
pub struct SessionQueues {
    queues: Mutex<LruCache<String, Arc<QueueLock<()>>>>,
    capacity: usize,
}

impl SessionQueues {
    /// Keep at most `capacity` queues once their backlog has drained
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(LruCache::unbounded()),
            capacity,
        }
    }

    /// Queue for `id`, created on first use
    pub fn queue(&self, id: &str) -> Arc<QueueLock<()>> {
        let mut queues = self.queues.lock();
        let queue = match queues.get(id) {
            Some(queue) => queue.clone(),
            None => {
                let queue = Arc::new(QueueLock::new(()));
                queues.put(id.to_string(), queue.clone());
                queue
            }
        };

        // Only queues nobody holds or waits on may go
        while queues.len() > self.capacity {
            let idle = queues
                .iter()
                .rev()
                .find(|(_, q)| Arc::strong_count(q) == 1)
                .map(|(k, _)| k.clone());
            match idle {
                Some(key) => {
                    queues.pop(&key);
                    trace!("Evicted idle queue {}", key);
                }
                None => break,
            }
        }
        queue
    }

    /// Run `op` once every earlier operation queued on `id` has finished
    pub async fn run<F, T>(&self, id: &str, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let queue = self.queue(id);
        let _turn = queue.lock().await;
        op.await
    }

    /// Number of queues currently cached
    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    /// Whether no queue is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached queue
    pub fn clear(&self) {
        self.queues.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_shares_queue() {
        let queues = SessionQueues::new(10);
        let a = queues.queue("alice");
        let b = queues.queue("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(queues.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_queues_evicted() {
        let queues = SessionQueues::new(2);
        let held = queues.queue("held");
        queues.queue("a");
        queues.queue("b");
        queues.queue("c");

        assert_eq!(queues.len(), 2);
        // The held queue survives eviction
        assert!(Arc::ptr_eq(&held, &queues.queue("held")));
    }

    #[tokio::test]
    async fn test_operations_serialized_in_order() {
        let queues = SessionQueues::new(10);
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow = queues.run("s", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            log.lock().push(1);
        });
        let fast = queues.run("s", async {
            log.lock().push(2);
        });
        futures::future::join(slow, fast).await;

        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_distinct_ids_run_concurrently() {
        let queues = SessionQueues::new(10);
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow = queues.run("a", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            log.lock().push("a");
        });
        let fast = queues.run("b", async {
            log.lock().push("b");
        });
        futures::future::join(slow, fast).await;

        assert_eq!(*log.lock(), vec!["b", "a"]);
    }
}
