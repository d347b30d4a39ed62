//! Correlation Table - maps correlation IDs to callers awaiting a reply.
//!
//! Every entry is resolved at most once: whichever of `complete`, `expire`,
//! `cancel` or `clear` removes it first wins, and resolution only ever
//! happens after removal.

use crate::domain::correlation::CorrelationId;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use todo_telemetry::{RPC_PENDING, RPC_REPLIES_DROPPED};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Raw reply handed to a waiting caller.
#[derive(Debug)]
pub struct PendingReply {
    pub correlation_id: CorrelationId,
    pub body: Bytes,
    /// Time between registration and resolution
    pub response_time: Duration,
}

/// A caller waiting for its reply
struct PendingRequest {
    sender: oneshot::Sender<PendingReply>,
    created_at: Instant,
    /// Queue the request went to (for logging)
    destination: String,
}

/// Counters for the correlation table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved with a reply
    pub total_completed: AtomicU64,
    /// Total requests that gave up waiting
    pub total_timeouts: AtomicU64,
    /// Total requests removed without a reply (publish failure, caller gone)
    pub total_cancelled: AtomicU64,
    /// Total replies nobody was waiting for
    pub total_dropped: AtomicU64,
}

/// Thread-safe registry of in-flight calls, owned by one RPC client.
///
/// Flow:
/// 1. `register()` before publishing, keeping the receiver
/// 2. the reply listener calls `complete()` for each reply
/// 3. the caller awaits the receiver or calls `expire()` on timeout
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<CorrelationId, PendingRequest>,
    stats: PendingStats,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call to `destination` under a fresh correlation id.
    pub fn register(&self, destination: &str) -> (CorrelationId, oneshot::Receiver<PendingReply>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            correlation_id,
            PendingRequest {
                sender: tx,
                created_at: Instant::now(),
                destination: destination.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        RPC_PENDING.inc();

        debug!(
            correlation_id = %correlation_id,
            destination = destination,
            "Registered pending request"
        );

        (correlation_id, rx)
    }

    /// Resolve the call registered under `correlation_id` with `body`.
    ///
    /// Returns false when no caller receives the reply (unknown id, already
    /// resolved, or the caller went away); such replies count as dropped.
    pub fn complete(&self, correlation_id: CorrelationId, body: Bytes) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            self.record_dropped();
            debug!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation ID dropped"
            );
            return false;
        };
        RPC_PENDING.dec();

        let response_time = pending.created_at.elapsed();
        let reply = PendingReply {
            correlation_id,
            body,
            response_time,
        };

        match pending.sender.send(reply) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    destination = %pending.destination,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                self.record_dropped();
                debug!(
                    correlation_id = %correlation_id,
                    destination = %pending.destination,
                    "Caller gone before its reply arrived"
                );
                false
            }
        }
    }

    /// Remove an entry whose caller stopped waiting on its deadline.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        if self.remove(correlation_id) {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove an entry without resolving it.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.remove(correlation_id) {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop every entry. Waiting callers observe a closed channel.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Count a reply that could not be matched to any entry.
    pub fn record_dropped(&self) {
        self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
        RPC_REPLIES_DROPPED.inc();
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Number of calls currently awaiting a reply
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    fn remove(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            RPC_PENDING.dec();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = CorrelationTable::new();

        let (correlation_id, rx) = table.register("todo.get_by_user");
        assert!(table.contains(&correlation_id));
        assert_eq!(table.len(), 1);

        assert!(table.complete(correlation_id, Bytes::from_static(b"{}")));

        let reply = rx.await.unwrap();
        assert_eq!(reply.correlation_id, correlation_id);
        assert_eq!(reply.body, Bytes::from_static(b"{}"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_complete_twice_resolves_once() {
        let table = CorrelationTable::new();
        let (correlation_id, _rx) = table.register("todo.create");

        assert!(table.complete(correlation_id, Bytes::from_static(b"1")));
        assert!(!table.complete(correlation_id, Bytes::from_static(b"2")));
        assert_eq!(load(&table.stats().total_completed), 1);
        assert_eq!(load(&table.stats().total_dropped), 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let table = CorrelationTable::new();
        assert!(!table.complete(CorrelationId::new(), Bytes::new()));
        assert_eq!(load(&table.stats().total_dropped), 1);
    }

    #[tokio::test]
    async fn test_complete_after_caller_dropped() {
        let table = CorrelationTable::new();
        let (correlation_id, rx) = table.register("todo.create");
        drop(rx);

        assert!(!table.complete(correlation_id, Bytes::new()));
        assert!(table.is_empty());
        assert_eq!(load(&table.stats().total_dropped), 1);
    }

    #[tokio::test]
    async fn test_expire_then_late_reply_is_dropped() {
        let table = CorrelationTable::new();
        let (correlation_id, _rx) = table.register("todo.get_by_user");

        assert!(table.expire(&correlation_id));
        assert!(!table.contains(&correlation_id));
        assert!(!table.complete(correlation_id, Bytes::new()));

        assert_eq!(load(&table.stats().total_timeouts), 1);
        assert_eq!(load(&table.stats().total_dropped), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let table = CorrelationTable::new();

        let (correlation_id, _rx) = table.register("todo.create");
        assert!(table.cancel(&correlation_id));
        assert!(!table.contains(&correlation_id));

        // Cancel again should return false
        assert!(!table.cancel(&correlation_id));
        assert_eq!(load(&table.stats().total_cancelled), 1);
    }

    #[tokio::test]
    async fn test_clear_closes_waiting_receivers() {
        let table = CorrelationTable::new();
        let (_a, rx_a) = table.register("todo.create");
        let (_b, rx_b) = table.register("todo.get_by_user");

        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert!(rx_a.await.is_err());
        assert!(rx_b.await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_complete_races_resolve_once() {
        let table = Arc::new(CorrelationTable::new());
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..64 {
            let (id, rx) = table.register("todo.get_by_user");
            ids.push(id);
            receivers.push(rx);
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let table = Arc::clone(&table);
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                ids.into_iter()
                    .filter(|id| table.complete(*id, Bytes::from_static(b"ok")))
                    .count()
            }));
        }

        let mut resolved = 0;
        for handle in handles {
            resolved += handle.await.unwrap();
        }
        assert_eq!(resolved, 64);
        assert!(table.is_empty());
        for rx in receivers {
            assert_eq!(rx.await.unwrap().body, Bytes::from_static(b"ok"));
        }
    }
}
