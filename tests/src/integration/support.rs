//! # Test Fixtures
//!
//! Polling helpers shared by the integration flows. Fault doubles come from
//! `todo_worker::testing`.

use shared_bus::InMemoryBroker;
use std::time::Duration;

/// Poll until `condition` holds, panicking after five seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Wait until `queue` holds exactly `depth` ready messages.
pub async fn wait_for_depth(broker: &InMemoryBroker, queue: &str, depth: usize) {
    eventually(&format!("{queue} to reach depth {depth}"), || {
        broker.queue_depth(queue) == Some(depth)
    })
    .await;
}
