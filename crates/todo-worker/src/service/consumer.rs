//! # Queue Consumer
//!
//! One loop per queue. Each delivery runs as its own task; at most
//! `prefetch` run at once.

use crate::config::MAX_PREFETCH;
use crate::handler::RequestHandler;
use crate::service::dispatch::Dispatcher;
use shared_bus::{BrokerTransport, Consumer};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

pub struct QueueConsumer<H, T: ?Sized> {
    dispatcher: Arc<Dispatcher<H, T>>,
    prefetch: usize,
}

impl<H, T> QueueConsumer<H, T>
where
    H: RequestHandler,
    T: BrokerTransport + ?Sized + 'static,
{
    /// `prefetch` is clamped to `1..=MAX_PREFETCH`.
    pub fn new(dispatcher: Arc<Dispatcher<H, T>>, prefetch: usize) -> Self {
        Self {
            dispatcher,
            prefetch: prefetch.clamp(1, MAX_PREFETCH),
        }
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Consume until `shutdown` flips to true or the consumer closes, then
    /// wait for in-flight deliveries to settle.
    pub async fn run(self, mut consumer: Consumer, mut shutdown: watch::Receiver<bool>) {
        let queue = self.dispatcher.queue().queue_name();
        let permits = Arc::new(Semaphore::new(self.prefetch));
        info!(queue = queue, prefetch = self.prefetch, "Queue consumer started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                delivery = consumer.next() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        warn!(queue = queue, "Consumer closed by broker");
                        break;
                    }
                },
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                let outcome = dispatcher.dispatch(delivery).await;
                debug!(outcome = outcome.label(), "Delivery settled");
                drop(permit);
            });
        }

        // Every permit back means every spawned delivery has settled.
        let in_flight = self.prefetch - permits.available_permits();
        if in_flight > 0 {
            debug!(queue = queue, in_flight = in_flight, "Draining in-flight deliveries");
        }
        match u32::try_from(self.prefetch) {
            Ok(all) => {
                let _ = permits.acquire_many(all).await;
            }
            Err(_) => warn!(queue = queue, "Prefetch exceeds permit range, skipping drain"),
        }
        info!(queue = queue, "Queue consumer stopped");
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
