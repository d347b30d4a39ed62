//! # Dispatcher
//!
//! Per-delivery state machine:
//!
//! ```text
//! Received ──decode/validate fails──────────────────────────► DeadLettered
//!    │
//!    ▼
//! Validated ──► Handled ──reply + ack ok──────────────────────► Acked
//!                  │
//!                  └──infrastructure fault──┬─ retry < max ───► RequeuedForRetry
//!                                           └─ retry >= max ──► DeadLettered
//! ```
//!
//! Every decision is made from the delivery's own envelope. Each delivery is
//! settled at most once; a refused `nack` ends in `Unsettled` and the broker
//! redelivers the message when the channel closes.

use crate::error::InfrastructureError;
use crate::handler::RequestHandler;
use bytes::Bytes;
use futures::FutureExt;
use shared_bus::{BrokerError, BrokerTransport, Delivery, DeliveryTag, DEFAULT_EXCHANGE};
use shared_types::{MessageProperties, RetryCount, TodoQueue, TodoResponse, Validate, ValidationError};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use todo_telemetry::WORKER_DISPATCH;
use tracing::{debug, error, info, warn, Instrument};

/// Why a message went to its dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The body could not be decoded or failed validation. Never retried.
    Invalid(ValidationError),
    /// An infrastructure fault hit a message whose retry budget was spent.
    RetriesExhausted {
        retry_count: RetryCount,
        error: InfrastructureError,
    },
}

/// Final state of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acked,
    /// Back on the main queue; `retry_count` is what the next delivery carries.
    RequeuedForRetry { retry_count: RetryCount },
    DeadLettered { reason: DeadLetterReason },
    /// The broker refused the `nack` meant to requeue or dead-letter.
    Unsettled { requeue: bool, error: BrokerError },
}

impl DispatchOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Acked => "acked",
            DispatchOutcome::RequeuedForRetry { .. } => "requeued",
            DispatchOutcome::DeadLettered { .. } => "dead_lettered",
            DispatchOutcome::Unsettled { .. } => "unsettled",
        }
    }
}

pub struct Dispatcher<H, T: ?Sized> {
    handler: H,
    transport: Arc<T>,
    max_retries: u32,
}

impl<H, T> Dispatcher<H, T>
where
    H: RequestHandler,
    T: BrokerTransport + ?Sized,
{
    pub fn new(handler: H, transport: Arc<T>, max_retries: u32) -> Self {
        Self {
            handler,
            transport,
            max_retries,
        }
    }

    pub fn queue(&self) -> TodoQueue {
        self.handler.queue()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Drive one delivery to its final state.
    pub async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let queue = self.handler.queue().queue_name();
        let span = tracing::info_span!(
            "dispatch",
            queue = queue,
            delivery_tag = delivery.tag,
            retry_count = delivery.retry_count().get(),
            correlation_id = delivery.properties().correlation_id.as_deref().unwrap_or(""),
        );

        let outcome = self.run(delivery).instrument(span).await;
        WORKER_DISPATCH
            .with_label_values(&[queue, outcome.label()])
            .inc();
        outcome
    }

    async fn run(&self, delivery: Delivery) -> DispatchOutcome {
        let tag = delivery.tag;
        let retry_count = delivery.retry_count();

        let request = match decode::<H::Request>(delivery.body()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejecting invalid request");
                let outcome = DispatchOutcome::DeadLettered {
                    reason: DeadLetterReason::Invalid(e),
                };
                return self.settle(tag, false, outcome).await;
            }
        };

        match self.handle_and_reply(delivery.properties(), tag, request).await {
            Ok(()) => DispatchOutcome::Acked,
            Err(e) if retry_count.is_exhausted(self.max_retries) => {
                error!(
                    error = %e,
                    max_retries = self.max_retries,
                    "Retries exhausted, dead-lettering"
                );
                let outcome = DispatchOutcome::DeadLettered {
                    reason: DeadLetterReason::RetriesExhausted {
                        retry_count,
                        error: e,
                    },
                };
                self.settle(tag, false, outcome).await
            }
            Err(e) => {
                let next = retry_count.next();
                warn!(error = %e, next_retry_count = next.get(), "Requeueing for retry");
                let outcome = DispatchOutcome::RequeuedForRetry { retry_count: next };
                self.settle(tag, true, outcome).await
            }
        }
    }

    /// Validated → Handled → reply → ack. Any error is an infrastructure fault.
    async fn handle_and_reply(
        &self,
        properties: &MessageProperties,
        tag: DeliveryTag,
        request: H::Request,
    ) -> Result<(), InfrastructureError> {
        let outcome = AssertUnwindSafe(self.handler.handle(request))
            .catch_unwind()
            .await
            .map_err(|panic| InfrastructureError::HandlerPanicked(panic_message(panic.as_ref())))?;

        if !outcome.is_ok() {
            debug!("Handler reported an application failure");
        }
        let response = outcome.into_response();

        match properties.reply_route() {
            Some((reply_to, correlation_id)) => {
                let body = serde_json::to_vec(&response)
                    .map_err(|e| InfrastructureError::ReplyEncoding(e.to_string()))?;
                self.transport
                    .publish(
                        DEFAULT_EXCHANGE,
                        reply_to,
                        MessageProperties::reply(correlation_id),
                        Bytes::from(body),
                    )
                    .await?;
                debug!(reply_to = reply_to, success = response.is_success(), "Reply published");
            }
            None => {
                info!(
                    success = response.is_success(),
                    "No reply destination or correlation ID, result discarded"
                );
            }
        }

        self.transport.ack(tag).await?;
        Ok(())
    }

    /// Negative acknowledgement. Returns `settled` only if the broker took
    /// the `nack`.
    async fn settle(
        &self,
        tag: DeliveryTag,
        requeue: bool,
        settled: DispatchOutcome,
    ) -> DispatchOutcome {
        match self.transport.nack(tag, requeue).await {
            Ok(()) => settled,
            Err(error) => {
                error!(error = %error, requeue = requeue, "Failed to settle delivery");
                DispatchOutcome::Unsettled { requeue, error }
            }
        }
    }
}

fn decode<R>(body: &[u8]) -> Result<R, ValidationError>
where
    R: serde::de::DeserializeOwned + Validate,
{
    let request: R =
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    request.validate()?;
    Ok(request)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
