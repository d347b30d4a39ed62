//! # Dead-Letter Flows
//!
//! How the worker settles deliveries it cannot answer:
//!
//! - invalid requests are dead-lettered on first delivery
//! - transient reply failures are retried with an incrementing retry count
//! - a request still failing once its retries are spent is dead-lettered

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use shared_bus::memory::FIRST_DEATH_QUEUE_HEADER;
    use shared_bus::{BrokerTransport, InMemoryBroker, DEFAULT_EXCHANGE};
    use shared_types::{
        GetTodosByUserIdRequest, GetTodosResponse, HeaderValue, MessageProperties, RetryCount,
        Todo,
    };
    use todo_rpc_client::{ClientConfig, RpcClient, RpcError};
    use todo_runtime::{RuntimeConfig, TodoRuntime};
    use todo_worker::testing::FaultyChannel;
    use todo_worker::{InMemoryTodoRepository, TodoRepository, TodoWorker, WorkerConfig};

    use crate::integration::support::wait_for_depth;

    const GET_BY_USER: &str = "todo.get_by_user";
    const GET_BY_USER_DLQ: &str = "todo.get_by_user.deadletter";

    async fn connect(broker: &InMemoryBroker) -> RpcClient {
        let channel: Arc<dyn BrokerTransport> = Arc::new(broker.channel());
        RpcClient::connect(channel, ClientConfig::default())
            .await
            .unwrap()
    }

    // =========================================================================
    // VALIDATION FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_invalid_user_id_is_dead_lettered_without_retry() {
        let broker = InMemoryBroker::new();
        let runtime = TodoRuntime::start_with(
            &RuntimeConfig::default(),
            broker.clone(),
            Arc::new(InMemoryTodoRepository::new()),
        )
        .await
        .unwrap();

        let result: Result<GetTodosResponse, RpcError> = runtime
            .client()
            .send(
                &GetTodosByUserIdRequest { user_id: 0 },
                GET_BY_USER,
                Some(Duration::from_millis(200)),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());

        wait_for_depth(&broker, GET_BY_USER_DLQ, 1).await;
        assert_eq!(broker.queue_depth(GET_BY_USER), Some(0));
        assert_eq!(broker.unacked_count(), 0);

        let inspector = broker.channel();
        let mut dead = inspector.consume(GET_BY_USER_DLQ).await.unwrap();
        let delivery = dead.recv().await.unwrap();
        assert_eq!(delivery.retry_count(), RetryCount::ZERO);
        assert_eq!(
            delivery.properties().headers.get(FIRST_DEATH_QUEUE_HEADER),
            Some(&HeaderValue::from(GET_BY_USER))
        );
        inspector.ack(delivery.tag).await.unwrap();

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_body_is_dead_lettered() {
        let broker = InMemoryBroker::new();
        let runtime = TodoRuntime::start_with(
            &RuntimeConfig::default(),
            broker.clone(),
            Arc::new(InMemoryTodoRepository::new()),
        )
        .await
        .unwrap();

        let producer = broker.channel();
        producer
            .publish(
                DEFAULT_EXCHANGE,
                "todo.create",
                MessageProperties::default(),
                Bytes::from_static(b"{\"todo\": \"not an object\""),
            )
            .await
            .unwrap();

        wait_for_depth(&broker, "todo.create.deadletter", 1).await;
        assert_eq!(broker.queue_depth("todo.create"), Some(0));
        assert_eq!(broker.queue_depth(GET_BY_USER_DLQ), Some(0));
        runtime.shutdown().await;
    }

    // =========================================================================
    // INFRASTRUCTURE FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_reply_failures_are_retried_until_delivered() {
        let broker = InMemoryBroker::new();
        let faulty = Arc::new(FaultyChannel::new(broker.channel(), 2));
        let repository = Arc::new(InMemoryTodoRepository::new());
        let stored = repository.create(Todo::new(42, "renew passport")).await.unwrap();

        let worker = TodoWorker::start(
            Arc::clone(&faulty) as Arc<dyn BrokerTransport>,
            repository,
            WorkerConfig::default(),
        )
        .await
        .unwrap();
        let client = connect(&broker).await;

        let response: GetTodosResponse = client
            .send(
                &GetTodosByUserIdRequest { user_id: 42 },
                GET_BY_USER,
                Some(Duration::from_millis(5000)),
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.todos, vec![stored]);
        // Attempts at retry counts 0 and 1 failed, 2 went through.
        assert_eq!(faulty.publish_attempts(), 3);
        assert_eq!(broker.queue_depth(GET_BY_USER_DLQ), Some(0));

        client.shutdown().await;
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter_the_request() {
        let broker = InMemoryBroker::new();
        let faulty = Arc::new(FaultyChannel::new(broker.channel(), u32::MAX));
        let worker = TodoWorker::start(
            Arc::clone(&faulty) as Arc<dyn BrokerTransport>,
            Arc::new(InMemoryTodoRepository::new()),
            WorkerConfig::default(),
        )
        .await
        .unwrap();
        let client = connect(&broker).await;

        let result: Result<GetTodosResponse, RpcError> = client
            .send(
                &GetTodosByUserIdRequest { user_id: 42 },
                GET_BY_USER,
                Some(Duration::from_millis(300)),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());

        wait_for_depth(&broker, GET_BY_USER_DLQ, 1).await;
        // One first attempt plus three retries, never a fourth requeue.
        assert_eq!(faulty.publish_attempts(), 4);
        assert_eq!(broker.queue_depth(GET_BY_USER), Some(0));

        let inspector = broker.channel();
        let mut dead = inspector.consume(GET_BY_USER_DLQ).await.unwrap();
        let delivery = dead.recv().await.unwrap();
        assert_eq!(delivery.retry_count(), RetryCount::new(3));

        client.shutdown().await;
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_custom_retry_budget_is_honoured() {
        let broker = InMemoryBroker::new();
        let faulty = Arc::new(FaultyChannel::new(broker.channel(), u32::MAX));
        let worker = TodoWorker::start(
            Arc::clone(&faulty) as Arc<dyn BrokerTransport>,
            Arc::new(InMemoryTodoRepository::new()),
            WorkerConfig::default().with_max_retries(1),
        )
        .await
        .unwrap();
        let client = connect(&broker).await;

        let _ = client
            .send::<_, GetTodosResponse>(
                &GetTodosByUserIdRequest { user_id: 7 },
                GET_BY_USER,
                Some(Duration::from_millis(100)),
            )
            .await;

        wait_for_depth(&broker, GET_BY_USER_DLQ, 1).await;
        assert_eq!(faulty.publish_attempts(), 2);

        client.shutdown().await;
        worker.shutdown().await;
    }
}
