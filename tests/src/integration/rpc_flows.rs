//! # RPC Flows
//!
//! Request/reply between [`RpcClient`] and the worker over the in-memory
//! broker: round trips, timeouts, late and duplicate replies, and
//! concurrent callers sharing one client.
//!
//! [`RpcClient`]: todo_rpc_client::RpcClient

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::future::join_all;
    use shared_bus::{BrokerTransport, InMemoryBroker, QueueTopology, DEFAULT_EXCHANGE};
    use shared_types::{
        GetTodosByUserIdRequest, GetTodosResponse, MessageProperties, Todo, TodoQueue,
    };
    use todo_rpc_client::{ClientConfig, RpcClient, RpcError, TodoServiceError};
    use todo_runtime::{RuntimeConfig, TodoRuntime};
    use todo_worker::testing::UnavailableRepository;
    use todo_worker::{InMemoryTodoRepository, TodoRepository, TodoWorker, WorkerConfig};

    use crate::integration::support::eventually;

    const GET_BY_USER: &str = "todo.get_by_user";

    // =========================================================================
    // FIXTURES
    // =========================================================================

    /// Broker with the topology declared but nobody consuming.
    async fn broker_without_worker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        QueueTopology::todo()
            .declare(&broker.channel())
            .await
            .unwrap();
        broker
    }

    async fn connect(broker: &InMemoryBroker) -> Arc<RpcClient> {
        let channel: Arc<dyn BrokerTransport> = Arc::new(broker.channel());
        Arc::new(
            RpcClient::connect(channel, ClientConfig::default())
                .await
                .unwrap(),
        )
    }

    // =========================================================================
    // ROUND TRIP
    // =========================================================================

    #[tokio::test]
    async fn test_get_by_user_round_trip() {
        let runtime = TodoRuntime::start(&RuntimeConfig::default()).await.unwrap();
        let created = runtime
            .service()
            .create_todo(Todo::new(42, "file taxes"))
            .await
            .unwrap();

        let response: GetTodosResponse = runtime
            .client()
            .send(
                &GetTodosByUserIdRequest { user_id: 42 },
                GET_BY_USER,
                Some(Duration::from_millis(5000)),
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.todos, vec![created]);
        assert_eq!(runtime.client().pending_count(), 0);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_todos_are_listed_newest_first() {
        let runtime = TodoRuntime::start(&RuntimeConfig::default()).await.unwrap();
        let service = runtime.service();

        let mut older = Todo::new(5, "older");
        older.created_at = older.created_at - chrono::Duration::seconds(60);
        let older = service.create_todo(older).await.unwrap();
        let newer = service.create_todo(Todo::new(5, "newer")).await.unwrap();
        service.create_todo(Todo::new(6, "someone else")).await.unwrap();

        let todos = service.get_todos_by_user(5).await.unwrap();
        assert_eq!(todos, vec![newer, older]);
        runtime.shutdown().await;
    }

    // =========================================================================
    // TIMEOUTS AND LATE REPLIES
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out_without_leak() {
        let broker = broker_without_worker().await;
        let client = connect(&broker).await;

        let started = tokio::time::Instant::now();
        let result: Result<GetTodosResponse, RpcError> = client
            .send(
                &GetTodosByUserIdRequest { user_id: 42 },
                GET_BY_USER,
                Some(Duration::from_millis(5000)),
            )
            .await;

        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(
            client
                .correlation_table()
                .stats()
                .total_timeouts
                .load(Ordering::Relaxed),
            1
        );
        // The request itself is still waiting for a worker.
        assert_eq!(broker.queue_depth(GET_BY_USER), Some(1));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_reply_after_timeout_is_dropped() {
        let broker = broker_without_worker().await;
        let client = connect(&broker).await;

        let responder = broker.channel();
        let mut requests = responder.consume(GET_BY_USER).await.unwrap();

        let result: Result<GetTodosResponse, RpcError> = client
            .send(
                &GetTodosByUserIdRequest { user_id: 42 },
                GET_BY_USER,
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(result.unwrap_err().is_timeout());

        let delivery = requests.recv().await.unwrap();
        let (reply_to, correlation_id) = delivery.properties().reply_route().unwrap();
        let body = serde_json::to_vec(&GetTodosResponse::ok(Vec::new())).unwrap();
        responder
            .publish(
                DEFAULT_EXCHANGE,
                reply_to,
                MessageProperties::reply(correlation_id),
                Bytes::from(body),
            )
            .await
            .unwrap();
        responder.ack(delivery.tag).await.unwrap();

        let table = client.correlation_table();
        eventually("late reply to be dropped", || {
            table.stats().total_dropped.load(Ordering::Relaxed) == 1
        })
        .await;
        assert_eq!(table.stats().total_completed.load(Ordering::Relaxed), 0);
        assert!(table.is_empty());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_replayed_request_resolves_caller_once() {
        let broker = broker_without_worker().await;
        let client = connect(&broker).await;

        // Capture the request before any worker sees it.
        let interceptor = broker.channel();
        let mut requests = interceptor.consume(GET_BY_USER).await.unwrap();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move {
                client
                    .send::<_, GetTodosResponse>(
                        &GetTodosByUserIdRequest { user_id: 42 },
                        GET_BY_USER,
                        Some(Duration::from_secs(5)),
                    )
                    .await
            }
        });
        let captured = requests.recv().await.unwrap();
        interceptor.ack(captured.tag).await.unwrap();
        interceptor.close();

        let repository = Arc::new(InMemoryTodoRepository::new());
        let stored = repository.create(Todo::new(42, "pay rent")).await.unwrap();
        let worker = TodoWorker::start(
            Arc::new(broker.channel()),
            repository,
            WorkerConfig::default(),
        )
        .await
        .unwrap();

        let replayer = broker.channel();
        for _ in 0..2 {
            replayer
                .publish(
                    DEFAULT_EXCHANGE,
                    TodoQueue::GetByUser.queue_name(),
                    captured.envelope.properties.clone(),
                    captured.envelope.body.clone(),
                )
                .await
                .unwrap();
        }

        let response = call.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.todos, vec![stored]);

        let table = client.correlation_table();
        eventually("duplicate reply to be dropped", || {
            table.stats().total_dropped.load(Ordering::Relaxed) == 1
        })
        .await;
        assert_eq!(table.stats().total_completed.load(Ordering::Relaxed), 1);
        assert_eq!(broker.queue_depth("todo.get_by_user.deadletter"), Some(0));

        worker.shutdown().await;
        client.shutdown().await;
    }

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_their_own_replies() {
        let runtime = TodoRuntime::start(&RuntimeConfig::default()).await.unwrap();
        let service = runtime.service().clone();

        let created = join_all((1..=20i64).map(|user_id| {
            let service = service.clone();
            async move {
                service
                    .create_todo(Todo::new(user_id, format!("task for {user_id}")))
                    .await
                    .unwrap()
            }
        }))
        .await;

        let listed = join_all(created.iter().map(|todo| {
            let service = service.clone();
            let user_id = todo.user_id;
            async move { service.get_todos_by_user(user_id).await.unwrap() }
        }))
        .await;

        for (todo, todos) in created.iter().zip(listed) {
            assert_eq!(todos, vec![todo.clone()]);
        }
        assert_eq!(runtime.client().pending_count(), 0);
        runtime.shutdown().await;
    }

    // =========================================================================
    // APPLICATION FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_repository_failure_is_reported_not_retried() {
        let broker = InMemoryBroker::new();
        let runtime = TodoRuntime::start_with(
            &RuntimeConfig::default(),
            broker.clone(),
            Arc::new(UnavailableRepository),
        )
        .await
        .unwrap();

        let err = runtime.service().get_todos_by_user(3).await.unwrap_err();
        assert!(
            matches!(&err, TodoServiceError::Rejected(message) if message == "Failed to retrieve todos")
        );

        let err = runtime
            .service()
            .create_todo(Todo::new(3, "unreachable"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, TodoServiceError::Rejected(message) if message == "Failed to create todo")
        );

        assert_eq!(broker.queue_depth("todo.get_by_user.deadletter"), Some(0));
        assert_eq!(broker.queue_depth("todo.create.deadletter"), Some(0));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail_fast() {
        let runtime = TodoRuntime::start(&RuntimeConfig::default()).await.unwrap();
        let client = runtime.client();
        runtime.shutdown().await;

        let result: Result<GetTodosResponse, RpcError> = client
            .send(&GetTodosByUserIdRequest { user_id: 1 }, GET_BY_USER, None)
            .await;
        assert!(matches!(result, Err(RpcError::Shutdown)));
    }
}
