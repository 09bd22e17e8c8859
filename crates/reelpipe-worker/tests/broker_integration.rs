//! Broker round trips against real Redis and SQS endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelpipe_models::VideoId;
use reelpipe_queue::{
    BoxError, BrokerClient, FnHandler, LeaseTransport, QueueConfig, RedisBroker, RedisSettings,
    SqsTransport, TaskDispatcher, MIN_RETRY_BACKOFF,
};
use tokio::sync::watch;

fn redis_settings() -> RedisSettings {
    let suffix = uuid::Uuid::new_v4();
    RedisSettings {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        stream_name: format!("reelpipe-test:{suffix}:tasks"),
        consumer_group: format!("reelpipe-test:{suffix}:workers"),
        dlq_stream_name: format!("reelpipe-test:{suffix}:dlq"),
        max_retries: 2,
        retry_backoff: MIN_RETRY_BACKOFF,
        drain_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_delivers_and_acks() {
    dotenvy::dotenv().ok();

    let broker = Arc::new(RedisBroker::connect(redis_settings(), 2).await.unwrap());
    let dispatcher = TaskDispatcher::new(broker.clone());
    dispatcher
        .enqueue_video_processing(&VideoId::from_string("redis-v1"))
        .await
        .unwrap();
    assert_eq!(dispatcher.queue_depth().await.unwrap(), 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = Arc::new(FnHandler(move |_task_type: String, _payload: Vec<u8>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.start_worker(handler, shutdown_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("task was never delivered");

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap().unwrap();
    assert_eq!(dispatcher.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_dead_letters_after_max_retries() {
    dotenvy::dotenv().ok();

    let broker = Arc::new(RedisBroker::connect(redis_settings(), 1).await.unwrap());
    broker.enqueue("video:processing", br#"{"video_id":"redis-v2"}"#).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = Arc::new(FnHandler(move |_task_type: String, _payload: Vec<u8>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), BoxError>("always fails".into())
        }
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.start_worker(handler, shutdown_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(30), async {
        while broker.dead_letter_depth().await.unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .expect("task never reached the dead-letter stream");

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[ignore = "requires SQS (SQS_QUEUE_URL, e.g. LocalStack)"]
async fn test_sqs_send_receive_delete() {
    dotenvy::dotenv().ok();

    let config = QueueConfig::from_lookup(|key| match key {
        "QUEUE_TYPE" => Some("sqs".into()),
        other => std::env::var(other).ok(),
    })
    .expect("SQS_QUEUE_URL must be set");

    let transport = SqsTransport::connect(&config.sqs).await.unwrap();
    transport.send("video:processing", br#"{"video_id":"sqs-v1"}"#).await.unwrap();

    let messages = transport
        .receive(1, Duration::from_secs(5), Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].task_type.as_deref(), Some("video:processing"));

    transport.delete(&messages[0].receipt_handle).await.unwrap();
}
