use media_pipeline::{
    config::AppConfig,
    db::{self, MetadataStore, PgMetadataStore},
    models::job::{Claim, JobStatus},
    services::{
        processor::{Outcome, Processor},
        queue::{JobQueue, QueuedJob, RedisJobQueue},
        storage::{ObjectStore, R2Client, StorageError},
    },
};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Integration test: full pipeline against real infrastructure
///
/// Exercises:
/// 1. Database connection and schema
/// 2. Object store put/get/delete
/// 3. Redis queue publish/receive/ack
/// 4. Job state transitions and photo insertion
/// 5. Worker processing of a real JPEG
///
/// Note: This requires running PostgreSQL, Redis and an S3-compatible
/// store configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let storage = Arc::new(
        R2Client::new(
            &config.storage_bucket,
            &config.storage_region,
            &config.storage_endpoint,
            &config.storage_access_key,
            &config.storage_secret_key,
        )
        .expect("Failed to initialize object store"),
    );
    // Separate queue name so a running worker does not steal the message.
    let queue = Arc::new(
        RedisJobQueue::new(
            &config.redis_url,
            &format!("media_pipeline_test_{}", Uuid::new_v4()),
            config.visibility_timeout(),
        )
        .expect("Failed to initialize queue"),
    );
    let metadata = Arc::new(PgMetadataStore::new(db_pool));

    // 1. Object store round trip
    let image = {
        let img = image::RgbImage::from_pixel(200, 150, image::Rgb([90, 120, 150]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .expect("Failed to encode test image");
        buf
    };
    let source_key = format!("test/uploads/{}.jpg", Uuid::new_v4());
    storage
        .put(&source_key, &image, "image/jpeg")
        .await
        .expect("Object store put failed");
    assert_eq!(storage.get(&source_key).await.expect("get failed"), image);
    assert!(matches!(
        storage.get("test/never-written").await,
        Err(StorageError::NotFound(_))
    ));

    // 2. Job creation and read back
    let job_id = Uuid::new_v4();
    let job = metadata
        .create_job(job_id, &source_key, Some("integration"))
        .await
        .expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Queued);

    // 3. Queue publish and processing
    queue
        .publish(&QueuedJob {
            job_id,
            source_key: source_key.clone(),
        })
        .await
        .expect("Failed to publish");
    assert_eq!(queue.depth().await.expect("depth failed"), 1);

    let processor = Processor::new(
        storage.clone(),
        queue.clone(),
        metadata.clone(),
        config.processor_options(),
    );
    let outcome = processor
        .process_next()
        .await
        .expect("Failed to receive")
        .expect("No job in queue");
    let photo = match outcome {
        Outcome::Completed(photo) => photo,
        other => panic!("expected completion, got {other:?}"),
    };

    let final_job = metadata
        .get_job(job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(final_job.status, JobStatus::Done);
    assert_eq!(
        metadata.photos_for_job(job_id).await.expect("photos failed").len(),
        1
    );
    assert_eq!(metadata.claim_job(job_id).await.expect("claim failed"), Claim::AlreadyDone);

    let output = storage.get(&photo.output_key).await.expect("output missing");
    assert_eq!(image::guess_format(&output).ok(), Some(image::ImageFormat::Jpeg));

    // Cleanup
    storage.delete(&source_key).await.expect("Failed to delete source");
    storage
        .delete(&photo.output_key)
        .await
        .expect("Failed to delete output");

    println!("✅ All integration tests passed!");
}

fn short_lived_queue(redis_url: &str, name: &str) -> RedisJobQueue {
    RedisJobQueue::new(redis_url, name, Duration::from_secs(1)).expect("Failed to initialize queue")
}

/// Unacknowledged messages come back exactly once after the visibility
/// timeout, even with two sweepers racing.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_visibility_timeout_redelivery() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let name = format!("media_pipeline_test_{}", Uuid::new_v4());
    let first = short_lived_queue(&config.redis_url, &name);
    let second = short_lived_queue(&config.redis_url, &name);

    let job = QueuedJob {
        job_id: Uuid::new_v4(),
        source_key: "uploads/visibility.jpg".to_string(),
    };
    first.publish(&job).await.expect("Failed to publish");

    let delivery = first
        .receive()
        .await
        .expect("Failed to receive")
        .expect("No message");
    assert_eq!(delivery.job, job);

    // The deadline is written together with the move to the processing list.
    let client = redis::Client::open(config.redis_url.as_str()).expect("Bad Redis URL");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let deadline: Option<f64> = conn
        .zscore(format!("{name}:inflight"), delivery.receipt())
        .await
        .expect("ZSCORE failed");
    assert!(deadline.is_some());

    // Still inside the visibility window.
    assert_eq!(first.requeue_expired().await.expect("sweep failed"), 0);
    assert!(second.receive().await.expect("receive failed").is_none());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (a, b) = tokio::join!(first.requeue_expired(), second.requeue_expired());
    assert_eq!(a.expect("sweep failed") + b.expect("sweep failed"), 1);
    assert_eq!(first.depth().await.expect("depth failed"), 1);

    let redelivered = second
        .receive()
        .await
        .expect("Failed to receive")
        .expect("Message was not redelivered");
    assert_eq!(redelivered.job, job);
    second.ack(&redelivered).await.expect("Failed to ack");

    // Acking the stale first delivery is harmless and nothing else comes back.
    first.ack(&delivery).await.expect("Failed to ack");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(first.requeue_expired().await.expect("sweep failed"), 0);
    assert!(first.receive().await.expect("receive failed").is_none());

    let _: () = conn
        .del(vec![
            format!("{name}:jobs"),
            format!("{name}:processing"),
            format!("{name}:inflight"),
        ])
        .await
        .expect("Failed to clean up queue keys");
}

/// Acknowledging one of two identical payloads keeps the other's deadline,
/// so it is still redelivered if its worker dies.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_duplicate_payloads_keep_their_deadline() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let name = format!("media_pipeline_test_{}", Uuid::new_v4());
    let queue = short_lived_queue(&config.redis_url, &name);

    let job = QueuedJob {
        job_id: Uuid::new_v4(),
        source_key: "uploads/duplicate.jpg".to_string(),
    };
    queue.publish(&job).await.expect("Failed to publish");
    queue.publish(&job).await.expect("Failed to publish");

    let acked = queue.receive().await.expect("receive failed").expect("No message");
    let abandoned = queue.receive().await.expect("receive failed").expect("No message");
    assert_eq!(acked.job, abandoned.job);
    queue.ack(&acked).await.expect("Failed to ack");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(queue.requeue_expired().await.expect("sweep failed"), 1);
    let redelivered = queue.receive().await.expect("receive failed").expect("No message");
    assert_eq!(redelivered.job, job);
    queue.ack(&redelivered).await.expect("Failed to ack");
    assert_eq!(queue.depth().await.expect("depth failed"), 0);
}
