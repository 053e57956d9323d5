//! Bulk writer cycles against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use harvest_core::HarvestError;
use harvest_store::{AdaptiveBulkWriter, MemoryStore, WriteOperation, WriterConfig};
use serde_json::{Value, json};

fn config(dir: &tempfile::TempDir) -> WriterConfig {
    WriterConfig {
        max_operations_per_batch: 250,
        fallback_dir: dir.path().join("fallback"),
        ..Default::default()
    }
}

fn writer(store: &Arc<MemoryStore>, config: WriterConfig) -> AdaptiveBulkWriter {
    AdaptiveBulkWriter::new(config, store.clone()).unwrap()
}

/// Roughly `pad` bytes of payload
fn doc(i: usize, pad: usize) -> Value {
    json!({"id": i, "name": format!("supplier {i}"), "pad": "x".repeat(pad)})
}

fn enqueue_sets(writer: &mut AdaptiveBulkWriter, n: usize, pad: usize) {
    for i in 0..n {
        writer
            .enqueue(WriteOperation::set(&format!("suppliers/{i}"), doc(i, pad)).unwrap())
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn thousand_ops_commit_in_four_sub_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, config(&dir));
    enqueue_sets(&mut writer, 1000, 2000);
    assert_eq!(writer.pending(), 1000);

    let report = writer.commit().await;
    assert_eq!(report.sub_batches, 4);
    assert_eq!(report.succeeded + report.failed, 1000);
    assert_eq!(report.succeeded, 1000);
    assert_eq!(store.batch_sizes(), vec![250; 4]);
    assert_eq!(store.len(), 1000);
    assert_eq!(writer.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn byte_ceiling_splits_large_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(
        &store,
        WriterConfig {
            max_batch_bytes: 64 * 1024,
            max_document_bytes: 16 * 1024,
            ..config(&dir)
        },
    );
    enqueue_sets(&mut writer, 100, 10_000);
    let report = writer.commit().await;
    assert_eq!(report.succeeded, 100);
    // six ~10KB documents fit under 64KiB
    assert!(store.batch_sizes().iter().all(|&n| n <= 6));
}

#[tokio::test(start_paused = true)]
async fn failed_sub_batch_spills_exact_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.fail_all(true);
    let mut writer = writer(
        &store,
        WriterConfig {
            commit_retry_attempts: 1,
            ..config(&dir)
        },
    );

    let mut expected: BTreeMap<String, Value> = BTreeMap::new();
    for i in 0..5 {
        let payload = json!({"id": i, "name": format!("Fornecedor São João {i}"), "tags": ["a", i]});
        let path = format!("suppliers/{i}");
        writer
            .enqueue(WriteOperation::set(&path, payload.clone()).unwrap())
            .unwrap();
        expected.insert(path, payload);
    }
    writer
        .enqueue(WriteOperation::delete("suppliers/99").unwrap())
        .unwrap();

    let report = writer.commit().await;
    assert_eq!(report.failed, 6);
    assert_eq!(report.spilled, 5);

    let fallback = writer.fallback();
    assert_eq!(fallback.files().unwrap().len(), 5);
    let records = fallback.list().unwrap();
    assert_eq!(records.len(), 5);
    for record in records {
        let bytes = std::fs::read(fallback.dir().join(&record.file)).unwrap();
        let original = &expected[&record.path];
        assert_eq!(bytes, serde_json::to_vec(original).unwrap());
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(&parsed, original);
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_operation_fails_and_spills_its_sub_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(
        &store,
        WriterConfig {
            commit_retry_attempts: 2,
            ..config(&dir)
        },
    );
    enqueue_sets(&mut writer, 3, 10);
    writer
        .enqueue(WriteOperation::update("suppliers/missing", json!({"a": 1})).unwrap())
        .unwrap();

    let report = writer.commit().await;
    assert_eq!(report.failed, 4);
    assert_eq!(report.spilled, 4);
    assert!(store.is_empty());
    // retried as a store-side failure before spilling
    assert_eq!(store.batch_sizes(), vec![4, 4]);

    let records = writer.fallback().list().unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.error.contains("1/4 operations failed")));
}

#[tokio::test(start_paused = true)]
async fn transient_store_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.fail_next(1);
    let mut writer = writer(&store, config(&dir));
    enqueue_sets(&mut writer, 10, 10);
    let report = writer.commit().await;
    assert_eq!(report.succeeded, 10);
    assert_eq!(report.spilled, 0);
    assert_eq!(store.batch_sizes(), vec![10, 10]);
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_shrink_batch_size_to_floor() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_secs(10)));
    let mut writer = writer(
        &store,
        WriterConfig {
            commit_timeout_ms: 1000,
            min_batch_size: 10,
            ..config(&dir)
        },
    );

    let mut sizes = vec![writer.tuning().batch_size];
    for _ in 0..3 {
        enqueue_sets(&mut writer, 300, 10);
        let report = writer.commit().await;
        assert!(report.timeouts > 0);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.spilled, 300);
        sizes.push(writer.tuning().batch_size);
    }
    for pair in sizes.windows(2) {
        assert!(pair[1] < pair[0], "sizes {sizes:?}");
    }
    assert!(sizes.iter().all(|&s| s >= 10));
    assert_eq!(writer.tuning().concurrency, 1);
}

#[tokio::test(start_paused = true)]
async fn healthy_commits_never_shrink_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(
        &store,
        WriterConfig {
            initial_batch_size: Some(100),
            initial_concurrency: Some(1),
            adapt_every: 1,
            ..config(&dir)
        },
    );
    let mut prev = writer.tuning();
    for _ in 0..5 {
        enqueue_sets(&mut writer, 200, 10);
        let report = writer.commit().await;
        assert_eq!(report.succeeded, 200);
        let now = writer.tuning();
        assert!(now.batch_size >= prev.batch_size);
        prev = now;
    }
    assert!(prev.batch_size > 100);
    assert!(prev.concurrency > 1);
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(100)));
    let mut writer = writer(
        &store,
        WriterConfig {
            max_operations_per_batch: 10,
            min_batch_size: 1,
            max_concurrent_batches: 2,
            ..config(&dir)
        },
    );
    enqueue_sets(&mut writer, 100, 10);
    let report = writer.commit().await;
    assert_eq!(report.sub_batches, 10);
    assert_eq!(store.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn replay_commits_and_removes_spilled_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.fail_all(true);
    let mut writer = writer(
        &store,
        WriterConfig {
            commit_retry_attempts: 1,
            ..config(&dir)
        },
    );
    enqueue_sets(&mut writer, 20, 10);
    writer.commit().await;
    assert_eq!(writer.fallback().files().unwrap().len(), 20);

    store.fail_all(false);
    assert_eq!(writer.replay_fallback().unwrap(), 20);
    // queued origins are not picked up twice
    assert_eq!(writer.replay_fallback().unwrap(), 0);

    let report = writer.commit().await;
    assert_eq!(report.succeeded, 20);
    assert_eq!(store.len(), 20);
    assert!(writer.fallback().files().unwrap().is_empty());
    assert!(writer.fallback().list().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_replay_is_not_spilled_twice() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.fail_all(true);
    let mut writer = writer(
        &store,
        WriterConfig {
            commit_retry_attempts: 1,
            ..config(&dir)
        },
    );
    enqueue_sets(&mut writer, 3, 10);
    writer.commit().await;
    writer.replay_fallback().unwrap();
    let report = writer.commit().await;
    assert_eq!(report.failed, 3);
    assert_eq!(report.spilled, 0);
    assert_eq!(writer.fallback().files().unwrap().len(), 3);
}

#[tokio::test]
async fn oversized_document_rejected_before_send() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(
        &store,
        WriterConfig {
            max_document_bytes: 1024,
            ..config(&dir)
        },
    );
    let err = writer
        .enqueue(WriteOperation::set("suppliers/1", doc(1, 4096)).unwrap())
        .unwrap_err();
    assert!(matches!(err, HarvestError::Validation(_)));
    assert_eq!(writer.pending(), 0);
    assert_eq!(writer.commit().await.sub_batches, 0);
    assert!(store.batch_sizes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reset_starts_new_unit_of_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, config(&dir));
    enqueue_sets(&mut writer, 10, 10);
    writer.commit().await;
    enqueue_sets(&mut writer, 5, 10);

    let summary = writer.reset();
    assert_eq!(summary.succeeded, 10);
    assert_eq!(summary.total, 10);
    assert_eq!(writer.pending(), 0);
    assert_eq!(writer.summary().total, 0);
}

#[test]
fn invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let result = AdaptiveBulkWriter::new(
        WriterConfig {
            max_operations_per_batch: 0,
            ..config(&dir)
        },
        store,
    );
    assert!(matches!(result, Err(HarvestError::Config(_))));
}
