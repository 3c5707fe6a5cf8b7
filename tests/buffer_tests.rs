//! Behaviour shared by every buffer strategy.

use rstest::rstest;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tag_tally::buffer::BufferKind;

mod common;
use common::test_helpers::{build_buffer, RecordingStore};

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_repeated_increments_accumulate(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new());
    let buffer = build_buffer(kind, store.clone());

    for _ in 0..3 {
        buffer.increment("go", 1).await;
    }

    assert_eq!(buffer.get("go").await, 3);
    assert_eq!(buffer.pending_keys().await, 1);
    assert_eq!(store.call_count(), 0, "no store call before a flush");
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_cancelled_key_skips_store(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new());
    let buffer = build_buffer(kind, store.clone());

    buffer.increment("go", 1).await;
    buffer.increment("rust", 1).await;
    buffer.increment("go", -1).await;

    let report = buffer.flush().await;

    assert_eq!(report.keys, 2);
    assert_eq!(report.skipped_zero, 1);
    assert_eq!(report.written, 1);
    assert!(store.calls_for("go").is_empty());
    assert_eq!(store.get("go"), 0);
    assert_eq!(store.get("rust"), 1);
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_store_error_does_not_abort_batch(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new().failing_on(["tag4"]));
    let buffer = build_buffer(kind, store.clone());

    for i in 0..10 {
        buffer.increment(&format!("tag{}", i), i + 1).await;
    }

    let report = buffer.flush().await;

    assert_eq!(store.call_count(), 10, "every key is attempted");
    assert_eq!(report.written, 9);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, "tag4");
    assert_eq!(report.failures[0].delta, 5);
    for i in (0..10).filter(|i| *i != 4) {
        assert_eq!(store.get(&format!("tag{}", i)), i + 1);
    }

    // The failed delta is dropped, not re-queued
    assert_eq!(buffer.get("tag4").await, 0);
    let next = buffer.flush().await;
    assert_eq!(next.keys, 0);
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_flush_resets_buffer(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new());
    let buffer = build_buffer(kind, store.clone());

    buffer.increment("go", 4).await;
    buffer.increment("rust", 2).await;
    let first = buffer.flush().await;
    assert_eq!(first.generation, 1);

    assert_eq!(buffer.get("go").await, 0);
    assert_eq!(buffer.get("rust").await, 0);
    assert_eq!(buffer.pending_keys().await, 0);

    let second = buffer.flush().await;
    assert_eq!(second.generation, 2);
    assert_eq!(second.keys, 0);
    assert_eq!(store.call_count(), 2);
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_loss_under_concurrent_flushes(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new().with_latency(Duration::from_micros(200)));
    let buffer = build_buffer(kind, store.clone());

    let mut producers = Vec::new();
    for p in 0..8i64 {
        let buffer = Arc::clone(&buffer);
        producers.push(tokio::spawn(async move {
            let mut expected: HashMap<String, i64> = HashMap::new();
            for i in 0..500i64 {
                let key = format!("k{}", (p * 7 + i) % 40);
                let delta = if i % 5 == 0 { -1 } else { 2 };
                buffer.increment(&key, delta).await;
                *expected.entry(key).or_insert(0) += delta;
            }
            expected
        }));
    }

    let flusher = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            let mut flushes = Vec::new();
            for _ in 0..10 {
                let buffer = Arc::clone(&buffer);
                flushes.push(tokio::spawn(async move { buffer.flush().await }));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            for flush in flushes {
                flush.await.unwrap();
            }
        })
    };

    let mut expected: HashMap<String, i64> = HashMap::new();
    for producer in producers {
        for (key, delta) in producer.await.unwrap() {
            *expected.entry(key).or_insert(0) += delta;
        }
    }
    flusher.await.unwrap();
    buffer.flush().await;

    for (key, total) in &expected {
        assert_eq!(store.get(key), *total, "key {} lost or double counted", key);
    }
    assert_eq!(buffer.pending_keys().await, 0);
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_cancelled_flush_never_double_counts(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new().with_latency(Duration::from_millis(30)));
    let buffer = build_buffer(kind, store.clone());
    buffer.increment("a", 1).await;
    buffer.increment("b", 1).await;

    // Dropped part-way through the store loop
    let cut = tokio::time::timeout(Duration::from_millis(45), buffer.flush()).await;
    assert!(cut.is_err());

    buffer.increment("c", 1).await;
    buffer.flush().await;

    for key in ["a", "b"] {
        assert!(
            store.calls_for(key).len() <= 1,
            "{} written more than once: {:?}",
            key,
            store.calls_for(key)
        );
    }
    assert!(store.total() <= 3);
    assert_eq!(store.get("c"), 1);
}

#[rstest]
#[case(BufferKind::Naive)]
#[case(BufferKind::DeepCopy)]
#[case(BufferKind::Swap)]
#[tokio::test]
async fn test_extreme_deltas_do_not_panic(#[case] kind: BufferKind) {
    let store = Arc::new(RecordingStore::new());
    let buffer = build_buffer(kind, store.clone());

    buffer.increment("hot", i64::MAX).await;
    buffer.increment("hot", 1).await;
    buffer.increment("cold", i64::MIN).await;
    buffer.increment("cold", i64::MAX).await;

    assert_eq!(buffer.get("hot").await, i64::MIN);
    assert_eq!(buffer.get("cold").await, -1);

    let report = buffer.flush().await;
    assert_eq!(report.written, 2);
    assert_eq!(store.calls_for("hot"), vec![i64::MIN]);
}
