//! Tests for the in-memory backend.

use super::*;

#[tokio::test]
async fn send_and_receive_round_trip() {
    let backend = InMemoryBackend::new();

    backend
        .send_message("dGVzdA==", MessageTtl::Infinite)
        .await
        .unwrap();

    let batch = backend.receive_messages(32, None).await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].message_text, "dGVzdA==");
    assert!(!batch[0].pop_receipt.is_empty());
}

#[tokio::test]
async fn leased_messages_are_invisible_until_expiry() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    let first = backend.receive_messages(32, None).await.unwrap();
    assert_eq!(first.len(), 1);

    // Still leased: a second receive sees nothing
    let hidden = backend.receive_messages(32, None).await.unwrap();
    assert!(hidden.is_empty());

    // After expiry the same message returns with a fresh pop receipt
    backend.expire_leases();
    let redelivered = backend.receive_messages(32, None).await.unwrap();

    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].message_id, first[0].message_id);
    assert_ne!(redelivered[0].pop_receipt, first[0].pop_receipt);
}

#[tokio::test]
async fn receive_honors_the_batch_limit() {
    let backend = InMemoryBackend::new();

    for index in 0..5 {
        backend
            .send_message(&format!("m{}", index), MessageTtl::Default)
            .await
            .unwrap();
    }

    let batch = backend.receive_messages(2, None).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(backend.receive_call_count(), 1);
}

#[tokio::test]
async fn delete_with_current_receipt_removes_the_message() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    let batch = backend.receive_messages(32, None).await.unwrap();
    backend
        .delete_message(&batch[0].message_id, &batch[0].pop_receipt)
        .await
        .unwrap();

    assert_eq!(backend.approximate_message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn delete_with_stale_receipt_reports_message_not_found() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    let first = backend.receive_messages(32, None).await.unwrap();
    backend.expire_leases();
    let _second = backend.receive_messages(32, None).await.unwrap();

    let result = backend
        .delete_message(&first[0].message_id, &first[0].pop_receipt)
        .await;

    assert!(matches!(
        result,
        Err(BackendError::MessageNotFound { .. })
    ));
    assert_eq!(backend.approximate_message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn approximate_count_includes_invisible_messages() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    let _leased = backend.receive_messages(32, None).await.unwrap();

    assert_eq!(backend.approximate_message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn clear_messages_empties_the_queue() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("a", MessageTtl::Default)
        .await
        .unwrap();
    backend
        .send_message("b", MessageTtl::Default)
        .await
        .unwrap();

    backend.clear_messages().await.unwrap();

    assert_eq!(backend.approximate_message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn dropped_queue_rejects_operations_until_recreated() {
    let backend = InMemoryBackend::new();

    backend.delete_if_exists().await.unwrap();

    let result = backend.send_message("body", MessageTtl::Default).await;
    assert!(matches!(result, Err(BackendError::QueueNotFound { .. })));

    backend.create_if_not_exists().await.unwrap();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    assert_eq!(backend.approximate_message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn injected_delete_failure_fires_once() {
    let backend = InMemoryBackend::new();
    backend
        .send_message("body", MessageTtl::Default)
        .await
        .unwrap();

    let batch = backend.receive_messages(32, None).await.unwrap();

    backend.fail_next_delete();

    let failed = backend
        .delete_message(&batch[0].message_id, &batch[0].pop_receipt)
        .await;
    assert!(matches!(failed, Err(BackendError::Service { .. })));

    // The next delete goes through
    backend
        .delete_message(&batch[0].message_id, &batch[0].pop_receipt)
        .await
        .unwrap();
    assert_eq!(backend.approximate_message_count().await.unwrap(), 0);
}
