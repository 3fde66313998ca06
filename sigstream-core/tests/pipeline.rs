//! End-to-end pipeline scenarios over the in-memory transport.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sigstream_core::coordinator::{CoordinatorSettings, SigningCoordinator};
use sigstream_core::keygen;
use sigstream_core::publish::{publish_batches, publish_keys};
use sigstream_core::stream::StreamTransport;
use sigstream_core::stream::memory::MemoryTransport;
use sigstream_model::{Key, subject, wire};
use support::{MemorySignatures, SeededRecords};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

async fn consumers(
    transport: &MemoryTransport,
) -> (
    Box<dyn sigstream_core::stream::DurableConsumer>,
    Box<dyn sigstream_core::stream::DurableConsumer>,
) {
    let records = transport
        .durable_consumer("signing-records-consumer", subject::RECORDS_FILTER)
        .await
        .unwrap();
    let keys = transport
        .durable_consumer("signing-keys-consumer", subject::KEYS_FILTER)
        .await
        .unwrap();
    (records, keys)
}

#[tokio::test]
async fn six_records_three_batches_three_keys_end_to_end() {
    let transport = MemoryTransport::new();

    publish_keys(
        Arc::new(transport.clone()),
        keygen::generate_keys(3).unwrap(),
        2,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();
    publish_batches(
        Arc::new(transport.clone()),
        Arc::new(SeededRecords::with_ids(1..=6)),
        3,
        2,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();

    let (records, keys) = consumers(&transport).await;
    let signatures = Arc::new(MemorySignatures::default());
    let coordinator = SigningCoordinator::new(
        records,
        keys,
        Arc::clone(&signatures) as _,
        CoordinatorSettings::new(3, 3),
    );

    let signed = coordinator.run().await.unwrap();
    assert_eq!(signed, 6);

    let rows = signatures.rows();
    assert_eq!(rows.len(), 6);
    let record_ids: HashSet<_> = rows.iter().map(|s| s.record_id).collect();
    assert_eq!(record_ids, (1..=6).collect());
    let values: HashSet<_> = rows.iter().map(|s| s.value.as_str()).collect();
    assert_eq!(values.len(), 6, "signature values must be globally unique");

    // Every batch permanently retired; every key recycled back to the
    // pool.
    assert_eq!(transport.acked_count(subject::RECORDS_FILTER), 3);
    assert_eq!(transport.pending_count(subject::RECORDS_FILTER), 0);
    assert_eq!(transport.acked_count(subject::KEYS_FILTER), 0);
    assert_eq!(transport.pending_count(subject::KEYS_FILTER), 0);
    assert_eq!(transport.available_count(subject::KEYS_FILTER), 3);
}

#[tokio::test]
async fn persistence_failure_leaves_batch_and_key_unresolved() {
    let transport = MemoryTransport::new();

    publish_keys(
        Arc::new(transport.clone()),
        keygen::generate_keys(1).unwrap(),
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();
    publish_batches(
        Arc::new(transport.clone()),
        Arc::new(SeededRecords::with_ids(1..=2)),
        1,
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();

    let (records, keys) = consumers(&transport).await;
    let signatures = Arc::new(MemorySignatures::failing());
    let coordinator = SigningCoordinator::new(
        records,
        keys,
        Arc::clone(&signatures) as _,
        CoordinatorSettings::new(1, 1),
    );

    let signed = coordinator.run().await.unwrap();
    assert_eq!(signed, 0);
    assert!(signatures.rows().is_empty(), "no partial rows committed");

    // Neither message resolved: both stay pending until the broker's idle
    // deadline redelivers them.
    assert_eq!(transport.pending_count(subject::RECORDS_FILTER), 1);
    assert_eq!(transport.pending_count(subject::KEYS_FILTER), 1);
    assert_eq!(transport.acked_count(subject::RECORDS_FILTER), 0);

    transport.redeliver_stalled(Duration::ZERO);
    assert_eq!(transport.available_count(subject::RECORDS_FILTER), 1);
    assert_eq!(transport.available_count(subject::KEYS_FILTER), 1);
}

#[tokio::test]
async fn malformed_batch_is_redelivered_without_consuming_a_key() {
    let transport = MemoryTransport::new();

    // One poison batch ahead of a well-formed one.
    transport
        .publish(&subject::records_subject(99), b"{not json".to_vec())
        .await
        .unwrap();
    publish_batches(
        Arc::new(transport.clone()),
        Arc::new(SeededRecords::with_ids(1..=2)),
        1,
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();
    publish_keys(
        Arc::new(transport.clone()),
        keygen::generate_keys(1).unwrap(),
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();

    let (records, keys) = consumers(&transport).await;
    let signatures = Arc::new(MemorySignatures::default());
    let coordinator = SigningCoordinator::new(
        records,
        keys,
        Arc::clone(&signatures) as _,
        CoordinatorSettings::new(1, 1),
    );

    let signed = coordinator.run().await.unwrap();
    assert_eq!(signed, 2);

    // The poison batch went back to the queue; the key pool is intact.
    assert_eq!(transport.available_count(subject::RECORDS_FILTER), 1);
    assert_eq!(transport.acked_count(subject::RECORDS_FILTER), 1);
    assert_eq!(transport.acked_count(subject::KEYS_FILTER), 0);
    assert_eq!(transport.available_count(subject::KEYS_FILTER), 1);
}

#[tokio::test]
async fn malformed_key_redelivers_both_messages() {
    let transport = MemoryTransport::new();

    transport
        .publish(&subject::keys_subject(99), b"[]".to_vec())
        .await
        .unwrap();
    publish_keys(
        Arc::new(transport.clone()),
        vec![Key::fresh(1, "good-key".to_string())],
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();
    publish_batches(
        Arc::new(transport.clone()),
        Arc::new(SeededRecords::with_ids(1..=2)),
        1,
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();

    let (records, keys) = consumers(&transport).await;
    let signatures = Arc::new(MemorySignatures::default());
    let coordinator = SigningCoordinator::new(
        records,
        keys,
        Arc::clone(&signatures) as _,
        CoordinatorSettings::new(1, 1),
    );

    let signed = coordinator.run().await.unwrap();
    assert_eq!(signed, 2);

    let rows = signatures.rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|s| s.key_id == 1));

    // The poison key was naked back and the batch was retried.
    assert_eq!(transport.available_count(subject::KEYS_FILTER), 2);
    assert_eq!(transport.acked_count(subject::RECORDS_FILTER), 1);
}

#[tokio::test]
async fn pull_failures_are_retried_with_a_pause() {
    use async_trait::async_trait;
    use sigstream_core::error::PipelineError;
    use sigstream_core::stream::{DurableConsumer, PulledMessage};

    struct FlakyConsumer {
        inner: Box<dyn DurableConsumer>,
        failures_left: usize,
    }

    #[async_trait]
    impl DurableConsumer for FlakyConsumer {
        async fn next(
            &mut self,
        ) -> sigstream_core::Result<Box<dyn PulledMessage>> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(PipelineError::Internal(
                    "forced pull failure".to_string(),
                ));
            }
            self.inner.next().await
        }
    }

    let transport = MemoryTransport::new();
    publish_keys(
        Arc::new(transport.clone()),
        keygen::generate_keys(1).unwrap(),
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();
    publish_batches(
        Arc::new(transport.clone()),
        Arc::new(SeededRecords::with_ids(1..=2)),
        1,
        1,
        PUBLISH_TIMEOUT,
    )
    .await
    .unwrap();

    let (records, keys) = consumers(&transport).await;
    let records = Box::new(FlakyConsumer {
        inner: records,
        failures_left: 2,
    });

    let retry_delay = Duration::from_millis(5);
    let mut settings = CoordinatorSettings::new(1, 1);
    settings.pull_retry_delay = retry_delay;

    let signatures = Arc::new(MemorySignatures::default());
    let coordinator = SigningCoordinator::new(
        records,
        keys,
        Arc::clone(&signatures) as _,
        settings,
    );

    let started = std::time::Instant::now();
    let signed = coordinator.run().await.unwrap();
    assert_eq!(signed, 2);
    // Two failed pulls, each followed by the retry pause.
    assert!(started.elapsed() >= retry_delay * 2);
    assert_eq!(transport.acked_count(subject::RECORDS_FILTER), 1);
}

#[tokio::test]
async fn signatures_are_wire_stable_across_retries() {
    // The same (batch, key) pairing signed twice produces identical
    // values, which is what makes blind redelivery safe to reconcile.
    let key = Key::fresh(7, "retry-key".to_string());
    let records = vec![support::record(1), support::record(2)];
    let payload = wire::encode_records(&records).unwrap();
    let decoded = wire::decode_records(&payload).unwrap();

    let first = sigstream_core::signing::sign_records(&decoded, &key)
        .await
        .unwrap();
    let second = sigstream_core::signing::sign_records(&records, &key)
        .await
        .unwrap();
    assert_eq!(first, second);
}
