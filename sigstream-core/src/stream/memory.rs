//! In-process transport with the same resolution semantics as the Redis
//! transport: idempotent publish, pending-entry tracking, nak requeue, and
//! idle-based redelivery of unresolved messages.
//!
//! One delivery queue exists per namespace, so all consumers of a
//! namespace form a single group regardless of name. That matches how the
//! pipeline consumes (one durable consumer per namespace) and keeps the
//! transport small enough to reason about in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use sigstream_model::subject;

use super::{DurableConsumer, PublishAck, PulledMessage, StreamTransport};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
struct Envelope {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct Pending {
    envelope: Envelope,
    pulled_at: Instant,
}

#[derive(Debug, Default)]
struct Namespace {
    queue: std::collections::VecDeque<Envelope>,
    pending: HashMap<u64, Pending>,
    acked: u64,
}

#[derive(Debug, Default)]
struct Shared {
    namespaces: Mutex<HashMap<String, Namespace>>,
    /// Publish tokens already seen, mapped to the sequence they landed at.
    tokens: Mutex<HashMap<String, u64>>,
    next_seq: Mutex<u64>,
}

/// In-memory stream transport.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    wakeups: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_for(&self, namespace: &str) -> Arc<Notify> {
        let mut wakeups = self.wakeups.lock().expect("wakeup lock poisoned");
        Arc::clone(
            wakeups
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn with_namespace<T>(&self, namespace: &str, f: impl FnOnce(&mut Namespace) -> T) -> T {
        let mut namespaces =
            self.shared.namespaces.lock().expect("namespace lock poisoned");
        f(namespaces.entry(namespace.to_string()).or_default())
    }

    /// Messages pulled but not yet resolved in `filter`'s namespace.
    pub fn pending_count(&self, filter: &str) -> usize {
        self.with_namespace(filter, |ns| ns.pending.len())
    }

    /// Messages deliverable right now in `filter`'s namespace.
    pub fn available_count(&self, filter: &str) -> usize {
        self.with_namespace(filter, |ns| ns.queue.len())
    }

    /// Messages permanently retired in `filter`'s namespace.
    pub fn acked_count(&self, filter: &str) -> u64 {
        self.with_namespace(filter, |ns| ns.acked)
    }

    /// Re-queue every pending message older than `min_idle`. The broker
    /// equivalent runs continuously; tests invoke it explicitly to keep
    /// redelivery timing deterministic.
    pub fn redeliver_stalled(&self, min_idle: Duration) {
        let namespaces: Vec<String> = {
            let guard =
                self.shared.namespaces.lock().expect("namespace lock poisoned");
            guard.keys().cloned().collect()
        };
        for namespace in namespaces {
            let requeued = self.with_namespace(&namespace, |ns| {
                let stale: Vec<u64> = ns
                    .pending
                    .iter()
                    .filter(|(_, p)| p.pulled_at.elapsed() >= min_idle)
                    .map(|(&seq, _)| seq)
                    .collect();
                for seq in &stale {
                    if let Some(p) = ns.pending.remove(seq) {
                        ns.queue.push_back(p.envelope);
                    }
                }
                stale.len()
            });
            if requeued > 0 {
                self.notify_for(&namespace).notify_one();
            }
        }
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck> {
        let namespace = subject::namespace_of(subject).to_string();

        // Check-and-claim under one lock so racing duplicate publishes
        // cannot both enqueue.
        let seq = {
            let mut tokens =
                self.shared.tokens.lock().expect("token lock poisoned");
            if let Some(&seq) = tokens.get(subject) {
                return Ok(PublishAck {
                    stream: format!("memory:{namespace}"),
                    sequence: seq.to_string(),
                });
            }
            let seq = {
                let mut next =
                    self.shared.next_seq.lock().expect("seq lock poisoned");
                *next += 1;
                *next
            };
            tokens.insert(subject.to_string(), seq);
            seq
        };
        self.with_namespace(&namespace, |ns| {
            ns.queue.push_back(Envelope {
                seq,
                subject: subject.to_string(),
                payload,
            });
        });
        self.notify_for(&namespace).notify_one();

        Ok(PublishAck {
            stream: format!("memory:{namespace}"),
            sequence: seq.to_string(),
        })
    }

    async fn durable_consumer(
        &self,
        _name: &str,
        filter: &str,
    ) -> Result<Box<dyn DurableConsumer>> {
        Ok(Box::new(MemoryConsumer {
            transport: self.clone(),
            namespace: filter.to_string(),
        }))
    }
}

struct MemoryConsumer {
    transport: MemoryTransport,
    namespace: String,
}

#[async_trait]
impl DurableConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Box<dyn PulledMessage>> {
        let notify = self.transport.notify_for(&self.namespace);
        loop {
            let pulled = self.transport.with_namespace(&self.namespace, |ns| {
                let envelope = ns.queue.pop_front()?;
                ns.pending.insert(
                    envelope.seq,
                    Pending {
                        envelope: envelope.clone(),
                        pulled_at: Instant::now(),
                    },
                );
                let more = !ns.queue.is_empty();
                Some((envelope, more))
            });
            if let Some((envelope, more)) = pulled {
                if more {
                    // Keep sibling consumers awake.
                    notify.notify_one();
                }
                return Ok(Box::new(MemoryMessage {
                    transport: self.transport.clone(),
                    namespace: self.namespace.clone(),
                    envelope,
                }));
            }
            notify.notified().await;
        }
    }
}

struct MemoryMessage {
    transport: MemoryTransport,
    namespace: String,
    envelope: Envelope,
}

#[async_trait]
impl PulledMessage for MemoryMessage {
    fn subject(&self) -> &str {
        &self.envelope.subject
    }

    fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        let seq = self.envelope.seq;
        let resolved = self.transport.with_namespace(&self.namespace, |ns| {
            let known = ns.pending.remove(&seq).is_some();
            if known {
                ns.acked += 1;
            }
            known
        });
        if resolved {
            Ok(())
        } else {
            Err(PipelineError::Internal(format!(
                "ack of unknown message seq {seq}"
            )))
        }
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        let seq = self.envelope.seq;
        let resolved = self.transport.with_namespace(&self.namespace, |ns| {
            match ns.pending.remove(&seq) {
                Some(p) => {
                    ns.queue.push_back(p.envelope);
                    true
                }
                None => false,
            }
        });
        if resolved {
            self.transport.notify_for(&self.namespace).notify_one();
            Ok(())
        } else {
            Err(PipelineError::Internal(format!(
                "nak of unknown message seq {seq}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_idempotent_by_subject() {
        let transport = MemoryTransport::new();
        let first = transport
            .publish("keys.1", b"a".to_vec())
            .await
            .unwrap();
        let second = transport
            .publish("keys.1", b"b".to_vec())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.available_count("keys"), 1);
    }

    #[tokio::test]
    async fn racing_duplicate_publishes_enqueue_once() {
        let transport = MemoryTransport::new();
        let mut publishes = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let transport = transport.clone();
            publishes.spawn(async move {
                transport.publish("keys.1", b"k".to_vec()).await.unwrap()
            });
        }

        let mut acks = Vec::new();
        while let Some(joined) = publishes.join_next().await {
            acks.push(joined.unwrap());
        }
        assert!(acks.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(transport.available_count("keys"), 1);
    }

    #[tokio::test]
    async fn nak_makes_a_message_redeliverable() {
        let transport = MemoryTransport::new();
        transport.publish("keys.1", b"k1".to_vec()).await.unwrap();

        let mut consumer = transport.durable_consumer("c", "keys").await.unwrap();
        let msg = consumer.next().await.unwrap();
        assert_eq!(transport.pending_count("keys"), 1);

        msg.nak().await.unwrap();
        assert_eq!(transport.pending_count("keys"), 0);

        let again = consumer.next().await.unwrap();
        assert_eq!(again.payload(), b"k1");
        again.ack().await.unwrap();
        assert_eq!(transport.acked_count("keys"), 1);
    }

    #[tokio::test]
    async fn unresolved_messages_redeliver_after_idle() {
        let transport = MemoryTransport::new();
        transport
            .publish("records.1", b"batch".to_vec())
            .await
            .unwrap();

        let mut consumer =
            transport.durable_consumer("c", "records").await.unwrap();
        let msg = consumer.next().await.unwrap();
        drop(msg); // neither acked nor naked

        assert_eq!(transport.pending_count("records"), 1);
        transport.redeliver_stalled(Duration::ZERO);
        assert_eq!(transport.pending_count("records"), 0);
        assert_eq!(transport.available_count("records"), 1);
    }

    #[tokio::test]
    async fn namespaces_do_not_cross_deliver() {
        let transport = MemoryTransport::new();
        transport.publish("keys.1", b"k".to_vec()).await.unwrap();
        transport
            .publish("records.1", b"r".to_vec())
            .await
            .unwrap();

        let mut keys = transport.durable_consumer("kc", "keys").await.unwrap();
        let msg = keys.next().await.unwrap();
        assert_eq!(msg.subject(), "keys.1");
        msg.ack().await.unwrap();
        assert_eq!(transport.available_count("records"), 1);
    }
}
