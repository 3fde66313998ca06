//! Redis Streams transport.
//!
//! Each subject namespace maps to one physical stream key under the
//! shared event-stream prefix. Idempotent publish pairs an `XADD` with a
//! `SET NX` token keyed by subject; the token proves publication only
//! once it records the appended entry id. Durable consumers are consumer groups
//! created with `XGROUP CREATE … MKSTREAM`. A pull first reclaims any
//! pending entry idle past the redelivery deadline (`XPENDING` +
//! `XCLAIM`), then blocks on `XREADGROUP`. `ack` is `XACK`; `nak` is an
//! `XCLAIM` that back-dates the entry's idle time so the next reclaim
//! pass hands it out again immediately.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use sigstream_model::subject;

use super::{DurableConsumer, PublishAck, PulledMessage, StreamTransport};
use crate::error::{PipelineError, Result};

/// How long a pulled entry may sit unresolved before it is considered
/// abandoned and becomes eligible for redelivery.
const REDELIVERY_IDLE: Duration = Duration::from_secs(30);

/// Upper bound on a single blocking read; the pull loop retries, so this
/// only bounds how quickly a consumer notices reclaimable entries.
const PULL_BLOCK: Duration = Duration::from_secs(5);

/// Stream entry as (id, field map), the shape XREADGROUP and XCLAIM
/// replies decode into.
type Entry = (String, HashMap<String, Vec<u8>>);

/// Placeholder a dedup token holds between claiming the subject and the
/// XADD completing.
const TOKEN_PENDING: &str = "pending";

/// Entry id recorded for an already-published subject, if the token
/// proves one. A token still at its placeholder marks a publish that died
/// between claiming the subject and appending the entry; the appended
/// entry id is the only proof of publication.
fn published_entry_id(token: Option<String>) -> Option<String> {
    token.filter(|recorded| recorded != TOKEN_PENDING)
}

#[derive(Clone)]
pub struct RedisTransport {
    manager: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisTransport {
    /// Connect to the broker. Failure here is a fatal startup condition
    /// for every service.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            prefix: subject::EVENTS_STREAM_NAME.to_string(),
        })
    }

    fn stream_key(&self, namespace: &str) -> String {
        format!("{}.{namespace}", self.prefix)
    }

    fn dedup_key(&self, subject: &str) -> String {
        format!("{}:published:{subject}", self.prefix)
    }
}

#[async_trait]
impl StreamTransport for RedisTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck> {
        let namespace = subject::namespace_of(subject);
        let stream_key = self.stream_key(namespace);
        let dedup_key = self.dedup_key(subject);
        let mut conn = self.manager.clone();

        let fresh: bool = conn.set_nx(&dedup_key, TOKEN_PENDING).await?;
        if !fresh {
            let recorded: Option<String> = conn.get(&dedup_key).await?;
            if let Some(sequence) = published_entry_id(recorded) {
                debug!(subject, "publish deduplicated");
                return Ok(PublishAck {
                    stream: stream_key,
                    sequence,
                });
            }
            // An earlier publish claimed the token but never reached the
            // stream; retry the append under the existing token. Two
            // publishers racing through here can append twice, which
            // idempotent consumption tolerates.
        }

        let entry_id: String = redis::cmd("XADD")
            .arg(&stream_key)
            .arg("*")
            .arg("subject")
            .arg(subject)
            .arg("payload")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;
        // Record the entry id so a duplicate publish can return the
        // original ack.
        let _: () = conn.set(&dedup_key, &entry_id).await?;

        Ok(PublishAck {
            stream: stream_key,
            sequence: entry_id,
        })
    }

    async fn durable_consumer(
        &self,
        name: &str,
        filter: &str,
    ) -> Result<Box<dyn DurableConsumer>> {
        let stream_key = self.stream_key(filter);
        let mut conn = self.manager.clone();

        // Deliver-all position; an existing group keeps its position.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream_key)
            .arg(name)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(err) = created {
            if err.code() != Some("BUSYGROUP") {
                return Err(err.into());
            }
        }

        Ok(Box::new(RedisConsumer {
            manager: self.manager.clone(),
            stream_key,
            group: name.to_string(),
            consumer: format!("{name}-worker"),
        }))
    }
}

struct RedisConsumer {
    manager: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
}

impl RedisConsumer {
    fn message_from(&self, entry: Entry) -> Result<RedisMessage> {
        let (entry_id, mut fields) = entry;
        let subject = fields
            .remove("subject")
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .ok_or_else(|| {
                PipelineError::Internal(format!(
                    "stream entry {entry_id} is missing its subject field"
                ))
            })?;
        let payload = fields.remove("payload").ok_or_else(|| {
            PipelineError::Internal(format!(
                "stream entry {entry_id} is missing its payload field"
            ))
        })?;
        Ok(RedisMessage {
            manager: self.manager.clone(),
            stream_key: self.stream_key.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            entry_id,
            subject,
            payload,
        })
    }

    /// One entry idle past the redelivery deadline, claimed for this
    /// consumer, if any.
    async fn claim_stalled(&self, conn: &mut ConnectionManager) -> Result<Option<Entry>> {
        let min_idle = REDELIVERY_IDLE.as_millis() as u64;

        // XPENDING <key> <group> IDLE <ms> - + 1
        let stalled: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(min_idle)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(conn)
            .await?;
        let Some((entry_id, _, _, _)) = stalled.into_iter().next() else {
            return Ok(None);
        };

        // Another consumer may win the claim; an empty reply just means
        // the pull loop goes around again.
        let claimed: Vec<Entry> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle)
            .arg(&entry_id)
            .query_async(conn)
            .await?;
        Ok(claimed.into_iter().next())
    }

    async fn read_new(&self, conn: &mut ConnectionManager) -> Result<Option<Entry>> {
        // XREADGROUP GROUP <group> <consumer> COUNT 1 BLOCK <ms>
        // STREAMS <key> >
        let reply: Option<Vec<(String, Vec<Entry>)>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(PULL_BLOCK.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(conn)
            .await?;
        Ok(reply
            .into_iter()
            .flatten()
            .flat_map(|(_, entries)| entries)
            .next())
    }
}

#[async_trait]
impl DurableConsumer for RedisConsumer {
    async fn next(&mut self) -> Result<Box<dyn PulledMessage>> {
        let mut conn = self.manager.clone();
        loop {
            // Abandoned or naked entries first.
            if let Some(entry) = self.claim_stalled(&mut conn).await? {
                return Ok(Box::new(self.message_from(entry)?));
            }
            if let Some(entry) = self.read_new(&mut conn).await? {
                return Ok(Box::new(self.message_from(entry)?));
            }
            // Blocking read timed out; loop back to the reclaim pass.
        }
    }
}

struct RedisMessage {
    manager: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    entry_id: String,
    subject: String,
    payload: Vec<u8>,
}

#[async_trait]
impl PulledMessage for RedisMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        // Back-date the pending entry past the redelivery deadline so the
        // next reclaim pass hands it out again immediately.
        let mut conn = self.manager.clone();
        let _: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(0)
            .arg(&self.entry_id)
            .arg("IDLE")
            .arg(REDELIVERY_IDLE.as_millis() as u64 + 1_000)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
