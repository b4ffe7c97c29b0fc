use crate::app::ports::{BrokerConsumerPort, BrokerProducerPort};
use crate::config::OffsetReset;
use crate::error::{PublishError, SubscribeError};
use crate::types::{DeliveryReceipt, MessageEnvelope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Process-local broker with one partition per topic.
///
/// Consumer groups commit on every delivery, which matches auto-commit with a
/// zero interval. Used for `--broker memory` runs and for tests.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    arrivals: Notify,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<StoredMessage>>,
    committed: HashMap<(String, String), i64>,
    pending_failures: HashMap<String, u32>,
    unavailable: bool,
}

struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
    timestamp: i64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(&self) -> InMemoryProducer {
        InMemoryProducer {
            shared: self.shared.clone(),
        }
    }

    pub fn consumer(&self, group_id: impl Into<String>, reset: OffsetReset) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: self.shared.clone(),
            group_id: group_id.into(),
            reset,
            positions: Mutex::new(Vec::new()),
        }
    }

    /// Reject the next `count` sends to `topic` with a delivery error.
    pub fn fail_next_sends(&self, topic: &str, count: u32) {
        self.shared.lock().pending_failures.insert(topic.to_string(), count);
    }

    /// While unavailable every send fails as if all brokers were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.lock().unavailable = unavailable;
    }

    pub fn len(&self, topic: &str) -> usize {
        self.shared.lock().topics.get(topic).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Every message on `topic`, decoded, without touching any group offset.
    pub fn messages(&self, topic: &str) -> Vec<MessageEnvelope> {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .into_iter()
            .flatten()
            .enumerate()
            .filter_map(|(offset, msg)| msg.envelope(topic, offset as i64).ok())
            .collect()
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .copied()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StoredMessage {
    fn envelope(&self, topic: &str, offset: i64) -> Result<MessageEnvelope, SubscribeError> {
        MessageEnvelope::from_raw(
            topic,
            0,
            offset,
            self.key.as_deref().map(str::as_bytes),
            Some(self.payload.as_slice()),
            Some(self.timestamp),
        )
    }
}

pub struct InMemoryProducer {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerProducerPort for InMemoryProducer {
    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<DeliveryReceipt, PublishError> {
        let offset = {
            let mut state = self.shared.lock();
            if state.unavailable {
                return Err(PublishError::Connection("all brokers down".to_string()));
            }
            if let Some(remaining) = state.pending_failures.get_mut(topic).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(PublishError::Delivery {
                    topic: topic.to_string(),
                    message: "injected delivery failure".to_string(),
                });
            }
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(StoredMessage {
                key: key.map(str::to_string),
                payload: payload.to_vec(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            log.len() as i64 - 1
        };
        self.shared.arrivals.notify_waiters();
        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }

    fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Consumer bound to one group. Positions start at the group's committed
/// offset, or at the reset policy when the group has never read the topic.
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    reset: OffsetReset,
    positions: Mutex<Vec<(String, i64)>>,
}

impl InMemoryConsumer {
    fn positions(&self) -> MutexGuard<'_, Vec<(String, i64)>> {
        self.positions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_next(&self) -> Option<Result<MessageEnvelope, SubscribeError>> {
        let mut state = self.shared.lock();
        let mut positions = self.positions();
        for (topic, position) in positions.iter_mut() {
            let Some(msg) = state.topics.get(topic.as_str()).and_then(|log| log.get(*position as usize)) else {
                continue;
            };
            let item = msg.envelope(topic, *position);
            *position += 1;
            state
                .committed
                .insert((self.group_id.clone(), topic.clone()), *position);
            return Some(item);
        }
        None
    }
}

#[async_trait]
impl BrokerConsumerPort for InMemoryConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError> {
        let state = self.shared.lock();
        let positions = topics
            .iter()
            .map(|topic| {
                let committed = state.committed.get(&(self.group_id.clone(), topic.clone()));
                let start = match (committed, self.reset) {
                    (Some(offset), _) => *offset,
                    (None, OffsetReset::Earliest) => 0,
                    (None, OffsetReset::Latest) => state.topics.get(topic).map_or(0, Vec::len) as i64,
                };
                (topic.clone(), start)
            })
            .collect();
        *self.positions() = positions;
        Ok(())
    }

    fn unsubscribe(&self) {
        self.positions().clear();
    }

    async fn recv(&self) -> Result<MessageEnvelope, SubscribeError> {
        loop {
            // Register interest before checking so a send in between is not missed.
            let arrived = self.shared.arrivals.notified();
            if let Some(item) = self.try_next() {
                return item;
            }
            arrived.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_assigns_sequential_offsets() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        let first = producer.send("t", None, b"{}").await.unwrap();
        let second = producer.send("t", Some("k"), b"{}").await.unwrap();
        assert_eq!((first.offset, second.offset), (0, 1));
        assert_eq!(broker.messages("t")[1].key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_group_resumes_from_commit() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        for i in 0..3 {
            producer.send("t", None, format!("{i}").as_bytes()).await.unwrap();
        }

        let consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&["t".to_string()]).unwrap();
        assert_eq!(consumer.recv().await.unwrap().offset, 0);
        consumer.unsubscribe();
        assert_eq!(broker.committed_offset("g", "t"), Some(1));

        let again = broker.consumer("g", OffsetReset::Earliest);
        again.subscribe(&["t".to_string()]).unwrap();
        assert_eq!(again.recv().await.unwrap().offset, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_skips_existing_messages() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        producer.send("t", None, b"1").await.unwrap();

        let consumer = broker.consumer("fresh", OffsetReset::Latest);
        consumer.subscribe(&["t".to_string()]).unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(100), consumer.recv()).await;
        assert!(waited.is_err());

        producer.send("t", None, b"2").await.unwrap();
        let env = consumer.recv().await.unwrap();
        assert_eq!((env.offset, env.value.clone()), (1, serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_send() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&["t".to_string()]).unwrap();

        let producer = broker.producer();
        let waiter = tokio::spawn(async move { consumer.recv().await.map(|e| e.offset) });
        tokio::task::yield_now().await;
        producer.send("t", None, b"{}").await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection_and_outage() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        broker.fail_next_sends("t", 1);
        assert!(matches!(
            producer.send("t", None, b"{}").await,
            Err(PublishError::Delivery { .. })
        ));
        assert!(producer.send("t", None, b"{}").await.is_ok());

        broker.set_unavailable(true);
        let err = producer.send("t", None, b"{}").await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(broker.len("t"), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_an_error_item() {
        let broker = InMemoryBroker::new();
        broker.producer().send("t", None, b"not json").await.unwrap();
        let consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&["t".to_string()]).unwrap();
        assert!(matches!(
            consumer.recv().await,
            Err(SubscribeError::Decode { offset: 0, .. })
        ));
        assert_eq!(broker.committed_offset("g", "t"), Some(1));
    }
}
