use crate::app::ports::BrokerProducerPort;
use crate::config::KafkaConfig;
use crate::error::PublishError;
use crate::types::DeliveryReceipt;
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// librdkafka settings for the publishing side. Every send waits for all
/// in-sync replicas and is retried by the client on transient errors.
pub fn producer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("client.id", "bikeshare-stream-producer")
        .set("acks", &config.producer_acks)
        .set("message.send.max.retries", config.producer_retries.to_string())
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("enable.idempotence", "false");
    client
}

/// Client context that remembers whether librdkafka last reported the
/// cluster as unreachable.
///
/// librdkafka keeps retrying through an outage and each queued message
/// eventually fails on its own with `MessageTimedOut`. The connection state
/// only shows up on the client-level error callback, so it is kept here and
/// consulted when a delivery fails.
#[derive(Clone, Default)]
pub struct BrokerHealth {
    down: Arc<AtomicBool>,
}

impl BrokerHealth {
    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn mark_up(&self) {
        if self.down.swap(false, Ordering::SeqCst) {
            info!("Kafka brokers reachable again");
        }
    }
}

impl ClientContext for BrokerHealth {
    fn error(&self, error: KafkaError, reason: &str) {
        match error.rdkafka_error_code() {
            Some(
                RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::Resolve
                | RDKafkaErrorCode::Fatal,
            ) => {
                if !self.down.swap(true, Ordering::SeqCst) {
                    warn!("Kafka brokers unreachable: {}: {}", error, reason);
                }
            }
            _ => error!("librdkafka error: {}: {}", error, reason),
        }
    }
}

pub struct KafkaProducer {
    producer: FutureProducer<BrokerHealth>,
    health: BrokerHealth,
    queue_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        let health = BrokerHealth::default();
        let producer: FutureProducer<BrokerHealth> = producer_client_config(config)
            .create_with_context(health.clone())
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        info!("Kafka producer created for {}", config.bootstrap_servers);
        Ok(Self {
            producer,
            health,
            queue_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

#[async_trait]
impl BrokerProducerPort for KafkaProducer {
    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<DeliveryReceipt, PublishError> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        match self.producer.send(record, Timeout::After(self.queue_timeout)).await {
            Ok((partition, offset)) => {
                self.health.mark_up();
                Ok(DeliveryReceipt {
                    topic: topic.to_string(),
                    partition,
                    offset,
                })
            }
            Err((err, _)) => Err(delivery_error(topic, err, &self.health)),
        }
    }

    fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| PublishError::Flush(e.to_string()))
    }
}

/// Per-record failure unless the client reports it can reach no broker.
fn delivery_error(topic: &str, err: KafkaError, health: &BrokerHealth) -> PublishError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::Fatal) => {
            PublishError::Connection(err.to_string())
        }
        _ if health.is_down() => PublishError::Connection(format!("{err} (brokers unreachable)")),
        _ => PublishError::Delivery {
            topic: topic.to_string(),
            message: err.to_string(),
        },
    }
}
