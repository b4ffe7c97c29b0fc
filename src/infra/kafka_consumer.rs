use crate::app::ports::BrokerConsumerPort;
use crate::config::KafkaConfig;
use crate::error::SubscribeError;
use crate::types::MessageEnvelope;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tracing::info;

pub fn consumer_client_config(config: &KafkaConfig, group_id: &str) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", config.auto_commit_interval_ms.to_string())
        .set("auto.offset.reset", config.auto_offset_reset.as_str())
        .set("enable.partition.eof", "false");
    client
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig, group_id: &str) -> Result<Self, SubscribeError> {
        let consumer: StreamConsumer = consumer_client_config(config, group_id)
            .create()
            .map_err(|e| SubscribeError::Client(e.to_string()))?;
        info!("Kafka consumer created for {} in group {}", config.bootstrap_servers, group_id);
        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerConsumerPort for KafkaConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&names)
            .map_err(|e| SubscribeError::Subscribe {
                topics: topics.to_vec(),
                message: e.to_string(),
            })
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }

    async fn recv(&self) -> Result<MessageEnvelope, SubscribeError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| SubscribeError::Receive(e.to_string()))?;
        envelope_from(&message)
    }
}

pub fn envelope_from<M: Message>(message: &M) -> Result<MessageEnvelope, SubscribeError> {
    MessageEnvelope::from_raw(
        message.topic(),
        message.partition(),
        message.offset(),
        message.key(),
        message.payload(),
        message.timestamp().to_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OffsetReset;
    use rdkafka::message::{OwnedMessage, Timestamp};

    #[test]
    fn test_client_config_uses_group_and_reset() {
        let config = KafkaConfig {
            auto_offset_reset: OffsetReset::Latest,
            ..KafkaConfig::default()
        };
        let client = consumer_client_config(&config, "bikes-consumer-group");
        assert_eq!(client.get("group.id"), Some("bikes-consumer-group"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("enable.auto.commit"), Some("true"));
        assert_eq!(client.get("auto.commit.interval.ms"), Some("1000"));
    }

    #[test]
    fn test_envelope_from_message() {
        let message = OwnedMessage::new(
            Some(br#"{"station_id":"72","num_bikes_available":4}"#.to_vec()),
            Some(b"72".to_vec()),
            "bikes_station_status".to_string(),
            Timestamp::CreateTime(1_700_000_000_000),
            3,
            42,
            None,
        );

        let envelope = envelope_from(&message).unwrap();
        assert_eq!(envelope.topic, "bikes_station_status");
        assert_eq!((envelope.partition, envelope.offset), (3, 42));
        assert_eq!(envelope.key.as_deref(), Some("72"));
        assert_eq!(envelope.value["num_bikes_available"], 4);
        assert_eq!(envelope.broker_timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_envelope_from_garbage_is_decode_error() {
        let message = OwnedMessage::new(
            Some(b"\xff\xfe".to_vec()),
            None,
            "bikes_station_status".to_string(),
            Timestamp::NotAvailable,
            0,
            9,
            None,
        );
        assert!(matches!(
            envelope_from(&message),
            Err(SubscribeError::Decode { offset: 9, .. })
        ));
    }
}
