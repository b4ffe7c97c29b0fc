use crate::app::ports::BrokerProducerPort;
use crate::error::PublishError;
use crate::types::{DeliveryReceipt, StationRecord};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-record outcome of a batched publish, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<Result<DeliveryReceipt, PublishError>>,
}

impl BatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &PublishError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }
}

/// Sends validated station records to broker topics as JSON.
///
/// Every send waits for the broker acknowledgment. Delivery is at-least-once:
/// the producer retries transient failures and may duplicate a record, and no
/// deduplication key is attached.
pub struct Publisher {
    producer: Arc<dyn BrokerProducerPort>,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl Publisher {
    pub fn new(producer: Arc<dyn BrokerProducerPort>, flush_timeout: Duration) -> Self {
        Self {
            producer,
            flush_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn publish(
        &self,
        topic: &str,
        record: &StationRecord,
        key: Option<&str>,
    ) -> Result<DeliveryReceipt, PublishError> {
        self.ensure_open()?;
        let payload = encode(topic, record)?;
        let receipt = self.producer.send(topic, key, &payload).await?;
        debug!(
            "Delivered to {}:{}:{}",
            receipt.topic, receipt.partition, receipt.offset
        );
        Ok(receipt)
    }

    /// Dispatch every record, then wait for every acknowledgment. One failure
    /// does not stop the others from being awaited.
    pub async fn publish_batch(&self, topic: &str, records: &[(StationRecord, Option<String>)]) -> BatchReport {
        if let Err(err) = self.ensure_open() {
            return BatchReport {
                outcomes: records.iter().map(|_| Err(err.clone())).collect(),
            };
        }

        let sends = records.iter().map(|(record, key)| async move {
            let payload = encode(topic, record)?;
            self.producer.send(topic, key.as_deref(), &payload).await
        });
        let report = BatchReport {
            outcomes: join_all(sends).await,
        };

        if !report.is_complete() {
            warn!(
                "Batch to {}: {}/{} delivered",
                topic,
                report.delivered(),
                records.len()
            );
        }
        report
    }

    /// Flush outstanding messages and release the producer. Safe to call more
    /// than once; only the first call flushes.
    ///
    /// The flush blocks the calling thread for up to the flush timeout. From
    /// async code use [`shutdown`](Self::shutdown) instead.
    pub fn close(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log_close(self.producer.flush(self.flush_timeout))
    }

    /// [`close`](Self::close) with the flush moved onto the blocking pool.
    pub async fn shutdown(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        let result = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .unwrap_or_else(|e| Err(PublishError::Flush(e.to_string())));
        log_close(result)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), PublishError> {
        if self.is_closed() {
            Err(PublishError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn log_close(result: Result<(), PublishError>) -> Result<(), PublishError> {
    match &result {
        Ok(()) => info!("Publisher flushed and closed"),
        Err(e) => warn!("Publisher closed with flush error: {}", e),
    }
    result
}

fn encode(topic: &str, record: &StationRecord) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(record).map_err(|e| PublishError::Serialization {
        topic: topic.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockProducer {
        sent: Mutex<Vec<(String, Option<String>, Vec<u8>)>>,
        fail_station: Option<String>,
        flushes: Mutex<u32>,
        flush_thread: Mutex<Option<std::thread::ThreadId>>,
    }

    #[async_trait]
    impl BrokerProducerPort for MockProducer {
        async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<DeliveryReceipt, PublishError> {
            let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
            if let Some(bad) = &self.fail_station {
                if value["station_id"] == json!(bad) {
                    return Err(PublishError::Delivery {
                        topic: topic.to_string(),
                        message: "message timed out".to_string(),
                    });
                }
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((topic.to_string(), key.map(str::to_string), payload.to_vec()));
            Ok(DeliveryReceipt {
                topic: topic.to_string(),
                partition: 0,
                offset: sent.len() as i64 - 1,
            })
        }

        fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
            *self.flushes.lock().unwrap() += 1;
            *self.flush_thread.lock().unwrap() = Some(std::thread::current().id());
            Ok(())
        }
    }

    fn record(id: &str) -> StationRecord {
        json!({"station_id": id, "num_bikes_available": 1, "num_docks_available": 2})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_waits_for_receipt() {
        let producer = Arc::new(MockProducer::default());
        let publisher = Publisher::new(producer.clone(), Duration::from_secs(1));

        let receipt = publisher.publish("bikes_station_status", &record("1"), Some("1")).await.unwrap();
        assert_eq!(receipt.offset, 0);

        let sent = producer.sent.lock().unwrap();
        assert_eq!(sent[0].1.as_deref(), Some("1"));
        let value: serde_json::Value = serde_json::from_slice(&sent[0].2).unwrap();
        assert_eq!(value["station_id"], json!("1"));
    }

    #[tokio::test]
    async fn test_batch_reports_partial_failure() {
        let producer = Arc::new(MockProducer {
            fail_station: Some("2".to_string()),
            ..Default::default()
        });
        let publisher = Publisher::new(producer.clone(), Duration::from_secs(1));

        let batch: Vec<_> = ["1", "2", "3"].iter().map(|id| (record(id), None)).collect();
        let report = publisher.publish_batch("bikes_station_status", &batch).await;

        assert_eq!(report.delivered(), 2);
        let failures: Vec<usize> = report.failures().map(|(i, _)| i).collect();
        assert_eq!(failures, vec![1]);
        assert_eq!(producer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_publish() {
        let producer = Arc::new(MockProducer::default());
        let publisher = Publisher::new(producer.clone(), Duration::from_secs(1));

        publisher.close().unwrap();
        publisher.close().unwrap();
        assert_eq!(*producer.flushes.lock().unwrap(), 1);

        let err = publisher.publish("t", &record("1"), None).await.unwrap_err();
        assert_eq!(err, PublishError::Closed);
        assert!(err.is_fatal());

        let report = publisher.publish_batch("t", &[(record("1"), None)]).await;
        assert_eq!(report.delivered(), 0);

        drop(publisher);
        assert_eq!(*producer.flushes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_flushes() {
        let producer = Arc::new(MockProducer::default());
        {
            let publisher = Publisher::new(producer.clone(), Duration::from_secs(1));
            publisher.publish("t", &record("1"), None).await.unwrap();
        }
        assert_eq!(*producer.flushes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_off_the_runtime_thread() {
        let producer = Arc::new(MockProducer::default());
        let publisher = Publisher::new(producer.clone(), Duration::from_secs(1));

        publisher.shutdown().await.unwrap();
        publisher.shutdown().await.unwrap();
        publisher.close().unwrap();

        assert_eq!(*producer.flushes.lock().unwrap(), 1);
        let flushed_on = producer.flush_thread.lock().unwrap().unwrap();
        assert_ne!(flushed_on, std::thread::current().id());
        assert!(publisher.is_closed());
    }
}
