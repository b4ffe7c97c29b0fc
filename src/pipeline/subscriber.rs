use crate::app::ports::BrokerConsumerPort;
use crate::error::SubscribeError;
use crate::metrics as names;
use crate::types::MessageEnvelope;
use futures_util::stream::{self, Stream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A stream ends after this many failed receives in a row.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(100);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Downstream reader of the republished topics.
///
/// Offsets are committed by the broker client on a fixed interval, so a crash
/// between delivery and commit means the message is seen again after restart.
/// Subscribing again under the same group id resumes from the last commit.
pub struct Subscriber {
    group_id: String,
    consumer: Mutex<Option<Arc<dyn BrokerConsumerPort>>>,
    topics: Mutex<Vec<String>>,
}

impl Subscriber {
    pub fn new(group_id: impl Into<String>, consumer: Arc<dyn BrokerConsumerPort>) -> Self {
        let group_id = group_id.into();
        info!("Consumer initialized with group ID: {}", group_id);
        Self {
            group_id,
            consumer: Mutex::new(Some(consumer)),
            topics: Mutex::new(Vec::new()),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        lock(&self.topics).clone()
    }

    /// Replace the current subscription with `topics`.
    pub fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError> {
        let consumer = self.consumer()?;
        consumer.subscribe(topics)?;
        *lock(&self.topics) = topics.to_vec();
        info!("Subscribed to topics: {:?}", topics);
        Ok(())
    }

    /// Lazy, unbounded stream of envelopes from the current subscription.
    ///
    /// Ends after `max_messages` envelopes, when `stop` is cancelled, when the
    /// subscriber is closed, or after `MAX_CONSECUTIVE_ERRORS` failed receives
    /// in a row. Receive and decode errors are yielded as items and do not count
    /// toward `max_messages`. A failed receive delays the next one with a
    /// doubling backoff; an undecodable payload does not.
    pub fn stream(
        &self,
        max_messages: Option<usize>,
        stop: CancellationToken,
    ) -> impl Stream<Item = Result<MessageEnvelope, SubscribeError>> + '_ {
        stream::unfold((0usize, 0u32), move |(delivered, errors)| {
            let stop = stop.clone();
            async move {
                if max_messages.is_some_and(|max| delivered >= max) || stop.is_cancelled() {
                    return None;
                }
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!("Giving up after {} consecutive consumer errors", errors);
                    return None;
                }
                let consumer = self.consumer().ok()?;
                if errors > 0 {
                    tokio::select! {
                        _ = stop.cancelled() => return None,
                        _ = tokio::time::sleep(error_backoff(errors)) => {}
                    }
                }
                let item = tokio::select! {
                    _ = stop.cancelled() => return None,
                    item = consumer.recv() => item,
                };
                match item {
                    Ok(envelope) => {
                        metrics::counter!(names::MESSAGES_CONSUMED_TOTAL).increment(1);
                        debug!(
                            "Received message from {}:{}:{}",
                            envelope.topic, envelope.partition, envelope.offset
                        );
                        Some((Ok(envelope), (delivered + 1, 0)))
                    }
                    Err(err @ SubscribeError::Decode { .. }) => {
                        warn!("Skipping undecodable message: {}", err);
                        Some((Err(err), (delivered, 0)))
                    }
                    Err(err) => {
                        warn!("Error consuming messages: {}", err);
                        Some((Err(err), (delivered, errors + 1)))
                    }
                }
            }
        })
    }

    /// Subscribe to `topic` alone and wait up to `timeout` for one message.
    pub async fn poll_one(&self, topic: &str, timeout: Duration) -> Result<Option<MessageEnvelope>, SubscribeError> {
        self.subscribe(&[topic.to_string()])?;
        let consumer = self.consumer()?;
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Ok(Ok(envelope)) => {
                metrics::counter!(names::MESSAGES_CONSUMED_TOTAL).increment(1);
                Ok(Some(envelope))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!("No message on {} within {:?}", topic, timeout);
                Ok(None)
            }
        }
    }

    /// Unsubscribe and release the broker connection. Idempotent.
    pub fn close(&self) {
        let Some(consumer) = lock(&self.consumer).take() else {
            return;
        };
        consumer.unsubscribe();
        lock(&self.topics).clear();
        info!("Consumer {} closed", self.group_id);
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.consumer).is_none()
    }

    fn consumer(&self) -> Result<Arc<dyn BrokerConsumerPort>, SubscribeError> {
        lock(&self.consumer).clone().ok_or(SubscribeError::Closed)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}

/// 100ms after the first error, doubling up to 5s.
fn error_backoff(consecutive_errors: u32) -> Duration {
    let factor = 1u32 << consecutive_errors.saturating_sub(1).min(6);
    (ERROR_BACKOFF_BASE * factor).min(ERROR_BACKOFF_MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
