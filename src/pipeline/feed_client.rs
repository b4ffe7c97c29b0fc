use crate::app::ports::{HttpClientPort, TransportError};
use crate::error::FetchError;
use crate::metrics as names;
use crate::pipeline::retry::{classify_status, RetryPolicy, StatusClass};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// GBFS feed fetcher: bounded retries over an HTTP transport, then extraction
/// of the `data.stations` list.
pub struct FeedClient {
    http: Arc<dyn HttpClientPort>,
    retry: RetryPolicy,
}

enum AttemptFailure {
    Retryable(String),
    Terminal(FetchError),
}

impl FeedClient {
    pub fn new(http: Arc<dyn HttpClientPort>, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }

    /// Fetch the station list at `url`.
    ///
    /// Timeouts, connection failures, 5xx and 429 are retried with a fixed
    /// delay, at most `max_retries + 1` attempts in total. Other statuses and
    /// malformed bodies fail immediately.
    #[instrument(skip(self, query), fields(url = %url))]
    pub async fn fetch(&self, url: &str, query: &[(String, String)]) -> Result<Vec<Value>, FetchError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            metrics::counter!(names::FETCH_ATTEMPTS_TOTAL).increment(1);
            debug!("GET {} (attempt {}/{})", url, attempt, max_attempts);

            let last_cause = match self.attempt(url, query).await {
                Ok(stations) => {
                    info!("Fetched {} stations from {}", stations.len(), url);
                    return Ok(stations);
                }
                Err(AttemptFailure::Terminal(err)) => {
                    warn!("Fetch failed without retry: {}", err);
                    return Err(err);
                }
                Err(AttemptFailure::Retryable(cause)) => cause,
            };

            if !self.retry.should_retry(attempt) {
                warn!("Giving up on {} after {} attempts: {}", url, attempt, last_cause);
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last_cause,
                });
            }

            warn!(
                "Request failed, retrying in {:?} (attempt {}/{}): {}",
                self.retry.delay, attempt, max_attempts, last_cause
            );
            tokio::time::sleep(self.retry.delay).await;
        }
    }

    async fn attempt(&self, url: &str, query: &[(String, String)]) -> Result<Vec<Value>, AttemptFailure> {
        let response = self
            .http
            .get(url, query)
            .await
            .map_err(|e: TransportError| AttemptFailure::Retryable(e.to_string()))?;

        match classify_status(response.status) {
            StatusClass::Success => {}
            StatusClass::Retryable => {
                return Err(AttemptFailure::Retryable(format!("HTTP status {}", response.status)));
            }
            StatusClass::Terminal => {
                return Err(AttemptFailure::Terminal(FetchError::Status {
                    url: url.to_string(),
                    status: response.status,
                }));
            }
        }

        extract_stations(url, &response.bytes).map_err(AttemptFailure::Terminal)
    }
}

/// Pull `data.stations` out of a GBFS response body.
pub fn extract_stations(url: &str, body: &[u8]) -> Result<Vec<Value>, FetchError> {
    let malformed = |reason: String| FetchError::Malformed { url: url.to_string(), reason };

    let mut payload: Value =
        serde_json::from_slice(body).map_err(|e| malformed(format!("body is not JSON: {e}")))?;

    match payload.pointer_mut("/data/stations").map(Value::take) {
        Some(Value::Array(stations)) => Ok(stations),
        Some(other) => Err(malformed(format!(
            "data.stations is not a list (found {})",
            json_type(&other)
        ))),
        None => Err(malformed("missing data.stations".to_string())),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
