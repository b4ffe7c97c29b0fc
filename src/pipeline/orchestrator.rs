use crate::app::ports::{BrokerProducerPort, HttpClientPort};
use crate::config::Config;
use crate::constants::FIELD_STATION_ID;
use crate::error::FetchError;
use crate::metrics;
use crate::pipeline::enrich::enrich;
use crate::pipeline::feed_client::FeedClient;
use crate::pipeline::publisher::Publisher;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::schedule::next_delay;
use crate::pipeline::validator::{coerce_station_id, record_station_id, validate, Validation};
use crate::types::{FeedKind, StationRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Where a cycle is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Fetching,
    Validating,
    Publishing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Invalid(String),
    PublishFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Invalid(reason) => f.write_str(reason),
            SkipReason::PublishFailed(reason) => write!(f, "publish failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub station_id: Option<String>,
    pub reason: SkipReason,
}

/// Statistics for one fetch-validate-publish pass over a single feed.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub feed: FeedKind,
    pub state: CycleState,
    pub fetched: usize,
    pub accepted: usize,
    pub published: usize,
    pub skipped: Vec<SkippedRecord>,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl CycleResult {
    fn start(feed: FeedKind) -> Self {
        Self {
            feed,
            state: CycleState::Fetching,
            fetched: 0,
            accepted: 0,
            published: 0,
            skipped: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    fn advance(&mut self, state: CycleState) {
        debug!("{}: {:?} -> {:?}", self.feed, self.state, state);
        self.state = state;
    }

    fn fail(&mut self, message: String) {
        self.advance(CycleState::Failed);
        self.failure = Some(message);
    }

    fn skip(&mut self, station_id: Option<String>, reason: SkipReason) {
        warn!(
            feed = %self.feed,
            station_id = station_id.as_deref().unwrap_or("<unknown>"),
            reason = %reason,
            "Skipping record"
        );
        self.skipped.push(SkippedRecord { station_id, reason });
    }

    pub fn is_success(&self) -> bool {
        self.state == CycleState::Done
    }

    pub fn skip_reasons(&self) -> Vec<String> {
        self.skipped.iter().map(|s| s.reason.to_string()).collect()
    }

    pub fn rejected_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Invalid(_)))
            .count()
    }

    pub fn publish_failure_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::PublishFailed(_)))
            .count()
    }
}

/// One cycle per feed kind.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub execution: u64,
    pub cycles: Vec<CycleResult>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.cycles.iter().all(CycleResult::is_success)
    }

    pub fn total_published(&self) -> usize {
        self.cycles.iter().map(|c| c.published).sum()
    }

    pub fn cycle(&self, feed: FeedKind) -> Option<&CycleResult> {
        self.cycles.iter().find(|c| c.feed == feed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContinuousReport {
    pub runs: u64,
    pub failed_runs: u64,
}

/// Settings the orchestrator reads on every cycle.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub base_url: String,
    pub query: Vec<(String, String)>,
    pub topic_prefix: String,
    pub batch_size: usize,
    pub key_by_station_id: bool,
    pub max_execution_time: Option<Duration>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.api.base_url.clone(),
            query: Vec::new(),
            topic_prefix: config.kafka.topic_prefix.clone(),
            batch_size: config.pipeline.batch_size.max(1),
            key_by_station_id: config.kafka.key_by_station_id,
            max_execution_time: config.pipeline.max_execution_time(),
        }
    }
}

/// Drives fetch cycles for both feeds over one feed client and one publisher.
///
/// Feeds are processed one after the other so every failure is attributed to
/// exactly one feed. A failed feed never stops the other from running.
pub struct Orchestrator {
    feed_client: FeedClient,
    publisher: Publisher,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(feed_client: FeedClient, publisher: Publisher, settings: OrchestratorSettings) -> Self {
        Self {
            feed_client,
            publisher,
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        http: Arc<dyn HttpClientPort>,
        producer: Arc<dyn BrokerProducerPort>,
    ) -> Self {
        let retry = RetryPolicy::new(config.api.max_retries, config.api.retry_delay());
        let flush_timeout = Duration::from_millis(config.kafka.message_timeout_ms);
        Self::new(
            FeedClient::new(http, retry),
            Publisher::new(producer, flush_timeout),
            OrchestratorSettings::from_config(config),
        )
    }

    #[instrument(name = "cycle", skip(self, kind), fields(feed = %kind))]
    pub async fn run_cycle(&self, kind: FeedKind) -> CycleResult {
        let clock = Instant::now();
        let mut cycle = CycleResult::start(kind);

        self.drive_cycle(kind, &mut cycle).await;

        cycle.duration = clock.elapsed();
        metrics::record_cycle(&cycle);
        match cycle.state {
            CycleState::Done => info!(
                "{} cycle done: fetched={} accepted={} published={} skipped={}",
                kind,
                cycle.fetched,
                cycle.accepted,
                cycle.published,
                cycle.skipped.len()
            ),
            _ => error!(
                "{} cycle failed: {} (fetched={} accepted={} published={})",
                kind,
                cycle.failure.as_deref().unwrap_or("unknown error"),
                cycle.fetched,
                cycle.accepted,
                cycle.published
            ),
        }
        cycle
    }

    async fn drive_cycle(&self, kind: FeedKind, cycle: &mut CycleResult) {
        let url = kind.url(&self.settings.base_url);
        let stations = match self.feed_client.fetch(&url, &self.settings.query).await {
            Ok(stations) => stations,
            Err(err) => {
                cycle.fail(describe_fetch_error(&err));
                return;
            }
        };
        cycle.fetched = stations.len();

        cycle.advance(CycleState::Validating);
        let ingested_at = Utc::now().timestamp();
        let mut ready: Vec<(StationRecord, Option<String>)> = Vec::with_capacity(stations.len());
        for record in stations {
            let station_id = record_station_id(&record);
            match validate(&record, kind) {
                Validation::Accepted => {
                    let Value::Object(fields) = record else {
                        // validate only accepts objects
                        continue;
                    };
                    let key = station_id.filter(|_| self.settings.key_by_station_id);
                    ready.push((enrich(fields, kind, ingested_at), key));
                }
                Validation::Rejected(reason) => cycle.skip(station_id, SkipReason::Invalid(reason)),
            }
        }
        cycle.accepted = ready.len();

        cycle.advance(CycleState::Publishing);
        let topic = kind.topic(&self.settings.topic_prefix);
        for chunk in ready.chunks(self.settings.batch_size) {
            let report = self.publisher.publish_batch(&topic, chunk).await;
            let mut fatal = None;
            for ((record, _), outcome) in chunk.iter().zip(report.outcomes) {
                match outcome {
                    Ok(_) => cycle.published += 1,
                    Err(err) if err.is_fatal() => {
                        fatal.get_or_insert(err);
                    }
                    Err(err) => {
                        let station_id = record.get(FIELD_STATION_ID).and_then(coerce_station_id);
                        cycle.skip(station_id, SkipReason::PublishFailed(err.to_string()));
                    }
                }
            }
            if let Some(err) = fatal {
                cycle.fail(format!("publishing to {topic} aborted: {err}"));
                return;
            }
        }

        // A broker that rejects every record is an outage, not bad data.
        if cycle.accepted > 0 && cycle.published == 0 {
            cycle.fail(format!(
                "publishing to {topic} delivered none of {} records",
                cycle.accepted
            ));
            return;
        }

        cycle.advance(CycleState::Done);
    }

    /// Run one cycle for each feed kind, information first.
    pub async fn run_once(&self) -> RunSummary {
        self.run_numbered(1).await
    }

    #[instrument(name = "run", skip(self))]
    async fn run_numbered(&self, execution: u64) -> RunSummary {
        let clock = Instant::now();
        let mut cycles = Vec::with_capacity(FeedKind::ALL.len());
        for kind in FeedKind::ALL {
            cycles.push(self.run_cycle(kind).await);
        }

        let summary = RunSummary {
            execution,
            cycles,
            duration: clock.elapsed(),
        };
        if let Some(limit) = self.settings.max_execution_time {
            if summary.duration > limit {
                warn!(
                    "Execution #{} took {:.1}s, longer than the {:.1}s limit",
                    execution,
                    summary.duration.as_secs_f64(),
                    limit.as_secs_f64()
                );
            }
        }
        summary
    }

    /// Run back-to-back executions on a fixed grid of `interval` until `cancel`
    /// fires.
    ///
    /// The token is checked before each execution and before each sleep. An
    /// execution that has started always runs to completion; the sleep ends
    /// early on cancellation so shutdown does not wait a full interval.
    pub async fn run_continuous(&self, interval: Duration, cancel: CancellationToken) -> ContinuousReport {
        info!("Starting continuous streaming with {:?} intervals", interval);
        let start = Instant::now();
        let mut report = ContinuousReport::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            report.runs += 1;
            info!("Execution #{} starting at {}", report.runs, Utc::now().format("%Y-%m-%d %H:%M:%S"));
            let summary = self.run_numbered(report.runs).await;
            if summary.is_success() {
                info!(
                    "Execution #{} completed successfully ({} records published)",
                    report.runs,
                    summary.total_published()
                );
            } else {
                report.failed_runs += 1;
                error!("Execution #{} failed", report.runs);
            }

            if cancel.is_cancelled() {
                break;
            }

            let delay = next_delay(interval, start.elapsed());
            info!("Next execution in {:.1} seconds", delay.as_secs_f64());
            tokio::select! {
                _ = cancel.cancelled() => debug!("Shutdown requested during sleep"),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            "Continuous streaming stopped after {} executions ({} failed)",
            report.runs, report.failed_runs
        );
        report
    }

    /// Flush and release the publisher without blocking the runtime.
    pub async fn close(&self) {
        if let Err(e) = self.publisher.shutdown().await {
            warn!("Publisher close reported an error: {}", e);
        }
    }
}

fn describe_fetch_error(err: &FetchError) -> String {
    format!("fetch failed: {err}")
}
