use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bikeshare_stream::app::ports::{BrokerConsumerPort, BrokerProducerPort};
use bikeshare_stream::config::Config;
use bikeshare_stream::infra::http_client::ReqwestHttp;
use bikeshare_stream::infra::in_memory_broker::InMemoryBroker;
use bikeshare_stream::infra::kafka_consumer::KafkaConsumer;
use bikeshare_stream::infra::kafka_producer::KafkaProducer;
use bikeshare_stream::logging;
use bikeshare_stream::metrics::init_metrics;
use bikeshare_stream::pipeline::{Orchestrator, RunSummary, Subscriber};
use bikeshare_stream::types::FeedKind;

#[derive(Parser)]
#[command(name = "bikeshare_stream")]
#[command(about = "Bike-share station feed ingester and Kafka publisher")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both station feeds and publish validated records
    Run {
        #[arg(long, value_enum, default_value_t = RunMode::Single)]
        mode: RunMode,
        /// Seconds between executions in continuous mode
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long, value_enum, default_value_t = BrokerKind::Kafka)]
        broker: BrokerKind,
    },
    /// Read published station records back from Kafka
    Consume {
        #[arg(long, value_enum, default_value_t = ConsumeMode::Stream)]
        mode: ConsumeMode,
        #[arg(long)]
        group_id: Option<String>,
        /// Stop after this many messages
        #[arg(long)]
        max_messages: Option<usize>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// How long single mode waits on each topic
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RunMode {
    Single,
    Continuous,
}

#[derive(Clone, Copy, ValueEnum)]
enum BrokerKind {
    Kafka,
    /// Process-local broker; nothing leaves the process
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConsumeMode {
    Stream,
    Single,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    match &cli.command {
        Commands::Run {
            interval: Some(secs), ..
        } => config.pipeline.execution_interval_secs = *secs,
        Commands::Consume {
            group_id: Some(group), ..
        } => config.kafka.consumer_group_id = group.clone(),
        _ => {}
    }
    config.validate().context("invalid configuration")?;

    let _guard = logging::init_logging(&config.logging);
    init_metrics(&config.metrics);

    match cli.command {
        Commands::Run { mode, broker, .. } => run_pipeline(&config, mode, broker).await,
        Commands::Consume {
            mode,
            max_messages,
            duration,
            timeout_ms,
            ..
        } => run_consumer(&config, mode, max_messages, duration, timeout_ms).await,
    }
}

async fn run_pipeline(config: &Config, mode: RunMode, broker: BrokerKind) -> anyhow::Result<ExitCode> {
    let http = Arc::new(ReqwestHttp::new(&config.api).context("failed to build HTTP client")?);
    let producer: Arc<dyn BrokerProducerPort> = match broker {
        BrokerKind::Kafka => Arc::new(KafkaProducer::new(&config.kafka).context("failed to create Kafka producer")?),
        BrokerKind::Memory => Arc::new(InMemoryBroker::new().producer()),
    };
    let orchestrator = Orchestrator::from_config(config, http, producer);

    let code = match mode {
        RunMode::Single => {
            info!("Running pipeline in single mode");
            let summary = orchestrator.run_once().await;
            print_summary(&summary);
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        RunMode::Continuous => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));
            orchestrator
                .run_continuous(config.pipeline.interval(), cancel)
                .await;
            ExitCode::SUCCESS
        }
    };

    orchestrator.close().await;
    Ok(code)
}

async fn run_consumer(
    config: &Config,
    mode: ConsumeMode,
    max_messages: Option<usize>,
    duration: Option<u64>,
    timeout_ms: u64,
) -> anyhow::Result<ExitCode> {
    let group_id = config.kafka.consumer_group_id.clone();
    let consumer: Arc<dyn BrokerConsumerPort> =
        Arc::new(KafkaConsumer::new(&config.kafka, &group_id).context("failed to create Kafka consumer")?);
    let subscriber = Subscriber::new(group_id, consumer);
    let topics: Vec<String> = FeedKind::ALL.iter().map(|kind| config.topic_for(*kind)).collect();

    match mode {
        ConsumeMode::Stream => {
            subscriber.subscribe(&topics)?;
            let stop = CancellationToken::new();
            tokio::spawn(cancel_on_signal(stop.clone()));
            if let Some(secs) = duration {
                let stop = stop.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    stop.cancel();
                });
            }

            let mut received = 0usize;
            let mut messages = Box::pin(subscriber.stream(max_messages, stop));
            while let Some(item) = messages.next().await {
                match item {
                    Ok(envelope) => {
                        received += 1;
                        info!(
                            topic = %envelope.topic,
                            partition = envelope.partition,
                            offset = envelope.offset,
                            "{}",
                            envelope.value
                        );
                    }
                    Err(e) => error!("Consumer error: {}", e),
                }
            }
            info!("Consumed {} messages", received);
        }
        ConsumeMode::Single => {
            for topic in &topics {
                match subscriber.poll_one(topic, Duration::from_millis(timeout_ms)).await? {
                    Some(envelope) => info!(
                        topic = %envelope.topic,
                        offset = envelope.offset,
                        "{}",
                        envelope.value
                    ),
                    None => warn!("No message available on {}", topic),
                }
            }
        }
    }

    subscriber.close();
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Execution #{} results:", summary.execution);
    for cycle in &summary.cycles {
        println!(
            "   {}: fetched {}, accepted {}, published {}, skipped {} ({:?})",
            cycle.feed,
            cycle.fetched,
            cycle.accepted,
            cycle.published,
            cycle.skipped.len(),
            cycle.state
        );
        if let Some(failure) = &cycle.failure {
            println!("   ⚠️  {}", failure);
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM. A handler that fails to install is
/// logged and treated as never firing.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => return,
    }

    info!("Shutdown signal received, finishing current execution");
    token.cancel();
}
