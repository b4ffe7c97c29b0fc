// Fetch, validate, enrich and publish station feeds; read them back downstream

pub mod enrich;
pub mod feed_client;
pub mod orchestrator;
pub mod publisher;
pub mod retry;
pub mod schedule;
pub mod subscriber;
pub mod validator;

pub use orchestrator::{CycleResult, CycleState, Orchestrator, RunSummary};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
