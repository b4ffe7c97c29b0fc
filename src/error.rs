use thiserror::Error;

/// Terminal outcome of a feed fetch. Retryable failures only surface here once
/// the retry budget is spent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempts: {last_cause}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_cause: String,
    },

    #[error("request to {url} returned non-retryable status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("failed to serialize record for {topic}: {message}")]
    Serialization { topic: String, message: String },

    #[error("delivery to {topic} failed: {message}")]
    Delivery { topic: String, message: String },

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("publisher is closed")]
    Closed,

    #[error("broker connection unusable: {0}")]
    Connection(String),
}

impl PublishError {
    /// True when the producer itself can no longer deliver anything, as opposed
    /// to a single record failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Closed | PublishError::Connection(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscribeError {
    #[error("failed to create consumer: {0}")]
    Client(String),

    #[error("failed to subscribe to {topics:?}: {message}")]
    Subscribe { topics: Vec<String>, message: String },

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("failed to decode message at {topic}:{partition}:{offset}: {message}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        message: String,
    },

    #[error("subscriber is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for environment variable {name}: {message}")]
    Env { name: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
