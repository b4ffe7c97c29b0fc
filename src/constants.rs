// Feed kind identifiers, also used as the `data_type` enrichment value
pub const STATION_INFORMATION: &str = "station_information";
pub const STATION_STATUS: &str = "station_status";

// GBFS endpoint file names, relative to the configured base URL
pub const STATION_INFORMATION_ROUTE: &str = "station_information.json";
pub const STATION_STATUS_ROUTE: &str = "station_status.json";

// Enrichment field names
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_DATA_TYPE: &str = "data_type";

// Record identity, present in both feeds
pub const FIELD_STATION_ID: &str = "station_id";

pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";
pub const DEFAULT_TOPIC_PREFIX: &str = "bikes";
pub const DEFAULT_CONSUMER_GROUP: &str = "bikes-consumer-group";
pub const DEFAULT_BASE_URL: &str = "https://gbfs.citibikenyc.com/gbfs/en";
pub const DEFAULT_USER_AGENT: &str = "CitiBikes-DataPipeline/1.0";
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Build the topic name for a feed kind under a prefix.
pub fn topic_name(prefix: &str, feed: &str) -> String {
    format!("{prefix}_{feed}")
}
