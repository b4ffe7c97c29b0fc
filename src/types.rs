use crate::constants;
use crate::error::SubscribeError;
use crate::pipeline::validator::{coerce_f64, coerce_i64, coerce_station_id};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A station record as it travels through the pipeline. Field order and
/// values from the feed are preserved exactly.
pub type StationRecord = Map<String, Value>;

/// The two GBFS feeds this pipeline republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    StationInformation,
    StationStatus,
}

impl FeedKind {
    /// Processing order within a run.
    pub const ALL: [FeedKind; 2] = [FeedKind::StationInformation, FeedKind::StationStatus];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::StationInformation => constants::STATION_INFORMATION,
            FeedKind::StationStatus => constants::STATION_STATUS,
        }
    }

    pub fn route(&self) -> &'static str {
        match self {
            FeedKind::StationInformation => constants::STATION_INFORMATION_ROUTE,
            FeedKind::StationStatus => constants::STATION_STATUS_ROUTE,
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.route())
    }

    pub fn topic(&self, prefix: &str) -> String {
        constants::topic_name(prefix, self.as_str())
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker acknowledgment for one published record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Consumer-side view of one broker message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEnvelope {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Value,
    /// Milliseconds since the epoch, as reported by the broker.
    pub broker_timestamp: Option<i64>,
}

impl MessageEnvelope {
    /// Decode the value into a typed record such as [`StationStatus`].
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.value)
    }

    /// Build an envelope from raw broker bytes. An absent or empty payload
    /// decodes to `null`; anything else must be JSON.
    pub fn from_raw(
        topic: &str,
        partition: i32,
        offset: i64,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
        broker_timestamp: Option<i64>,
    ) -> Result<Self, SubscribeError> {
        let value = match payload {
            None | Some([]) => Value::Null,
            Some(bytes) => serde_json::from_slice(bytes).map_err(|e| SubscribeError::Decode {
                topic: topic.to_string(),
                partition,
                offset,
                message: e.to_string(),
            })?,
        };
        Ok(Self {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(|k| String::from_utf8_lossy(k).into_owned()),
            value,
            broker_timestamp,
        })
    }
}

/// Station metadata record as published on the information topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInformation {
    #[serde(deserialize_with = "lenient_station_id")]
    pub station_id: String,
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
    pub timestamp: Option<i64>,
    pub data_type: Option<String>,
    /// Any other upstream fields (capacity, region_id, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Live availability record as published on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    #[serde(deserialize_with = "lenient_station_id")]
    pub station_id: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub num_bikes_available: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub num_docks_available: i64,
    pub timestamp: Option<i64>,
    pub data_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_station_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_station_id(&value).ok_or_else(|| de::Error::custom("station_id is empty or not a scalar"))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_f64(&value).ok_or_else(|| de::Error::custom(format!("expected a number, got {value}")))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_i64(&value).ok_or_else(|| de::Error::custom(format!("expected an integer, got {value}")))
}
