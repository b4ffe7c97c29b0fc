use anyhow::Result;
use async_trait::async_trait;
use bikeshare_stream::app::ports::{HttpClientPort, HttpGetResult, TransportError};
use bikeshare_stream::config::{Config, OffsetReset};
use bikeshare_stream::infra::in_memory_broker::InMemoryBroker;
use bikeshare_stream::pipeline::{CycleState, Orchestrator, Subscriber};
use bikeshare_stream::types::{FeedKind, StationInformation, StationStatus};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serves canned GBFS documents by route.
struct StaticFeeds {
    information: Value,
    status: Value,
}

#[async_trait]
impl HttpClientPort for StaticFeeds {
    async fn get(&self, url: &str, _query: &[(String, String)]) -> Result<HttpGetResult, TransportError> {
        let body = if url.ends_with("/station_information.json") {
            &self.information
        } else if url.ends_with("/station_status.json") {
            &self.status
        } else {
            return Ok(HttpGetResult {
                status: 404,
                bytes: Vec::new(),
                content_type: "text/plain".to_string(),
            });
        };
        Ok(HttpGetResult {
            status: 200,
            bytes: serde_json::to_vec(body).unwrap(),
            content_type: "application/json".to_string(),
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.api.base_url = "https://gbfs.example.test/gbfs/en".to_string();
    config.api.max_retries = 0;
    config
}

fn feeds() -> Arc<StaticFeeds> {
    Arc::new(StaticFeeds {
        information: json!({"last_updated": 1700000000, "data": {"stations": [
            {"station_id": "72", "name": "W 52 St & 11 Ave", "lat": 40.767, "lon": -73.993, "capacity": 39},
            {"station_id": "79", "name": "Franklin St & W Broadway", "lat": "40.719", "lon": -74.006},
            {"station_id": "82", "name": "St James Pl & Pearl St", "lat": 140.0, "lon": -74.0}
        ]}}),
        status: json!({"data": {"stations": [
            {"station_id": "72", "num_bikes_available": 4, "num_docks_available": 35, "is_renting": 1},
            {"station_id": "79", "num_bikes_available": 0, "num_docks_available": 33}
        ]}}),
    })
}

#[tokio::test]
async fn test_single_run_publishes_both_feeds_to_subscriber() -> Result<()> {
    let config = test_config();
    let broker = InMemoryBroker::new();
    let orchestrator = Orchestrator::from_config(&config, feeds(), Arc::new(broker.producer()));

    let summary = orchestrator.run_once().await;
    assert!(summary.is_success());
    let info = summary.cycle(FeedKind::StationInformation).unwrap();
    assert_eq!((info.fetched, info.accepted, info.published), (3, 2, 2));
    assert_eq!(info.skipped[0].station_id.as_deref(), Some("82"));
    assert!(info.skip_reasons()[0].contains("lat"));
    let status = summary.cycle(FeedKind::StationStatus).unwrap();
    assert_eq!(status.state, CycleState::Done);
    assert_eq!(status.published, 2);
    orchestrator.close().await;

    let subscriber = Subscriber::new(
        config.kafka.consumer_group_id.clone(),
        Arc::new(broker.consumer(config.kafka.consumer_group_id.clone(), OffsetReset::Earliest)),
    );
    let topics: Vec<String> = FeedKind::ALL.iter().map(|k| config.topic_for(*k)).collect();
    subscriber.subscribe(&topics)?;

    let envelopes: Vec<_> = subscriber
        .stream(Some(4), CancellationToken::new())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(envelopes.len(), 4);

    // Each consumed value is the upstream station object plus exactly the two
    // enrichment fields.
    let source = feeds();
    for envelope in &envelopes {
        let (stations, data_type) = match envelope.topic.as_str() {
            "bikes_station_information" => (&source.information, "station_information"),
            "bikes_station_status" => (&source.status, "station_status"),
            other => panic!("unexpected topic {other}"),
        };
        let station_id = &envelope.value["station_id"];
        let mut expected = stations["data"]["stations"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| &s["station_id"] == station_id)
            .unwrap()
            .as_object()
            .unwrap()
            .clone();
        let timestamp = envelope.value["timestamp"].as_i64().expect("integer timestamp");
        expected.insert("timestamp".to_string(), json!(timestamp));
        expected.insert("data_type".to_string(), json!(data_type));
        assert_eq!(envelope.value, Value::Object(expected));
    }

    let information: Vec<StationInformation> = envelopes
        .iter()
        .filter(|e| e.topic == "bikes_station_information")
        .map(|e| e.decode())
        .collect::<std::result::Result<_, _>>()?;
    let ids: Vec<&str> = information.iter().map(|s| s.station_id.as_str()).collect();
    assert_eq!(ids, vec!["72", "79"]);
    assert!((information[1].lat - 40.719).abs() < 1e-9);

    let status: Vec<StationStatus> = envelopes
        .iter()
        .filter(|e| e.topic == "bikes_station_status")
        .map(|e| e.decode())
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(status[0].num_bikes_available, 4);
    assert!(status.iter().all(|s| s.timestamp.is_some()));

    subscriber.close();
    Ok(())
}

#[tokio::test]
async fn test_group_resumes_after_restart() -> Result<()> {
    let config = test_config();
    let broker = InMemoryBroker::new();
    let orchestrator = Orchestrator::from_config(&config, feeds(), Arc::new(broker.producer()));
    orchestrator.run_cycle(FeedKind::StationStatus).await;

    let topic = vec![config.topic_for(FeedKind::StationStatus)];
    let first = Subscriber::new("dashboard", Arc::new(broker.consumer("dashboard", OffsetReset::Earliest)));
    first.subscribe(&topic)?;
    let seen: Vec<_> = first.stream(Some(1), CancellationToken::new()).collect().await;
    assert_eq!(seen[0].as_ref().unwrap().offset, 0);
    first.close();

    // Another run lands two more records while the consumer is down.
    orchestrator.run_cycle(FeedKind::StationStatus).await;

    let second = Subscriber::new("dashboard", Arc::new(broker.consumer("dashboard", OffsetReset::Earliest)));
    second.subscribe(&topic)?;
    let offsets: Vec<i64> = second
        .stream(Some(3), CancellationToken::new())
        .map(|item| item.map(|e| e.offset))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(offsets, vec![1, 2, 3]);
    assert_eq!(broker.committed_offset("dashboard", &topic[0]), Some(4));
    Ok(())
}

#[tokio::test]
async fn test_missing_feed_fails_only_that_cycle() {
    let mut config = test_config();
    config.api.base_url = "https://gbfs.example.test/gbfs/en/".to_string();
    let broker = InMemoryBroker::new();
    let feeds = Arc::new(StaticFeeds {
        information: json!({"data": {}}),
        status: json!({"data": {"stations": [
            {"station_id": "1", "num_bikes_available": "2", "num_docks_available": 3}
        ]}}),
    });
    let orchestrator = Orchestrator::from_config(&config, feeds, Arc::new(broker.producer()));

    let summary = orchestrator.run_once().await;
    assert!(!summary.is_success());
    let info = summary.cycle(FeedKind::StationInformation).unwrap();
    assert_eq!(info.state, CycleState::Failed);
    assert!(info.failure.as_deref().unwrap().contains("malformed"));
    assert_eq!(summary.total_published(), 1);
    assert!(broker.is_empty("bikes_station_information"));
}

#[tokio::test]
async fn test_two_station_payload_publishes_one_and_skips_one() {
    let config = test_config();
    let broker = InMemoryBroker::new();
    let feeds = Arc::new(StaticFeeds {
        information: json!({"data":{"stations":[
            {"station_id":"1","name":"A","lat":40.7,"lon":-73.9},
            {"station_id":"2","name":"B"}
        ]}}),
        status: json!({"data": {"stations": []}}),
    });
    let orchestrator = Orchestrator::from_config(&config, feeds, Arc::new(broker.producer()));

    let cycle = orchestrator.run_cycle(FeedKind::StationInformation).await;
    assert_eq!(cycle.published, 1);
    assert_eq!(cycle.skipped.len(), 1);
    assert_eq!(cycle.skipped[0].station_id.as_deref(), Some("2"));
    assert_eq!(cycle.skip_reasons(), vec!["missing lat/lon".to_string()]);

    let published = broker.messages("bikes_station_information");
    assert_eq!(published.len(), 1);
    let record: StationInformation = published[0].decode().unwrap();
    assert_eq!(record.station_id, "1");
    assert_eq!(record.name, "A");
    assert_eq!((record.lat, record.lon), (40.7, -73.9));
}
