use bikeshare_stream::pipeline::enrich::enrich;
use bikeshare_stream::pipeline::schedule::next_delay;
use bikeshare_stream::pipeline::validator::{coerce_f64, validate};
use bikeshare_stream::types::FeedKind;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-500.0f64..500.0).prop_map(Value::from),
        "[a-z0-9.\\-]{0,8}".prop_map(Value::from),
    ]
}

fn feed_kind() -> impl Strategy<Value = FeedKind> {
    prop_oneof![Just(FeedKind::StationInformation), Just(FeedKind::StationStatus)]
}

proptest! {
    #[test]
    fn validate_never_panics(
        kind in feed_kind(),
        station_id in scalar(),
        a in scalar(),
        b in scalar(),
        c in scalar(),
    ) {
        let record = json!({
            "station_id": station_id,
            "name": a.clone(),
            "lat": b.clone(),
            "lon": c.clone(),
            "num_bikes_available": b,
            "num_docks_available": c,
        });
        let _ = validate(&record, kind);
        let _ = validate(&a, kind);
    }

    #[test]
    fn accepted_information_is_in_range(lat in -200.0f64..200.0, lon in -200.0f64..200.0) {
        let record = json!({"station_id": "1", "name": "A", "lat": lat, "lon": lon});
        let accepted = validate(&record, FeedKind::StationInformation).is_accepted();
        prop_assert_eq!(accepted, lat.abs() <= 90.0 && lon.abs() <= 180.0);
    }

    #[test]
    fn numeric_strings_validate_like_numbers(lat in -90.0f64..=90.0) {
        let as_number = json!({"station_id": "1", "name": "A", "lat": lat, "lon": 0});
        let as_string = json!({"station_id": "1", "name": "A", "lat": lat.to_string(), "lon": 0});
        prop_assert!(validate(&as_number, FeedKind::StationInformation).is_accepted());
        prop_assert!(validate(&as_string, FeedKind::StationInformation).is_accepted());
        prop_assert_eq!(coerce_f64(&Value::from(lat.to_string())), Some(lat));
    }

    #[test]
    fn status_counts_must_be_non_negative(bikes in -50i64..50, docks in -50i64..50) {
        let record = json!({"station_id": 7, "num_bikes_available": bikes, "num_docks_available": docks});
        let accepted = validate(&record, FeedKind::StationStatus).is_accepted();
        prop_assert_eq!(accepted, bikes >= 0 && docks >= 0);
    }

    #[test]
    fn enrich_keeps_upstream_fields(
        kind in feed_kind(),
        existing in proptest::option::of(any::<i64>()),
        extra in "[a-z]{1,6}",
        ingested_at in 0i64..4_000_000_000,
    ) {
        let mut record = serde_json::Map::new();
        record.insert("station_id".to_string(), json!("1"));
        record.insert(format!("x_{extra}"), json!(extra.clone()));
        if let Some(ts) = existing {
            record.insert("timestamp".to_string(), json!(ts));
        }

        let enriched = enrich(record.clone(), kind, ingested_at);
        for (key, value) in &record {
            prop_assert_eq!(enriched.get(key), Some(value));
        }
        prop_assert_eq!(&enriched["timestamp"], &json!(existing.unwrap_or(ingested_at)));
        prop_assert_eq!(&enriched["data_type"], &json!(kind.as_str()));
    }

    #[test]
    fn next_delay_stays_within_interval(interval_ms in 1u64..120_000, elapsed_ms in 0u64..10_000_000) {
        let interval = Duration::from_millis(interval_ms);
        let delay = next_delay(interval, Duration::from_millis(elapsed_ms));
        prop_assert!(delay > Duration::ZERO);
        prop_assert!(delay <= interval);
        prop_assert_eq!((elapsed_ms + delay.as_millis() as u64) % interval_ms, 0);
    }
}
