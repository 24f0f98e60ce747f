// crates/bagstore-core/tests/model_serde.rs
// ============================================================================
// Module: Model Serialization Tests
// Description: Deserialization defaults and wire names for core types.
// Purpose: Keep configuration and metadata documents stable.
// ============================================================================

//! Serialization tests for storage options, topics, and bag metadata.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::PathBuf;

use bagstore_core::BagMetadata;
use bagstore_core::DEFAULT_BUSY_TIMEOUT_MS;
use bagstore_core::DEFAULT_STORAGE_ID;
use bagstore_core::ReadOrder;
use bagstore_core::ReadOrderSortBy;
use bagstore_core::StorageFilter;
use bagstore_core::StorageOptions;
use bagstore_core::TopicInformation;
use bagstore_core::TopicMetadata;
use bagstore_core::TransactionMode;
use serde_json::json;

#[test]
fn storage_options_fill_defaults_from_minimal_toml() {
    let options: StorageOptions = toml::from_str(r#"uri = "/tmp/bag""#).expect("parse options");
    assert_eq!(options.uri, PathBuf::from("/tmp/bag"));
    assert_eq!(options.storage_id, DEFAULT_STORAGE_ID);
    assert_eq!(options.storage_preset_profile, "");
    assert_eq!(options.storage_config_uri, None);
    assert_eq!(options.max_bagfile_size, 0);
    assert_eq!(options.transaction_mode, TransactionMode::AutoCommit);
    assert_eq!(options.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    assert!(options.recorded_by.starts_with("bagstore/"));
    assert!(options.custom_settings.is_empty());
    assert_eq!(options, StorageOptions::new("/tmp/bag"));
}

#[test]
fn storage_options_read_every_field_from_toml() {
    let options: StorageOptions = toml::from_str(
        r#"
        uri = "/data/run"
        storage_preset_profile = "resilient"
        storage_config_uri = "/etc/bagstore/pragmas.yaml"
        max_bagfile_size = 1048576
        transaction_mode = "batched"
        busy_timeout_ms = 250
        recorded_by = "recorder-7"

        [custom_settings]
        cache_size = "-2000"
        "#,
    )
    .expect("parse options");
    assert_eq!(options.storage_preset_profile, "resilient");
    assert_eq!(options.storage_config_uri, Some(PathBuf::from("/etc/bagstore/pragmas.yaml")));
    assert_eq!(options.max_bagfile_size, 1_048_576);
    assert_eq!(options.transaction_mode, TransactionMode::Batched);
    assert_eq!(options.busy_timeout_ms, 250);
    assert_eq!(options.recorded_by, "recorder-7");
    assert_eq!(options.custom_settings.get("cache_size").map(String::as_str), Some("-2000"));
}

#[test]
fn storage_options_reject_unknown_transaction_mode() {
    let result: Result<StorageOptions, _> = toml::from_str(
        r#"
        uri = "/data/run"
        transaction_mode = "eventually"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn topic_metadata_uses_type_as_wire_name() {
    let topic = TopicMetadata::new("/scan", "sensor_msgs/LaserScan", "cdr");
    let value = serde_json::to_value(&topic).expect("serialize topic");
    assert_eq!(value["type"], json!("sensor_msgs/LaserScan"));
    assert!(value.get("type_name").is_none());
}

#[test]
fn bag_metadata_round_trips_through_json() {
    let metadata = BagMetadata {
        version: 4,
        bag_size: 86_016,
        storage_identifier: DEFAULT_STORAGE_ID.to_string(),
        relative_file_paths: vec!["run_0.db3".to_string()],
        duration_ns: 20,
        starting_time_ns: 10,
        message_count: 3,
        topics_with_message_count: vec![TopicInformation {
            topic_metadata: TopicMetadata::new("/scan", "sensor_msgs/LaserScan", "cdr"),
            message_count: 3,
        }],
        compression_format: "zstd".to_string(),
        compression_mode: "file".to_string(),
        recorded_by: "recorder-7".to_string(),
    };
    let text = serde_json::to_string(&metadata).expect("serialize metadata");
    let parsed: BagMetadata = serde_json::from_str(&text).expect("parse metadata");
    assert_eq!(parsed, metadata);
}

#[test]
fn bag_metadata_tolerates_missing_fields() {
    let parsed: BagMetadata =
        serde_json::from_value(json!({ "compression_format": "zstd" })).expect("parse metadata");
    assert_eq!(parsed.compression_format, "zstd");
    assert_eq!(parsed.message_count, 0);
    assert!(parsed.topics_with_message_count.is_empty());
}

#[test]
fn replay_controls_default_to_unfiltered_forward_receive_order() {
    assert!(StorageFilter::default().is_empty());
    let order = ReadOrder::default();
    assert_eq!(order.sort_by, ReadOrderSortBy::ReceivedTimestamp);
    assert!(!order.reverse);
    let filter = StorageFilter {
        topics: Vec::new(),
        topics_regex: "^/cam".to_string(),
        topics_regex_to_exclude: String::new(),
    };
    assert!(!filter.is_empty());
}
