// crates/bagstore-store-sqlite/tests/storage_open.rs
// ============================================================================
// Module: SQLite Storage Open Tests
// Description: Open-time configuration, path rules, and layout handling.
// Purpose: Validate presets, storage config files, schema guards, and migration.
// ============================================================================

//! ## Overview
//! Tests for everything decided while opening a store:
//! - Preset profiles and layered pragma sources (file, custom settings)
//! - Rejection of unsafe pragma entries and invalid options
//! - Path existence rules per open mode
//! - Future-version guard, empty and corrupt files
//! - Migration of older layouts built directly with rusqlite

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

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use bagstore_core::IoFlag;
use bagstore_core::ReadOnlyStorage;
use bagstore_core::SchemaVersion;
use bagstore_core::SerializedMessage;
use bagstore_core::StorageError;
use bagstore_core::StorageInfo;
use bagstore_core::StorageOptions;
use bagstore_core::TopicMetadata;
use bagstore_core::WritableStorage;
use bagstore_store_sqlite::CURRENT_SCHEMA_VERSION;
use bagstore_store_sqlite::MIN_SPLIT_FILE_SIZE;
use bagstore_store_sqlite::SqliteStorage;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("bag.db3")
}

fn topic(name: &str) -> TopicMetadata {
    TopicMetadata::new(name, "std_msgs/msg/String", "cdr")
}

fn create_store(dir: &TempDir) {
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(dir)), IoFlag::ReadWrite).unwrap();
    storage.create_topic(&topic("/a")).unwrap();
    storage.write(&SerializedMessage::new("/a", vec![1], 1)).unwrap();
}

fn open_err(options: &StorageOptions, io_flag: IoFlag) -> StorageError {
    SqliteStorage::open_with(options, io_flag).err().unwrap()
}

fn setting(storage: &SqliteStorage, key: &str) -> String {
    storage.get_storage_setting(key).unwrap().unwrap()
}

fn replay_timestamps(storage: &mut SqliteStorage) -> Vec<i64> {
    let mut seen = Vec::new();
    while storage.has_next().unwrap() {
        seen.push(storage.read_next().unwrap().time_stamp);
    }
    seen
}

fn write_legacy_store(path: &Path, sql: &str) {
    let connection = Connection::open(path).unwrap();
    connection.execute_batch(sql).unwrap();
}

const V1_LAYOUT: &str = "
    CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL,
        serialization_format TEXT NOT NULL);
    CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL, data BLOB NOT NULL);
    INSERT INTO topics VALUES (1, '/legacy', 'std_msgs/msg/String', 'cdr');
    INSERT INTO messages VALUES (1, 1, 20, x'01'), (2, 1, 10, x'02');";

const V2_LAYOUT: &str = "
    CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL,
        serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
    CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL, data BLOB NOT NULL);
    CREATE INDEX timestamp_idx ON messages (timestamp ASC);
    INSERT INTO topics VALUES (1, '/legacy', 'std_msgs/msg/String', 'cdr', '- depth: 10');
    INSERT INTO messages VALUES (1, 1, 20, x'01'), (2, 1, 10, x'02');";

const V3_LAYOUT: &str = "
    CREATE TABLE schema(schema_version INTEGER PRIMARY KEY, ros_distro TEXT NOT NULL);
    CREATE TABLE metadata(id INTEGER PRIMARY KEY, metadata_version INTEGER NOT NULL,
        metadata TEXT NOT NULL);
    CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL,
        serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
    CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL, data BLOB NOT NULL);
    CREATE INDEX timestamp_idx ON messages (timestamp ASC);
    INSERT INTO schema VALUES (3, 'legacy-recorder');
    INSERT INTO topics VALUES (1, '/legacy', 'std_msgs/msg/String', 'cdr', '- depth: 10');
    INSERT INTO messages VALUES (1, 1, 20, x'01'), (2, 1, 10, x'02');";

// ============================================================================
// SECTION: Presets And Pragmas
// ============================================================================

#[test]
fn default_preset_is_write_optimized() {
    let dir = TempDir::new().unwrap();
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadWrite).unwrap();
    assert_eq!(setting(&storage, "journal_mode"), "wal");
    assert_eq!(setting(&storage, "synchronous"), "1");
}

#[test]
fn resilient_preset_uses_full_sync() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_preset_profile = "resilient".to_string();
    let storage = SqliteStorage::open_with(&options, IoFlag::ReadWrite).unwrap();
    assert_eq!(setting(&storage, "journal_mode"), "wal");
    assert_eq!(setting(&storage, "synchronous"), "2");
}

#[test]
fn unknown_preset_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_preset_profile = "fastest".to_string();
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidPreset(_)));
    assert!(!store_path(&dir).exists());
}

#[test]
fn yaml_config_layers_over_preset_and_under_custom_settings() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("storage.yaml");
    fs::write(
        &config,
        "write:\n  pragmas:\n    - \"synchronous=FULL\"\n    - \"cache_size=-4000\"\n    - \
         \"temp_store=MEMORY\"\nread:\n  pragmas: [\"cache_size=-3000\"]\n",
    )
    .unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(config.clone());
    options.custom_settings.insert("cache_size".to_string(), "-1234".to_string());
    {
        let storage = SqliteStorage::open_with(&options, IoFlag::ReadWrite).unwrap();
        assert_eq!(setting(&storage, "synchronous"), "2");
        assert_eq!(setting(&storage, "cache_size"), "-1234");
        assert_eq!(setting(&storage, "temp_store"), "2");
    }
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(config);
    let storage = SqliteStorage::open_with(&options, IoFlag::ReadOnly).unwrap();
    assert_eq!(setting(&storage, "cache_size"), "-3000");
}

#[test]
fn toml_config_is_accepted() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("storage.toml");
    fs::write(&config, "[write]\npragmas = [\"cache_size=-8000\"]\n").unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(config);
    let storage = SqliteStorage::open_with(&options, IoFlag::ReadWrite).unwrap();
    assert_eq!(setting(&storage, "cache_size"), "-8000");
}

#[test]
fn config_entries_with_statement_separators_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("storage.yaml");
    fs::write(&config, "write:\n  pragmas: [\"cache_size=1; DROP TABLE messages\"]\n").unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(config);
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
    assert!(!store_path(&dir).exists());
}

#[test]
fn config_with_unknown_section_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("storage.yaml");
    fs::write(&config, "writes:\n  pragmas: []\n").unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(config);
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_config_uri = Some(dir.path().join("absent.yaml"));
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::Io(_)));
}

#[test]
fn unsafe_custom_settings_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.custom_settings.insert("cache_size".to_string(), "1'".to_string());
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
    let mut options = StorageOptions::new(store_path(&dir));
    options.custom_settings.insert("cache size".to_string(), "1".to_string());
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
}

#[test]
fn failed_create_leaves_no_file_behind() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.custom_settings.insert("cache_size".to_string(), "1)".to_string());
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
    assert!(!store_path(&dir).exists());
    let mut options = StorageOptions::new(store_path(&dir));
    options.custom_settings.insert("nosuchschema.cache_size".to_string(), "1".to_string());
    let err = open_err(&options, IoFlag::ReadWrite);
    assert!(err.to_string().contains("nosuchschema"), "{err}");
    assert!(!store_path(&dir).exists());
    assert!(!dir.path().join("bag.db3-wal").exists());
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadWrite).unwrap();
    storage.create_topic(&topic("/a")).unwrap();
}

#[test]
fn storage_setting_names_are_validated() {
    let dir = TempDir::new().unwrap();
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadWrite).unwrap();
    assert!(matches!(
        storage.get_storage_setting("cache_size; VACUUM"),
        Err(StorageError::InvalidConfig(_))
    ));
    assert!(storage.get_storage_setting("main.page_size").unwrap().is_some());
}

// ============================================================================
// SECTION: Options
// ============================================================================

#[test]
fn foreign_storage_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.storage_id = "mcap".to_string();
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
}

#[test]
fn split_size_below_minimum_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.max_bagfile_size = MIN_SPLIT_FILE_SIZE - 1;
    assert!(matches!(open_err(&options, IoFlag::ReadWrite), StorageError::InvalidConfig(_)));
    options.max_bagfile_size = MIN_SPLIT_FILE_SIZE;
    let storage = SqliteStorage::open_with(&options, IoFlag::ReadWrite).unwrap();
    assert_eq!(storage.get_minimum_split_file_size(), MIN_SPLIT_FILE_SIZE);
    assert_eq!(storage.get_storage_identifier(), "sqlite3");
}

#[test]
fn recorded_by_is_stored_with_the_layout() {
    let dir = TempDir::new().unwrap();
    let mut options = StorageOptions::new(store_path(&dir));
    options.recorded_by = "field-recorder/2.1".to_string();
    drop(SqliteStorage::open_with(&options, IoFlag::ReadWrite).unwrap());
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly).unwrap();
    assert_eq!(storage.get_recorded_by().unwrap(), "field-recorder/2.1");
    assert_eq!(storage.get_metadata().unwrap().recorded_by, "field-recorder/2.1");
}

// ============================================================================
// SECTION: Paths
// ============================================================================

#[test]
fn read_write_appends_extension_and_creates_parents() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("nested").join("run").join("bag");
    let storage = SqliteStorage::open_with(&StorageOptions::new(&uri), IoFlag::ReadWrite).unwrap();
    let expected = dir.path().join("nested").join("run").join("bag.db3");
    assert!(expected.is_file());
    assert_eq!(storage.get_relative_file_path().unwrap(), expected.display().to_string());
}

#[test]
fn read_write_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    create_store(&dir);
    let err = open_err(&StorageOptions::new(store_path(&dir)), IoFlag::ReadWrite);
    assert!(matches!(err, StorageError::InvalidPath(_)));
}

#[test]
fn read_only_and_append_require_existing_file() {
    let dir = TempDir::new().unwrap();
    let options = StorageOptions::new(store_path(&dir));
    assert!(matches!(open_err(&options, IoFlag::ReadOnly), StorageError::InvalidPath(_)));
    assert!(matches!(open_err(&options, IoFlag::Append), StorageError::InvalidPath(_)));
    assert!(!store_path(&dir).exists());
}

#[test]
fn directory_uri_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = open_err(&StorageOptions::new(dir.path()), IoFlag::ReadOnly);
    assert!(matches!(err, StorageError::InvalidPath(_)));
}

// ============================================================================
// SECTION: Layout Guards
// ============================================================================

#[test]
fn new_store_uses_current_schema_version() {
    let dir = TempDir::new().unwrap();
    create_store(&dir);
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly).unwrap();
    assert_eq!(
        storage.get_db_schema_version().unwrap(),
        SchemaVersion::Version(CURRENT_SCHEMA_VERSION)
    );
}

#[test]
fn future_schema_version_is_refused() {
    let dir = TempDir::new().unwrap();
    create_store(&dir);
    let connection = Connection::open(store_path(&dir)).unwrap();
    connection
        .execute_batch("PRAGMA journal_mode=DELETE; UPDATE schema SET schema_version = 99;")
        .unwrap();
    drop(connection);
    let before = fs::read(store_path(&dir)).unwrap();
    let options = StorageOptions::new(store_path(&dir));
    assert!(matches!(open_err(&options, IoFlag::ReadOnly), StorageError::Schema(_)));
    assert!(matches!(open_err(&options, IoFlag::Append), StorageError::Schema(_)));
    let mut options = StorageOptions::new(store_path(&dir));
    options.custom_settings.insert("user_version".to_string(), "7".to_string());
    assert!(matches!(open_err(&options, IoFlag::Append), StorageError::Schema(_)));
    assert_eq!(fs::read(store_path(&dir)).unwrap(), before);
    let connection = Connection::open(store_path(&dir)).unwrap();
    let user_version: i64 =
        connection.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
    let journal_mode: String =
        connection.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
    assert_eq!(user_version, 0);
    assert_eq!(journal_mode, "delete");
}

#[test]
fn empty_file_cannot_be_read() {
    let dir = TempDir::new().unwrap();
    fs::write(store_path(&dir), b"").unwrap();
    let err = open_err(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly);
    assert!(matches!(err, StorageError::Schema(_)));
}

#[test]
fn garbage_file_marks_connection_broken() {
    let dir = TempDir::new().unwrap();
    fs::write(store_path(&dir), vec![b'x'; 4096]).unwrap();
    let err = open_err(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly);
    assert!(matches!(err, StorageError::ConnectionBroken(_)));
}

// ============================================================================
// SECTION: Migration
// ============================================================================

#[test]
fn v1_store_is_read_as_found() {
    let dir = TempDir::new().unwrap();
    write_legacy_store(&store_path(&dir), V1_LAYOUT);
    let mut storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly).unwrap();
    assert_eq!(storage.get_db_schema_version().unwrap(), SchemaVersion::Version(1));
    assert_eq!(storage.get_all_topics_and_types().unwrap(), vec![topic("/legacy")]);
    assert_eq!(storage.get_recorded_by().unwrap(), "");
    assert_eq!(storage.get_metadata().unwrap().message_count, 2);
    assert_eq!(replay_timestamps(&mut storage), vec![10, 20]);
}

#[test]
fn v1_store_is_migrated_on_append() {
    let dir = TempDir::new().unwrap();
    write_legacy_store(&store_path(&dir), V1_LAYOUT);
    {
        let storage =
            SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::Append)
                .unwrap();
        assert_eq!(
            storage.get_db_schema_version().unwrap(),
            SchemaVersion::Version(CURRENT_SCHEMA_VERSION)
        );
        let mut qos_topic = topic("/new");
        qos_topic.offered_qos_profiles = "- depth: 5".to_string();
        qos_topic.type_description_hash = "RIHS01_abc".to_string();
        storage.create_topic(&qos_topic).unwrap();
        storage.write(&SerializedMessage::new("/new", vec![3], 15)).unwrap();
    }
    let mut storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly).unwrap();
    assert_eq!(
        storage.get_db_schema_version().unwrap(),
        SchemaVersion::Version(CURRENT_SCHEMA_VERSION)
    );
    let topics = storage.get_all_topics_and_types().unwrap();
    assert_eq!(topics[0], topic("/legacy"));
    assert_eq!(topics[1].offered_qos_profiles, "- depth: 5");
    assert_eq!(topics[1].type_description_hash, "RIHS01_abc");
    assert_eq!(replay_timestamps(&mut storage), vec![10, 15, 20]);
}

#[test]
fn v2_store_keeps_qos_profiles_through_migration() {
    let dir = TempDir::new().unwrap();
    write_legacy_store(&store_path(&dir), V2_LAYOUT);
    {
        let storage =
            SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly)
                .unwrap();
        assert_eq!(storage.get_db_schema_version().unwrap(), SchemaVersion::Version(2));
        let topics = storage.get_all_topics_and_types().unwrap();
        assert_eq!(topics[0].offered_qos_profiles, "- depth: 10");
    }
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::Append).unwrap();
    let topics = storage.get_all_topics_and_types().unwrap();
    assert_eq!(topics[0].offered_qos_profiles, "- depth: 10");
    assert_eq!(topics[0].type_description_hash, "");
    assert_eq!(storage.get_metadata().unwrap().message_count, 2);
}

#[test]
fn v3_store_keeps_recorded_by_through_migration() {
    let dir = TempDir::new().unwrap();
    write_legacy_store(&store_path(&dir), V3_LAYOUT);
    {
        let storage =
            SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::ReadOnly)
                .unwrap();
        assert_eq!(storage.get_db_schema_version().unwrap(), SchemaVersion::Version(3));
        assert_eq!(storage.get_recorded_by().unwrap(), "legacy-recorder");
    }
    let storage =
        SqliteStorage::open_with(&StorageOptions::new(store_path(&dir)), IoFlag::Append).unwrap();
    assert_eq!(
        storage.get_db_schema_version().unwrap(),
        SchemaVersion::Version(CURRENT_SCHEMA_VERSION)
    );
    assert_eq!(storage.get_recorded_by().unwrap(), "legacy-recorder");
}
