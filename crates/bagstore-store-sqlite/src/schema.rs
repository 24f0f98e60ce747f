// crates/bagstore-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Store Schema
// Description: Layout creation, version detection, migrations, and metadata.
// Purpose: Keep every store file on the current layout and summarize its contents.
// Dependencies: bagstore-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! A store holds four tables: `schema` (layout version and recording tool),
//! `metadata` (bag-level metadata as JSON), `topics`, and `messages`.
//! Layouts older than the current version are migrated additively when the
//! connection is writable and read through compatibility projections
//! otherwise. A store from a newer layout is refused before any data is read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use bagstore_core::BagMetadata;
use bagstore_core::DEFAULT_STORAGE_ID;
use bagstore_core::SchemaVersion;
use bagstore_core::StorageError;
use bagstore_core::TopicInformation;
use bagstore_core::TopicMetadata;
use tracing::debug;
use tracing::info;

use crate::config::bagfile_size;
use crate::wrapper::SqlValue;
use crate::wrapper::SqliteDatabase;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Layout version written by this engine.
pub const CURRENT_SCHEMA_VERSION: u32 = 4;
/// Format version of the JSON stored in the `metadata` table.
pub const METADATA_VERSION: u32 = 1;
/// First layout that carries the `schema` and `metadata` tables.
const SCHEMA_TABLE_VERSION: u32 = 3;
/// Savepoint used for layout creation and migration.
const LAYOUT_SAVEPOINT: &str = "bagstore_layout";
/// Savepoint used for metadata replacement.
const METADATA_SAVEPOINT: &str = "bagstore_metadata";

/// Tables introduced with layout version 3.
const SCHEMA_TABLES_SQL: &str = "
    CREATE TABLE schema(
        schema_version INTEGER PRIMARY KEY,
        ros_distro TEXT NOT NULL);
    CREATE TABLE metadata(
        id INTEGER PRIMARY KEY,
        metadata_version INTEGER NOT NULL,
        metadata TEXT NOT NULL);";

/// Topic and message tables of the current layout.
const DATA_TABLES_SQL: &str = "
    CREATE TABLE topics(
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        serialization_format TEXT NOT NULL,
        offered_qos_profiles TEXT NOT NULL,
        type_description_hash TEXT NOT NULL DEFAULT '');
    CREATE TABLE messages(
        id INTEGER PRIMARY KEY,
        topic_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        data BLOB NOT NULL);
    CREATE INDEX timestamp_idx ON messages (timestamp ASC);";

/// Insert of the single `schema` row.
const INSERT_SCHEMA_ROW_SQL: &str = "INSERT INTO schema (schema_version, ros_distro) VALUES (?1, ?2)";

// ============================================================================
// SECTION: Versions
// ============================================================================

/// Reads the layout version of an open store.
///
/// Files without a `schema` table predate it: they are version 2 when
/// `topics.offered_qos_profiles` exists, version 1 otherwise, and
/// [`SchemaVersion::Unset`] when they hold no `topics` table at all.
///
/// # Errors
///
/// Returns [`StorageError::Schema`] when the `schema` table is empty or holds
/// an invalid version, or [`StorageError`] when the catalog cannot be read.
pub fn read_db_schema_version(database: &SqliteDatabase) -> Result<SchemaVersion, StorageError> {
    if database.table_exists("schema")? {
        let row = database.query_first::<(i64,)>(
            "SELECT schema_version FROM schema ORDER BY schema_version DESC LIMIT 1",
            &[],
        )?;
        let Some((raw,)) = row else {
            return Err(StorageError::Schema("schema table has no version row".to_string()));
        };
        let version = u32::try_from(raw)
            .ok()
            .filter(|version| *version > 0)
            .ok_or_else(|| StorageError::Schema(format!("invalid schema version: {raw}")))?;
        return Ok(SchemaVersion::Version(version));
    }
    if !database.table_exists("topics")? {
        return Ok(SchemaVersion::Unset);
    }
    if database.field_exists("topics", "offered_qos_profiles")? {
        Ok(SchemaVersion::Version(2))
    } else {
        Ok(SchemaVersion::Version(1))
    }
}

/// Refuses layouts newer than [`CURRENT_SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`StorageError::Schema`] for a newer layout.
pub fn ensure_supported(found: SchemaVersion) -> Result<(), StorageError> {
    match found {
        SchemaVersion::Version(version) if version > CURRENT_SCHEMA_VERSION => {
            Err(StorageError::Schema(format!(
                "unsupported schema version {version} (newest supported is {CURRENT_SCHEMA_VERSION})"
            )))
        }
        SchemaVersion::Unset | SchemaVersion::Version(_) => Ok(()),
    }
}

/// Brings a store to a usable layout and returns the effective version.
///
/// Writable connections create the current layout on an empty file and
/// migrate older layouts; read-only connections keep older layouts as found.
///
/// # Errors
///
/// Returns [`StorageError::Schema`] for a layout newer than
/// [`CURRENT_SCHEMA_VERSION`] or an empty read-only file, or the engine error
/// when creation or migration fails.
pub fn initialize(
    database: &SqliteDatabase,
    found: SchemaVersion,
    recorded_by: &str,
) -> Result<SchemaVersion, StorageError> {
    ensure_supported(found)?;
    let writable = database.io_flag().is_writable();
    match found {
        SchemaVersion::Unset if writable => {
            create_layout(database, recorded_by)?;
            Ok(SchemaVersion::Version(CURRENT_SCHEMA_VERSION))
        }
        SchemaVersion::Unset => {
            Err(StorageError::Schema("store file holds no message log".to_string()))
        }
        SchemaVersion::Version(version) if version < CURRENT_SCHEMA_VERSION && writable => {
            migrate(database, version)?;
            Ok(SchemaVersion::Version(CURRENT_SCHEMA_VERSION))
        }
        SchemaVersion::Version(version) => Ok(SchemaVersion::Version(version)),
    }
}

/// Creates the current layout on an empty file.
fn create_layout(database: &SqliteDatabase, recorded_by: &str) -> Result<(), StorageError> {
    database.with_savepoint(LAYOUT_SAVEPOINT, |database| {
        database.execute_batch(SCHEMA_TABLES_SQL)?;
        database.execute_batch(DATA_TABLES_SQL)?;
        database.prepare(INSERT_SCHEMA_ROW_SQL)?.execute(&[
            SqlValue::Integer(i64::from(CURRENT_SCHEMA_VERSION)),
            SqlValue::Text(recorded_by),
        ])?;
        Ok(())
    })?;
    debug!(version = CURRENT_SCHEMA_VERSION, "created store layout");
    Ok(())
}

/// Migrates a layout one version at a time up to the current version.
fn migrate(database: &SqliteDatabase, from: u32) -> Result<(), StorageError> {
    database.with_savepoint(LAYOUT_SAVEPOINT, |database| {
        for version in from .. CURRENT_SCHEMA_VERSION {
            match version {
                1 => database.execute_batch(
                    "ALTER TABLE topics ADD COLUMN offered_qos_profiles TEXT NOT NULL DEFAULT '';",
                )?,
                2 => {
                    database.execute_batch(SCHEMA_TABLES_SQL)?;
                    database.execute_batch(
                        "CREATE INDEX IF NOT EXISTS timestamp_idx ON messages (timestamp ASC);",
                    )?;
                    database.prepare(INSERT_SCHEMA_ROW_SQL)?.execute(&[
                        SqlValue::Integer(i64::from(SCHEMA_TABLE_VERSION)),
                        SqlValue::Text(""),
                    ])?;
                }
                3 => database.execute_batch(
                    "ALTER TABLE topics ADD COLUMN type_description_hash TEXT NOT NULL DEFAULT '';",
                )?,
                other => {
                    return Err(StorageError::Schema(format!(
                        "no migration from schema version {other}"
                    )));
                }
            }
            debug!(from = version, to = version + 1, "migrated store layout");
        }
        database
            .prepare("UPDATE schema SET schema_version = ?1")?
            .execute(&[SqlValue::Integer(i64::from(CURRENT_SCHEMA_VERSION))])?;
        Ok(())
    })?;
    info!(
        path = %database.path().display(),
        from,
        to = CURRENT_SCHEMA_VERSION,
        "upgraded store layout"
    );
    Ok(())
}

// ============================================================================
// SECTION: Topics
// ============================================================================

/// Returns the topic column projection readable at a layout version.
///
/// Columns: name, type, serialization format, QoS profiles, type description hash.
#[must_use]
pub const fn topic_columns(version: SchemaVersion) -> &'static str {
    match version {
        SchemaVersion::Version(0 | 1) | SchemaVersion::Unset => {
            "topics.name, topics.type, topics.serialization_format, '', ''"
        }
        SchemaVersion::Version(2 | 3) => {
            "topics.name, topics.type, topics.serialization_format, topics.offered_qos_profiles, ''"
        }
        SchemaVersion::Version(_) => {
            "topics.name, topics.type, topics.serialization_format, topics.offered_qos_profiles, \
             topics.type_description_hash"
        }
    }
}

/// Builds topic metadata from a projected row.
fn topic_from_columns(
    (name, type_name, serialization_format, offered_qos_profiles, type_description_hash): (
        String,
        String,
        String,
        String,
        String,
    ),
) -> TopicMetadata {
    TopicMetadata {
        name,
        type_name,
        serialization_format,
        offered_qos_profiles,
        type_description_hash,
    }
}

/// Returns every topic in registration order.
///
/// # Errors
///
/// Returns [`StorageError`] when the query fails.
pub fn read_topics(
    database: &SqliteDatabase,
    version: SchemaVersion,
) -> Result<Vec<TopicMetadata>, StorageError> {
    let sql = format!("SELECT {} FROM topics ORDER BY topics.id", topic_columns(version));
    let mut statement = database.prepare(&sql)?;
    let rows = statement.query::<(String, String, String, String, String)>(&[])?;
    rows.map(|row| row.map(topic_from_columns)).collect()
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Aggregates bag metadata from stored rows and persisted bag-level fields.
///
/// Topics with no messages report a zero count. An empty store reports a
/// start time and duration of zero.
///
/// # Errors
///
/// Returns [`StorageError`] when aggregation fails or persisted metadata is corrupt.
pub fn read_metadata(
    database: &SqliteDatabase,
    version: SchemaVersion,
) -> Result<BagMetadata, StorageError> {
    let sql = format!(
        "SELECT {}, COUNT(messages.id), MIN(messages.timestamp), MAX(messages.timestamp) FROM \
         topics LEFT JOIN messages ON messages.topic_id = topics.id GROUP BY topics.id ORDER BY \
         topics.id",
        topic_columns(version)
    );
    let mut topics_with_message_count = Vec::new();
    let mut message_count: u64 = 0;
    let mut earliest: Option<i64> = None;
    let mut latest: Option<i64> = None;
    {
        let mut statement = database.prepare(&sql)?;
        let rows = statement.query::<(
            String,
            String,
            String,
            String,
            String,
            i64,
            Option<i64>,
            Option<i64>,
        )>(&[])?;
        for row in rows {
            let (name, type_name, format, qos, hash, count, min_time, max_time) = row?;
            let count = u64::try_from(count)
                .map_err(|_| StorageError::Schema(format!("negative message count: {count}")))?;
            message_count += count;
            earliest = match (earliest, min_time) {
                (Some(current), Some(candidate)) => Some(current.min(candidate)),
                (current, candidate) => current.or(candidate),
            };
            latest = match (latest, max_time) {
                (Some(current), Some(candidate)) => Some(current.max(candidate)),
                (current, candidate) => current.or(candidate),
            };
            topics_with_message_count.push(TopicInformation {
                topic_metadata: topic_from_columns((name, type_name, format, qos, hash)),
                message_count: count,
            });
        }
    }
    let (starting_time_ns, duration_ns) = match (earliest, latest) {
        (Some(start), Some(end)) if message_count > 0 => (start, end.saturating_sub(start)),
        _ => (0, 0),
    };
    let mut metadata = read_bag_metadata(database, version)?.unwrap_or_default();
    let recorded_by = read_recorded_by(database, version)?;
    if !recorded_by.is_empty() {
        metadata.recorded_by = recorded_by;
    }
    metadata.version = METADATA_VERSION;
    metadata.storage_identifier = DEFAULT_STORAGE_ID.to_string();
    metadata.relative_file_paths = vec![relative_path(database.path())];
    metadata.bag_size = bagfile_size(database.path());
    metadata.message_count = message_count;
    metadata.starting_time_ns = starting_time_ns;
    metadata.duration_ns = duration_ns;
    metadata.topics_with_message_count = topics_with_message_count;
    Ok(metadata)
}

/// Returns the store path as text.
#[must_use]
pub fn relative_path(path: &Path) -> String {
    path.display().to_string()
}

/// Reads the persisted bag-level metadata, if any.
///
/// # Errors
///
/// Returns [`StorageError::Schema`] when the stored JSON is corrupt.
pub fn read_bag_metadata(
    database: &SqliteDatabase,
    version: SchemaVersion,
) -> Result<Option<BagMetadata>, StorageError> {
    if !has_schema_tables(version) || !database.table_exists("metadata")? {
        return Ok(None);
    }
    let row = database
        .query_first::<(String,)>("SELECT metadata FROM metadata ORDER BY id DESC LIMIT 1", &[])?;
    row.map(|(text,)| {
        serde_json::from_str(&text)
            .map_err(|err| StorageError::Schema(format!("stored metadata is corrupt: {err}")))
    })
    .transpose()
}

/// Replaces the persisted bag-level metadata.
///
/// # Errors
///
/// Returns [`StorageError`] when encoding or the replacement fails.
pub fn write_bag_metadata(
    database: &SqliteDatabase,
    metadata: &BagMetadata,
) -> Result<(), StorageError> {
    let text = serde_json::to_string(metadata)
        .map_err(|err| StorageError::Schema(format!("metadata encoding failed: {err}")))?;
    database.with_savepoint(METADATA_SAVEPOINT, |database| {
        database.execute_batch("DELETE FROM metadata;")?;
        database
            .prepare_cached("INSERT INTO metadata (metadata_version, metadata) VALUES (?1, ?2)")?
            .execute(&[SqlValue::Integer(i64::from(METADATA_VERSION)), SqlValue::Text(&text)])?;
        Ok(())
    })
}

/// Reads the identifier of the tool that created the store.
///
/// # Errors
///
/// Returns [`StorageError`] when the query fails.
pub fn read_recorded_by(
    database: &SqliteDatabase,
    version: SchemaVersion,
) -> Result<String, StorageError> {
    if !has_schema_tables(version) || !database.table_exists("schema")? {
        return Ok(String::new());
    }
    let row = database.query_first::<(String,)>("SELECT ros_distro FROM schema LIMIT 1", &[])?;
    Ok(row.map(|(recorded_by,)| recorded_by).unwrap_or_default())
}

/// Returns true when the layout carries the `schema` and `metadata` tables.
const fn has_schema_tables(version: SchemaVersion) -> bool {
    match version {
        SchemaVersion::Unset => false,
        SchemaVersion::Version(version) => version >= SCHEMA_TABLE_VERSION,
    }
}
