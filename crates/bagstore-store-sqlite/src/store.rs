// crates/bagstore-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Storage Facade
// Description: Open/close lifecycle and capability trait implementations.
// Purpose: Expose one SQLite store file through the bagstore interfaces.
// Dependencies: bagstore-core, tracing
// ============================================================================

//! ## Overview
//! [`SqliteStorage`] owns at most one open store. Opening resolves the
//! preset, storage config file, and custom settings into pragmas, resolves the
//! file path for the open mode, refuses layouts newer than this build, applies
//! the pragmas, and brings the layout to the current schema version. A failed
//! create removes the file it made. The connection, topic cache, and transaction
//! flag live behind one [`Mutex`]: write, topic, and metadata paths take
//! `&self` and lock it, while replay takes `&mut self` and locks once per call.
//!
//! [`open_read_only`] and [`open_read_write`] return trait objects limited to
//! the capabilities of the open mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;

use bagstore_core::BagMetadata;
use bagstore_core::DEFAULT_STORAGE_ID;
use bagstore_core::IoFlag;
use bagstore_core::PresetProfile;
use bagstore_core::ReadOnlyStorage;
use bagstore_core::ReadOrder;
use bagstore_core::ReadWriteStorage;
use bagstore_core::SchemaVersion;
use bagstore_core::SerializedMessage;
use bagstore_core::StorageError;
use bagstore_core::StorageFilter;
use bagstore_core::StorageInfo;
use bagstore_core::StorageOptions;
use bagstore_core::TopicMetadata;
use bagstore_core::WritableStorage;
use tracing::info;
use tracing::warn;

use crate::config::MIN_SPLIT_FILE_SIZE;
use crate::config::PragmaSet;
use crate::config::bagfile_size;
use crate::config::remove_created_store;
use crate::config::resolve_pragmas;
use crate::config::resolve_store_path;
use crate::config::validate_options;
use crate::reader::Reader;
use crate::schema::ensure_supported;
use crate::schema::initialize;
use crate::schema::read_db_schema_version;
use crate::schema::read_metadata;
use crate::schema::read_recorded_by;
use crate::schema::read_topics;
use crate::schema::relative_path;
use crate::wrapper::SqliteDatabase;
use crate::writer::WriteStats;
use crate::writer::Writer;

// ============================================================================
// SECTION: Guarded Core
// ============================================================================

/// State shared by every operation on an open store.
///
/// # Invariants
/// - `writer` is present exactly when the store was opened writable.
struct StorageCore {
    /// Open connection.
    database: SqliteDatabase,
    /// Write-path state.
    writer: Option<Writer>,
    /// Layout version after initialization.
    schema_version: SchemaVersion,
}

/// Locks the core of an open store.
fn lock_core(
    core: Option<&Mutex<StorageCore>>,
) -> Result<MutexGuard<'_, StorageCore>, StorageError> {
    let Some(core) = core else {
        return Err(StorageError::NotOpen);
    };
    let guard = core.lock().map_err(|_| StorageError::Io("storage mutex poisoned".to_string()))?;
    guard.database.ensure_usable()?;
    Ok(guard)
}

/// Connects to `path` and brings the store to a usable state.
///
/// The layout version is checked before any pragma runs, so a refused store
/// is left byte-for-byte unchanged.
fn open_core(
    path: &Path,
    options: &StorageOptions,
    io_flag: IoFlag,
    pragmas: &PragmaSet,
) -> Result<StorageCore, StorageError> {
    let database = SqliteDatabase::open(path, io_flag, options.busy_timeout_ms)?;
    let found = read_db_schema_version(&database)?;
    ensure_supported(found)?;
    for entry in pragmas.iter() {
        database.execute_batch(&entry.statement)?;
    }
    let schema_version = initialize(&database, found, &options.recorded_by)?;
    let writer = if io_flag.is_writable() {
        Some(Writer::open(&database, options.transaction_mode)?)
    } else {
        None
    };
    Ok(StorageCore {
        database,
        writer,
        schema_version,
    })
}

// ============================================================================
// SECTION: Storage
// ============================================================================

/// Message log store backed by a single `SQLite` file.
///
/// # Invariants
/// - Every operation before [`SqliteStorage::open`] or after
///   [`SqliteStorage::close`] fails with [`StorageError::NotOpen`].
/// - At most one write transaction is open at a time.
pub struct SqliteStorage {
    /// Guarded core; `None` while closed.
    core: Option<Mutex<StorageCore>>,
    /// Replay state.
    reader: Reader,
    /// Store path as reported in metadata.
    relative_path: String,
}

impl Default for SqliteStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteStorage {
    /// Creates an unopened store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: None,
            reader: Reader::default(),
            relative_path: String::new(),
        }
    }

    /// Creates a store and opens it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the open fails.
    pub fn open_with(options: &StorageOptions, io_flag: IoFlag) -> Result<Self, StorageError> {
        let mut storage = Self::new();
        storage.open(options, io_flag)?;
        Ok(storage)
    }

    /// Opens the store described by `options`, closing any store already open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPreset`], [`StorageError::InvalidConfig`],
    /// or [`StorageError::InvalidPath`] for bad options,
    /// [`StorageError::Schema`] for an unsupported layout, or an engine error.
    pub fn open(&mut self, options: &StorageOptions, io_flag: IoFlag) -> Result<(), StorageError> {
        self.close()?;
        let preset = PresetProfile::parse(&options.storage_preset_profile)?;
        validate_options(options, io_flag)?;
        let pragmas = resolve_pragmas(options, io_flag, preset)?;
        let path = resolve_store_path(&options.uri, io_flag)?;
        let core = match open_core(&path, options, io_flag, &pragmas) {
            Ok(core) => core,
            Err(err) => {
                if io_flag == IoFlag::ReadWrite {
                    remove_created_store(&path);
                }
                return Err(err);
            }
        };
        info!(
            path = %path.display(),
            io_flag = %io_flag,
            preset = preset.label(),
            schema_version = %core.schema_version,
            pragmas = pragmas.len(),
            "opened sqlite storage"
        );
        self.relative_path = relative_path(&path);
        self.reader = Reader::default();
        self.core = Some(Mutex::new(core));
        Ok(())
    }

    /// Commits any open transaction and closes the connection.
    ///
    /// Closing an unopened store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the final commit fails; the connection is
    /// closed regardless and uncommitted rows are discarded.
    pub fn close(&mut self) -> Result<(), StorageError> {
        let Some(core) = self.core.take() else {
            return Ok(());
        };
        self.reader = Reader::default();
        let mut core =
            core.into_inner().map_err(|_| StorageError::Io("storage mutex poisoned".to_string()))?;
        let committed = match core.writer.as_mut() {
            Some(writer) => writer.commit(&core.database),
            None => Ok(()),
        };
        info!(path = %core.database.path().display(), "closed sqlite storage");
        committed
    }

    /// Returns true while a store is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.core.is_some()
    }

    /// Returns the write counters kept since open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] when closed, or
    /// [`StorageError::WriteBeforeOpen`] for a read-only store.
    pub fn write_stats(&self) -> Result<WriteStats, StorageError> {
        self.with_writer(|_, writer| Ok(writer.stats()))
    }

    /// Changes the number of rows fetched per replay query.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.reader.set_page_size(page_size);
    }

    /// Runs `body` against the connection.
    fn with_database<T>(
        &self,
        body: impl FnOnce(&SqliteDatabase, SchemaVersion) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = lock_core(self.core.as_ref())?;
        body(&guard.database, guard.schema_version)
    }

    /// Runs `body` against the connection and write-path state.
    fn with_writer<T>(
        &self,
        body: impl FnOnce(&SqliteDatabase, &mut Writer) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = lock_core(self.core.as_ref())?;
        let core = &mut *guard;
        let Some(writer) = core.writer.as_mut() else {
            return Err(StorageError::WriteBeforeOpen);
        };
        body(&core.database, writer)
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close sqlite storage cleanly");
        }
    }
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

impl StorageInfo for SqliteStorage {
    fn get_metadata(&self) -> Result<BagMetadata, StorageError> {
        let mut guard = lock_core(self.core.as_ref())?;
        let core = &mut *guard;
        if let Some(writer) = core.writer.as_mut() {
            writer.commit(&core.database)?;
        }
        read_metadata(&core.database, core.schema_version)
    }

    fn get_all_topics_and_types(&self) -> Result<Vec<TopicMetadata>, StorageError> {
        self.with_database(read_topics)
    }

    fn get_relative_file_path(&self) -> Result<String, StorageError> {
        self.with_database(|_, _| Ok(self.relative_path.clone()))
    }

    fn get_bagfile_size(&self) -> Result<u64, StorageError> {
        self.with_database(|database, _| Ok(bagfile_size(database.path())))
    }

    fn get_storage_identifier(&self) -> &'static str {
        DEFAULT_STORAGE_ID
    }

    fn get_minimum_split_file_size(&self) -> u64 {
        MIN_SPLIT_FILE_SIZE
    }

    fn get_storage_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_database(|database, _| database.query_pragma_value(key))
    }

    fn get_db_schema_version(&self) -> Result<SchemaVersion, StorageError> {
        self.with_database(|_, version| Ok(version))
    }

    fn get_recorded_by(&self) -> Result<String, StorageError> {
        self.with_database(read_recorded_by)
    }
}

impl ReadOnlyStorage for SqliteStorage {
    fn set_filter(&mut self, filter: StorageFilter) {
        self.reader.state_mut().set_filter(filter);
    }

    fn reset_filter(&mut self) {
        self.reader.state_mut().set_filter(StorageFilter::default());
    }

    fn set_read_order(&mut self, order: ReadOrder) -> bool {
        self.reader.state_mut().set_read_order(order)
    }

    fn seek(&mut self, timestamp: i64) {
        self.reader.state_mut().seek(timestamp);
    }

    fn has_next(&mut self) -> Result<bool, StorageError> {
        let guard = lock_core(self.core.as_ref())?;
        self.reader.has_next(&guard.database)
    }

    fn read_next(&mut self) -> Result<SerializedMessage, StorageError> {
        let guard = lock_core(self.core.as_ref())?;
        self.reader.read_next(&guard.database)
    }
}

impl WritableStorage for SqliteStorage {
    fn create_topic(&self, topic: &TopicMetadata) -> Result<(), StorageError> {
        self.with_writer(|database, writer| writer.create_topic(database, topic))
    }

    fn remove_topic(&self, topic: &TopicMetadata) -> Result<(), StorageError> {
        self.with_writer(|database, writer| writer.remove_topic(database, topic))
    }

    fn write(&self, message: &SerializedMessage) -> Result<(), StorageError> {
        self.with_writer(|database, writer| writer.write(database, std::slice::from_ref(message)))
    }

    fn write_batch(&self, messages: &[SerializedMessage]) -> Result<(), StorageError> {
        self.with_writer(|database, writer| writer.write(database, messages))
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut guard = lock_core(self.core.as_ref())?;
        let core = &mut *guard;
        match core.writer.as_mut() {
            Some(writer) => writer.commit(&core.database),
            None => Ok(()),
        }
    }

    fn update_metadata(&self, metadata: &BagMetadata) -> Result<(), StorageError> {
        self.with_writer(|database, writer| writer.update_metadata(database, metadata))
    }
}

// ============================================================================
// SECTION: Capability Handles
// ============================================================================

/// Read-only view of a store; it exposes no write methods.
pub struct SqliteReader {
    /// Store opened with [`IoFlag::ReadOnly`].
    storage: SqliteStorage,
}

impl StorageInfo for SqliteReader {
    fn get_metadata(&self) -> Result<BagMetadata, StorageError> {
        self.storage.get_metadata()
    }

    fn get_all_topics_and_types(&self) -> Result<Vec<TopicMetadata>, StorageError> {
        self.storage.get_all_topics_and_types()
    }

    fn get_relative_file_path(&self) -> Result<String, StorageError> {
        self.storage.get_relative_file_path()
    }

    fn get_bagfile_size(&self) -> Result<u64, StorageError> {
        self.storage.get_bagfile_size()
    }

    fn get_storage_identifier(&self) -> &'static str {
        self.storage.get_storage_identifier()
    }

    fn get_minimum_split_file_size(&self) -> u64 {
        self.storage.get_minimum_split_file_size()
    }

    fn get_storage_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get_storage_setting(key)
    }

    fn get_db_schema_version(&self) -> Result<SchemaVersion, StorageError> {
        self.storage.get_db_schema_version()
    }

    fn get_recorded_by(&self) -> Result<String, StorageError> {
        self.storage.get_recorded_by()
    }
}

impl ReadOnlyStorage for SqliteReader {
    fn set_filter(&mut self, filter: StorageFilter) {
        self.storage.set_filter(filter);
    }

    fn reset_filter(&mut self) {
        self.storage.reset_filter();
    }

    fn set_read_order(&mut self, order: ReadOrder) -> bool {
        self.storage.set_read_order(order)
    }

    fn seek(&mut self, timestamp: i64) {
        self.storage.seek(timestamp);
    }

    fn has_next(&mut self) -> Result<bool, StorageError> {
        self.storage.has_next()
    }

    fn read_next(&mut self) -> Result<SerializedMessage, StorageError> {
        self.storage.read_next()
    }
}

/// Opens an existing store for replay only.
///
/// # Errors
///
/// Returns [`StorageError`] when the open fails.
pub fn open_read_only(options: &StorageOptions) -> Result<Box<dyn ReadOnlyStorage>, StorageError> {
    let storage = SqliteStorage::open_with(options, IoFlag::ReadOnly)?;
    Ok(Box::new(SqliteReader {
        storage,
    }))
}

/// Opens a store for recording and replay.
///
/// # Errors
///
/// Returns [`StorageError::InvalidConfig`] for [`IoFlag::ReadOnly`], or
/// another [`StorageError`] when the open fails.
pub fn open_read_write(
    options: &StorageOptions,
    io_flag: IoFlag,
) -> Result<Box<dyn ReadWriteStorage>, StorageError> {
    if !io_flag.is_writable() {
        return Err(StorageError::InvalidConfig(format!(
            "{io_flag} is not a writable open mode; use open_read_only"
        )));
    }
    Ok(Box::new(SqliteStorage::open_with(options, io_flag)?))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use bagstore_core::IoFlag;
    use bagstore_core::ReadOnlyStorage;
    use bagstore_core::SerializedMessage;
    use bagstore_core::StorageError;
    use bagstore_core::StorageInfo;
    use bagstore_core::StorageOptions;
    use bagstore_core::TopicMetadata;
    use bagstore_core::WritableStorage;

    use super::SqliteStorage;

    #[test]
    fn broken_connection_fails_every_later_call() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let options = StorageOptions::new(dir.path().join("bag.db3"));
        let mut storage = SqliteStorage::open_with(&options, IoFlag::ReadWrite).expect("open");
        storage.create_topic(&TopicMetadata::new("/a", "std_msgs/msg/String", "cdr")).expect("topic");
        {
            let guard = storage.core.as_ref().expect("open core").lock().expect("lock");
            let failure = rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
                None,
            );
            assert!(matches!(guard.database.map_error(failure), StorageError::ConnectionBroken(_)));
        }
        assert!(matches!(storage.has_next(), Err(StorageError::ConnectionBroken(_))));
        assert!(matches!(
            storage.write(&SerializedMessage::new("/a", vec![1], 1)),
            Err(StorageError::ConnectionBroken(_))
        ));
        assert!(matches!(storage.get_metadata(), Err(StorageError::ConnectionBroken(_))));
    }
}
