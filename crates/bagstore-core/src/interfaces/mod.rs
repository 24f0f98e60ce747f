// crates/bagstore-core/src/interfaces/mod.rs
// ============================================================================
// Module: Bagstore Interfaces
// Description: Capability traits and error taxonomy for storage engines.
// Purpose: Define the contract surfaces used by recorders, players, and tools.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Interfaces split a storage engine into capabilities. Every open store
//! answers [`StorageInfo`] queries; stores opened for replay implement
//! [`ReadOnlyStorage`]; stores opened for recording also implement
//! [`WritableStorage`]. A read-only handle exposes no write methods at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::BagMetadata;
use crate::core::ReadOrder;
use crate::core::SchemaVersion;
use crate::core::SerializedMessage;
use crate::core::StorageFilter;
use crate::core::TopicMetadata;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Storage engine errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Error messages never embed message payload bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Preset profile label is not recognized.
    #[error("invalid storage preset profile: {0}")]
    InvalidPreset(String),
    /// Store path is unusable for the requested open mode.
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    /// Storage configuration is malformed or unsafe.
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),
    /// Store layout is unsupported or damaged.
    #[error("storage schema error: {0}")]
    Schema(String),
    /// Operation issued before open or after close.
    #[error("storage is not open")]
    NotOpen,
    /// Write issued on a store that was not opened for writing.
    #[error("storage was not opened for writing")]
    WriteBeforeOpen,
    /// Message refers to a topic that was never created.
    #[error("topic has not been created: {0}")]
    UnknownTopic(String),
    /// Replay has no further messages.
    #[error("no more messages to read")]
    NoMoreMessages,
    /// Message payload exceeds what the engine can store in one row.
    #[error("message on topic {topic} too large: {actual_bytes} bytes")]
    MessageTooLarge {
        /// Topic the message was written to.
        topic: String,
        /// Payload size in bytes.
        actual_bytes: usize,
    },
    /// Engine rejected a statement.
    #[error("storage query error: {message}")]
    Query {
        /// Engine diagnostic.
        message: String,
    },
    /// Filesystem error.
    #[error("storage io error: {0}")]
    Io(String),
    /// Connection hit an unrecoverable engine error and must be reopened.
    #[error("storage connection broken: {0}")]
    ConnectionBroken(String),
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// Queries answered by every open store.
pub trait StorageInfo {
    /// Returns aggregate metadata for the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is closed or the aggregation fails.
    fn get_metadata(&self) -> Result<BagMetadata, StorageError>;

    /// Returns every topic registered in the store, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is closed or the query fails.
    fn get_all_topics_and_types(&self) -> Result<Vec<TopicMetadata>, StorageError>;

    /// Returns the store file path as opened.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] when the store is closed.
    fn get_relative_file_path(&self) -> Result<String, StorageError>;

    /// Returns the current on-disk size of the store file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] when the store is closed.
    fn get_bagfile_size(&self) -> Result<u64, StorageError>;

    /// Returns the storage engine identifier.
    fn get_storage_identifier(&self) -> &'static str;

    /// Returns the smallest file size the engine can split at.
    fn get_minimum_split_file_size(&self) -> u64;

    /// Returns the current value of an engine setting.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the key is invalid or the store is closed.
    fn get_storage_setting(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Returns the persisted layout version.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] when the store is closed.
    fn get_db_schema_version(&self) -> Result<SchemaVersion, StorageError>;

    /// Returns the identifier of the tool that created the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is closed or the query fails.
    fn get_recorded_by(&self) -> Result<String, StorageError>;
}

/// Replay capability.
///
/// Replay state (filter, order, position) belongs to a single reader; methods
/// take `&mut self`.
pub trait ReadOnlyStorage: StorageInfo {
    /// Replaces the topic filter and restarts the replay query.
    fn set_filter(&mut self, filter: StorageFilter);

    /// Clears the topic filter.
    fn reset_filter(&mut self);

    /// Changes the replay order. Returns false, leaving the order unchanged,
    /// when the order is unsupported.
    fn set_read_order(&mut self, order: ReadOrder) -> bool;

    /// Moves the replay position to the first message at or beyond `timestamp`
    /// in the current direction.
    ///
    /// In file order the timestamp also bounds the rest of the replay until
    /// the read order is changed.
    fn seek(&mut self, timestamp: i64);

    /// Returns true when another message is available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is closed or the query fails.
    fn has_next(&mut self) -> Result<bool, StorageError>;

    /// Returns the next message.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoMoreMessages`] past the end of replay, or
    /// another [`StorageError`] when the query fails.
    fn read_next(&mut self) -> Result<SerializedMessage, StorageError>;
}

/// Recording capability.
///
/// Write methods take `&self`; engines serialize them internally.
pub trait WritableStorage: StorageInfo {
    /// Registers a topic. Registering an existing name is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is not writable or the insert fails.
    fn create_topic(&self, topic: &TopicMetadata) -> Result<(), StorageError>;

    /// Removes a topic by name. Removing an unknown name is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is not writable or the delete fails.
    fn remove_topic(&self, topic: &TopicMetadata) -> Result<(), StorageError>;

    /// Writes a single message.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTopic`] for an unregistered topic, or
    /// another [`StorageError`] when the insert fails.
    fn write(&self, message: &SerializedMessage) -> Result<(), StorageError>;

    /// Writes messages atomically: either every message is stored or none is.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when any message cannot be stored.
    fn write_batch(&self, messages: &[SerializedMessage]) -> Result<(), StorageError>;

    /// Makes pending writes durable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the commit fails.
    fn flush(&self) -> Result<(), StorageError>;

    /// Replaces the bag-level metadata persisted with the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the metadata cannot be persisted.
    fn update_metadata(&self, metadata: &BagMetadata) -> Result<(), StorageError>;
}

/// Combined replay and recording capability.
pub trait ReadWriteStorage: ReadOnlyStorage + WritableStorage {}

impl<T: ReadOnlyStorage + WritableStorage> ReadWriteStorage for T {}
