// crates/bagstore-store-sqlite/src/writer.rs
// ============================================================================
// Module: SQLite Store Writer
// Description: Topic registration and transactional message inserts.
// Purpose: Record messages durably with per-call atomicity.
// Dependencies: bagstore-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! The writer keeps a name to row id cache of registered topics and at most
//! one open transaction. Every write call resolves all topic ids before
//! touching the database, then inserts inside a savepoint so that a failing
//! call leaves no partial rows behind. In auto-commit mode the transaction is
//! committed at the end of each call; in batched mode it stays open until
//! [`Writer::commit`] is called by flush, metadata aggregation, or close.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use bagstore_core::BagMetadata;
use bagstore_core::SerializedMessage;
use bagstore_core::StorageError;
use bagstore_core::TopicMetadata;
use bagstore_core::TransactionMode;
use rusqlite::ErrorCode;
use tracing::debug;
use tracing::warn;

use crate::schema::write_bag_metadata;
use crate::wrapper::SqlValue;
use crate::wrapper::SqliteDatabase;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Savepoint wrapping each write call.
const WRITE_SAVEPOINT: &str = "bagstore_write";
/// Message insert statement.
const INSERT_MESSAGE_SQL: &str =
    "INSERT INTO messages (timestamp, topic_id, data) VALUES (?1, ?2, ?3)";
/// Topic insert statement.
const INSERT_TOPIC_SQL: &str = "INSERT INTO topics (name, type, serialization_format, \
                                offered_qos_profiles, type_description_hash) VALUES (?1, ?2, \
                                ?3, ?4, ?5)";

// ============================================================================
// SECTION: Topic Cache
// ============================================================================

/// Registered topic names and their row ids.
///
/// # Invariants
/// - Mirrors the `topics` table of the open store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopicCache {
    /// Row id by topic name.
    ids: HashMap<String, i64>,
}

impl TopicCache {
    /// Loads the cache from the `topics` table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    pub fn load(database: &SqliteDatabase) -> Result<Self, StorageError> {
        let mut statement = database.prepare("SELECT name, id FROM topics ORDER BY id")?;
        let ids = statement.query::<(String, i64)>(&[])?.collect::<Result<_, _>>()?;
        Ok(Self {
            ids,
        })
    }

    /// Returns the row id of a topic.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied()
    }

    /// Returns the number of cached topics.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Counters kept since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Messages inserted by successful write calls and not rolled back since.
    pub messages_written: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Write-path state of an open store.
///
/// # Invariants
/// - At most one transaction is open at a time.
/// - `transaction_active` matches the connection after every call, including
///   failed ones: an engine-side rollback is detected and cleared.
/// - `pending` counts messages inserted in the open transaction.
#[derive(Debug)]
pub struct Writer {
    /// Registered topics.
    topics: TopicCache,
    /// Commit policy.
    transaction_mode: TransactionMode,
    /// Whether a transaction is open.
    transaction_active: bool,
    /// Messages inserted in the open transaction.
    pending: u64,
    /// Counters since open.
    stats: WriteStats,
}

impl Writer {
    /// Creates writer state for an opened store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the topic cache cannot be loaded.
    pub fn open(
        database: &SqliteDatabase,
        transaction_mode: TransactionMode,
    ) -> Result<Self, StorageError> {
        let topics = TopicCache::load(database)?;
        debug!(topics = topics.count(), "writer ready");
        Ok(Self {
            topics,
            transaction_mode,
            transaction_active: false,
            pending: 0,
            stats: WriteStats::default(),
        })
    }

    /// Returns the counters kept since open.
    #[must_use]
    pub const fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Registers a topic; a cached name is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the insert fails.
    pub fn create_topic(
        &mut self,
        database: &SqliteDatabase,
        topic: &TopicMetadata,
    ) -> Result<(), StorageError> {
        if self.topics.get(&topic.name).is_some() {
            return Ok(());
        }
        let inserted = database.prepare_cached(INSERT_TOPIC_SQL).and_then(|mut statement| {
            statement.execute(&[
                SqlValue::Text(&topic.name),
                SqlValue::Text(&topic.type_name),
                SqlValue::Text(&topic.serialization_format),
                SqlValue::Text(&topic.offered_qos_profiles),
                SqlValue::Text(&topic.type_description_hash),
            ])
        });
        if let Err(err) = inserted {
            return Err(self.settle_failure(database, err));
        }
        let id = database.last_insert_rowid();
        self.topics.ids.insert(topic.name.clone(), id);
        debug!(topic = %topic.name, id, "created topic");
        Ok(())
    }

    /// Removes a topic by name; an unknown name is a no-op.
    ///
    /// Messages already recorded on the topic stay in the file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the delete fails.
    pub fn remove_topic(
        &mut self,
        database: &SqliteDatabase,
        topic: &TopicMetadata,
    ) -> Result<(), StorageError> {
        let Some(id) = self.topics.get(&topic.name) else {
            return Ok(());
        };
        let deleted = database
            .prepare_cached("DELETE FROM topics WHERE id = ?1")
            .and_then(|mut statement| statement.execute(&[SqlValue::Integer(id)]));
        if let Err(err) = deleted {
            return Err(self.settle_failure(database, err));
        }
        self.topics.ids.remove(&topic.name);
        debug!(topic = %topic.name, id, "removed topic");
        Ok(())
    }

    /// Writes messages atomically.
    ///
    /// Topic ids are resolved before any insert, so an unknown topic leaves
    /// the store untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTopic`] for an unregistered topic,
    /// [`StorageError::MessageTooLarge`] for a payload above the engine
    /// length limit, or another [`StorageError`] when an insert or commit
    /// fails. When the engine rolled back an open batch, the error names how
    /// many earlier messages were discarded.
    pub fn write(
        &mut self,
        database: &SqliteDatabase,
        messages: &[SerializedMessage],
    ) -> Result<(), StorageError> {
        if messages.is_empty() {
            return Ok(());
        }
        let topic_ids = messages
            .iter()
            .map(|message| {
                self.topics
                    .get(&message.topic_name)
                    .ok_or_else(|| StorageError::UnknownTopic(message.topic_name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.begin(database)?;
        let inserted = database.with_savepoint(WRITE_SAVEPOINT, |database| {
            let mut insert = database.prepare_cached(INSERT_MESSAGE_SQL)?;
            for (message, topic_id) in messages.iter().zip(&topic_ids) {
                let params = [
                    SqlValue::Integer(message.time_stamp),
                    SqlValue::Integer(*topic_id),
                    SqlValue::Blob(&message.serialized_data),
                ];
                match insert.try_execute(&params) {
                    Ok(_) => {}
                    Err(err) if is_too_big(&err) => {
                        warn!(
                            topic = %message.topic_name,
                            bytes = message.serialized_data.len(),
                            "message exceeds sqlite length limit"
                        );
                        return Err(StorageError::MessageTooLarge {
                            topic: message.topic_name.clone(),
                            actual_bytes: message.serialized_data.len(),
                        });
                    }
                    Err(err) => return Err(database.map_error(err)),
                }
            }
            Ok(())
        });
        if let Err(err) = inserted {
            let err = self.settle_failure(database, err);
            if self.transaction_mode == TransactionMode::AutoCommit
                && let Err(commit) = self.commit(database)
            {
                warn!(error = %commit, "failed to close transaction after a failed write");
            }
            return Err(err);
        }
        let written = u64::try_from(messages.len()).unwrap_or(u64::MAX);
        self.pending = self.pending.saturating_add(written);
        self.stats.messages_written = self.stats.messages_written.saturating_add(written);
        match self.transaction_mode {
            TransactionMode::AutoCommit => self.commit(database),
            TransactionMode::Batched => Ok(()),
        }
    }

    /// Replaces the persisted bag-level metadata.
    ///
    /// Inside an open transaction the update commits with it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the metadata cannot be persisted.
    pub fn update_metadata(
        &mut self,
        database: &SqliteDatabase,
        metadata: &BagMetadata,
    ) -> Result<(), StorageError> {
        write_bag_metadata(database, metadata).map_err(|err| self.settle_failure(database, err))
    }

    /// Commits the open transaction; a no-op when none is open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the commit fails. The transaction stays
    /// open unless the engine rolled it back, in which case the error names
    /// the discarded messages.
    pub fn commit(&mut self, database: &SqliteDatabase) -> Result<(), StorageError> {
        if !self.transaction_active {
            return Ok(());
        }
        if let Err(err) = database.execute_batch("COMMIT;") {
            return Err(self.settle_failure(database, err));
        }
        self.transaction_active = false;
        self.pending = 0;
        self.stats.transactions_committed = self.stats.transactions_committed.saturating_add(1);
        debug!(
            messages_written = self.stats.messages_written,
            transactions_committed = self.stats.transactions_committed,
            "committed transaction"
        );
        Ok(())
    }

    /// Opens a transaction unless one is already open.
    fn begin(&mut self, database: &SqliteDatabase) -> Result<(), StorageError> {
        if self.transaction_active {
            return Ok(());
        }
        database.execute_batch("BEGIN TRANSACTION;")?;
        self.transaction_active = true;
        debug!("began transaction");
        Ok(())
    }

    /// Resyncs the transaction flag with the connection after a failed statement.
    ///
    /// When the engine rolled back the open transaction, uncommitted messages
    /// leave the counters, topics created inside it leave the cache, and the
    /// returned error reports the loss.
    fn settle_failure(&mut self, database: &SqliteDatabase, err: StorageError) -> StorageError {
        if !self.transaction_active || !database.is_autocommit() {
            return err;
        }
        self.transaction_active = false;
        let discarded = std::mem::take(&mut self.pending);
        self.stats.messages_written = self.stats.messages_written.saturating_sub(discarded);
        match TopicCache::load(database) {
            Ok(topics) => self.topics = topics,
            Err(reload) => warn!(error = %reload, "failed to reload topic cache after rollback"),
        }
        warn!(error = %err, discarded, "open transaction was rolled back by the engine");
        if discarded == 0 || matches!(err, StorageError::ConnectionBroken(_)) {
            return err;
        }
        StorageError::Query {
            message: format!("{err}; transaction rolled back, {discarded} uncommitted messages discarded"),
        }
    }
}

/// Returns true when the engine rejected a value above its length limit.
fn is_too_big(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::TooBig)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
