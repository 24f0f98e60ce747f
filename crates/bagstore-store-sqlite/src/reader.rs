// crates/bagstore-store-sqlite/src/reader.rs
// ============================================================================
// Module: SQLite Store Reader
// Description: Replay state, query construction, and keyset-paged cursor.
// Purpose: Replay stored messages filtered, ordered, and from a seek position.
// Dependencies: bagstore-core, tracing
// ============================================================================

//! ## Overview
//! Replay is driven by a [`ReadState`] (filter, order, position) and a
//! [`MessageCursor`] that fetches rows in pages. Any change to the filter,
//! order, or seek position starts a new state generation; the cursor notices
//! the new generation, rebuilds its SQL once, and continues from the current
//! position. Pages resume strictly after the last fetched `(timestamp, id)`
//! pair, so replay never repeats or skips a row even when timestamps tie.
//!
//! In file order the sort key is the row id alone; a seek then acts as a
//! timestamp bound until the read order changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;

use bagstore_core::ReadOrder;
use bagstore_core::ReadOrderSortBy;
use bagstore_core::SerializedMessage;
use bagstore_core::StorageError;
use bagstore_core::StorageFilter;
use tracing::debug;

use crate::wrapper::SqlValue;
use crate::wrapper::SqliteDatabase;
use crate::wrapper::compile_topic_pattern;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rows fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

// ============================================================================
// SECTION: Read State
// ============================================================================

/// Where the next replay query starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekPosition {
    /// First message in the current direction.
    #[default]
    Start,
    /// First message at or beyond a timestamp in the current direction.
    Timestamp(i64),
    /// Strictly after the last message returned.
    Resume {
        /// Timestamp of the last message returned.
        timestamp: i64,
        /// Row id of the last message returned.
        row_id: i64,
    },
}

/// Replay controls of a single reader.
///
/// # Invariants
/// - `generation` changes whenever filter, order, or seek position is replaced.
/// - Advancing past a returned message does not change `generation`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    /// Topic filter.
    filter: StorageFilter,
    /// Sort key and direction.
    order: ReadOrder,
    /// Start of the next query.
    position: SeekPosition,
    /// Timestamp bound set by the last seek; only used in file order.
    time_bound: Option<i64>,
    /// State generation counter.
    generation: u64,
}

impl ReadState {
    /// Returns the topic filter.
    #[must_use]
    pub const fn filter(&self) -> &StorageFilter {
        &self.filter
    }

    /// Returns the read order.
    #[must_use]
    pub const fn order(&self) -> ReadOrder {
        self.order
    }

    /// Returns the replay position.
    #[must_use]
    pub const fn position(&self) -> SeekPosition {
        self.position
    }

    /// Returns the state generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the topic filter; the position is kept.
    pub fn set_filter(&mut self, filter: StorageFilter) {
        self.filter = filter;
        self.invalidate();
    }

    /// Replaces the read order; the position is kept.
    ///
    /// A different order drops the file-order timestamp bound of an earlier
    /// seek. Returns false and keeps the current order for published-timestamp
    /// order.
    pub fn set_read_order(&mut self, order: ReadOrder) -> bool {
        if order.sort_by == ReadOrderSortBy::PublishedTimestamp {
            debug!("published timestamp read order is not supported");
            return false;
        }
        if order != self.order {
            self.time_bound = None;
        }
        self.order = order;
        self.invalidate();
        true
    }

    /// Moves the position to `timestamp`.
    pub fn seek(&mut self, timestamp: i64) {
        self.position = SeekPosition::Timestamp(timestamp);
        self.time_bound = Some(timestamp);
        self.invalidate();
    }

    /// Records the message just returned as the resume point.
    const fn advance(&mut self, timestamp: i64, row_id: i64) {
        self.position = SeekPosition::Resume {
            timestamp,
            row_id,
        };
    }

    /// Starts a new generation.
    const fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

// ============================================================================
// SECTION: Query Construction
// ============================================================================

/// Column list and join shared by every replay query.
const SELECT_MESSAGES: &str = "SELECT messages.data, messages.timestamp, topics.name, \
                               messages.id FROM messages JOIN topics ON messages.topic_id = \
                               topics.id";

/// Builds the replay SQL for a state and start position.
///
/// Placeholders appear in the order [`bind_params`] produces values.
#[must_use]
pub fn build_query(state: &ReadState, start: SeekPosition) -> String {
    let forward = !state.order.reverse;
    let (cmp, cmp_eq, direction) = if forward { (">", ">=", "ASC") } else { ("<", "<=", "DESC") };
    let mut conditions = Vec::new();
    if !state.filter.topics.is_empty() {
        let placeholders = vec!["?"; state.filter.topics.len()].join(", ");
        conditions.push(format!("topics.name IN ({placeholders})"));
    }
    if !state.filter.topics_regex.is_empty() {
        conditions.push("regexp(?, topics.name)".to_string());
    }
    if !state.filter.topics_regex_to_exclude.is_empty() {
        conditions.push("NOT regexp(?, topics.name)".to_string());
    }
    let order_by = match state.order.sort_by {
        ReadOrderSortBy::File => {
            if state.time_bound.is_some() {
                conditions.push(format!("messages.timestamp {cmp_eq} ?"));
            }
            if matches!(start, SeekPosition::Resume { .. }) {
                conditions.push(format!("messages.id {cmp} ?"));
            }
            format!("messages.id {direction}")
        }
        ReadOrderSortBy::ReceivedTimestamp | ReadOrderSortBy::PublishedTimestamp => {
            match start {
                SeekPosition::Start => {}
                SeekPosition::Timestamp(_) => {
                    conditions.push(format!("messages.timestamp {cmp_eq} ?"));
                }
                SeekPosition::Resume { .. } => conditions.push(format!(
                    "((messages.timestamp = ? AND messages.id {cmp} ?) OR messages.timestamp \
                     {cmp} ?)"
                )),
            }
            format!("messages.timestamp {direction}, messages.id {direction}")
        }
    };
    let mut sql = SELECT_MESSAGES.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&order_by);
    sql.push_str(" LIMIT ?");
    sql
}

/// Produces parameter values for a query built by [`build_query`].
///
/// `start` must have the same variant the query was built with.
#[must_use]
pub fn bind_params(state: &ReadState, start: SeekPosition, limit: usize) -> Vec<SqlValue<'_>> {
    let mut params: Vec<SqlValue<'_>> =
        state.filter.topics.iter().map(|topic| SqlValue::Text(topic)).collect();
    if !state.filter.topics_regex.is_empty() {
        params.push(SqlValue::Text(&state.filter.topics_regex));
    }
    if !state.filter.topics_regex_to_exclude.is_empty() {
        params.push(SqlValue::Text(&state.filter.topics_regex_to_exclude));
    }
    match state.order.sort_by {
        ReadOrderSortBy::File => {
            if let Some(bound) = state.time_bound {
                params.push(SqlValue::Integer(bound));
            }
            if let SeekPosition::Resume {
                row_id, ..
            } = start
            {
                params.push(SqlValue::Integer(row_id));
            }
        }
        ReadOrderSortBy::ReceivedTimestamp | ReadOrderSortBy::PublishedTimestamp => match start {
            SeekPosition::Start => {}
            SeekPosition::Timestamp(timestamp) => params.push(SqlValue::Integer(timestamp)),
            SeekPosition::Resume {
                timestamp,
                row_id,
            } => {
                params.push(SqlValue::Integer(timestamp));
                params.push(SqlValue::Integer(row_id));
                params.push(SqlValue::Integer(timestamp));
            }
        },
    }
    params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    params
}

/// Rejects filters whose regular expressions do not compile.
fn validate_filter(filter: &StorageFilter) -> Result<(), StorageError> {
    for pattern in [&filter.topics_regex, &filter.topics_regex_to_exclude] {
        if !pattern.is_empty() {
            compile_topic_pattern(pattern).map_err(|err| {
                StorageError::InvalidConfig(format!("invalid topic pattern {pattern}: {err}"))
            })?;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// A fetched row awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageRow {
    /// Payload bytes.
    data: Vec<u8>,
    /// Receive timestamp.
    timestamp: i64,
    /// Topic name.
    topic: String,
    /// Message row id.
    row_id: i64,
}

/// Keyset-paged cursor for one state generation.
///
/// # Invariants
/// - SQL texts are built once, when the cursor is created.
/// - `buffer` holds rows in replay order that have not been returned yet.
#[derive(Debug)]
pub struct MessageCursor {
    /// Generation the cursor was built for.
    generation: u64,
    /// Position the generation starts from.
    start: SeekPosition,
    /// Query for the first page.
    first_page_sql: String,
    /// Query for every later page.
    next_page_sql: String,
    /// Rows per page.
    page_size: usize,
    /// Fetched rows not yet returned.
    buffer: VecDeque<MessageRow>,
    /// Last fetched row as (timestamp, row id).
    last_fetched: Option<(i64, i64)>,
}

impl MessageCursor {
    /// Builds a cursor for the current generation of `state`.
    fn new(state: &ReadState, page_size: usize) -> Self {
        let first_page_sql = build_query(state, state.position);
        let next_page_sql = build_query(
            state,
            SeekPosition::Resume {
                timestamp: 0,
                row_id: 0,
            },
        );
        debug!(generation = state.generation, sql = %first_page_sql, "prepared replay query");
        Self {
            generation: state.generation,
            start: state.position,
            first_page_sql,
            next_page_sql,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last_fetched: None,
        }
    }

    /// Fetches the next page into the buffer.
    fn fetch_page(
        &mut self,
        database: &SqliteDatabase,
        state: &ReadState,
    ) -> Result<(), StorageError> {
        let (sql, position) = match self.last_fetched {
            Some((timestamp, row_id)) => (
                &self.next_page_sql,
                SeekPosition::Resume {
                    timestamp,
                    row_id,
                },
            ),
            None => (&self.first_page_sql, self.start),
        };
        let params = bind_params(state, position, self.page_size);
        let mut statement = database.prepare_cached(sql)?;
        for row in statement.query::<(Vec<u8>, i64, String, i64)>(&params)? {
            let (data, timestamp, topic, row_id) = row?;
            self.last_fetched = Some((timestamp, row_id));
            self.buffer.push_back(MessageRow {
                data,
                timestamp,
                topic,
                row_id,
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Replay state plus its cursor.
#[derive(Debug)]
pub struct Reader {
    /// Replay controls.
    state: ReadState,
    /// Cursor for the current generation, built lazily.
    cursor: Option<MessageCursor>,
    /// Rows per page.
    page_size: usize,
}

impl Default for Reader {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Reader {
    /// Creates a reader positioned at the start with no filter.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            state: ReadState::default(),
            cursor: None,
            page_size,
        }
    }

    /// Changes the page size; replay continues from the current position.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.cursor = None;
    }

    /// Returns the replay controls.
    #[must_use]
    pub const fn state(&self) -> &ReadState {
        &self.state
    }

    /// Returns the replay controls for modification.
    pub const fn state_mut(&mut self) -> &mut ReadState {
        &mut self.state
    }

    /// Returns true when another message is available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the filter is invalid or the query fails.
    pub fn has_next(&mut self, database: &SqliteDatabase) -> Result<bool, StorageError> {
        Ok(self.fill(database)?.is_some())
    }

    /// Returns the next message and advances the position past it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoMoreMessages`] at the end of replay, or
    /// another [`StorageError`] when the query fails.
    pub fn read_next(&mut self, database: &SqliteDatabase) -> Result<SerializedMessage, StorageError> {
        if self.fill(database)?.is_none() {
            return Err(StorageError::NoMoreMessages);
        }
        let Some(row) = self.cursor.as_mut().and_then(|cursor| cursor.buffer.pop_front()) else {
            return Err(StorageError::NoMoreMessages);
        };
        self.state.advance(row.timestamp, row.row_id);
        Ok(SerializedMessage {
            topic_name: row.topic,
            serialized_data: row.data,
            time_stamp: row.timestamp,
        })
    }

    /// Ensures the buffer holds the next row when one exists and returns it.
    fn fill(&mut self, database: &SqliteDatabase) -> Result<Option<&MessageRow>, StorageError> {
        let stale =
            self.cursor.as_ref().is_none_or(|cursor| cursor.generation != self.state.generation);
        if stale {
            validate_filter(&self.state.filter)?;
            self.cursor = Some(MessageCursor::new(&self.state, self.page_size));
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        if cursor.buffer.is_empty() {
            cursor.fetch_page(database, &self.state)?;
        }
        Ok(cursor.buffer.front())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use bagstore_core::ReadOrder;
    use bagstore_core::ReadOrderSortBy;
    use bagstore_core::StorageFilter;

    use super::ReadState;
    use super::SeekPosition;
    use super::bind_params;
    use super::build_query;

    fn placeholder_count(sql: &str) -> usize {
        sql.matches('?').count()
    }

    fn sample_states() -> Vec<ReadState> {
        let filter = StorageFilter {
            topics: vec!["/a".to_string(), "/b".to_string()],
            topics_regex: "/.*".to_string(),
            topics_regex_to_exclude: "/b".to_string(),
        };
        let mut states = Vec::new();
        for sort_by in [ReadOrderSortBy::ReceivedTimestamp, ReadOrderSortBy::File] {
            for reverse in [false, true] {
                for seek in [None, Some(-5)] {
                    let mut state = ReadState::default();
                    state.set_filter(filter.clone());
                    assert!(state.set_read_order(ReadOrder::new(sort_by, reverse)));
                    if let Some(timestamp) = seek {
                        state.seek(timestamp);
                    }
                    states.push(state);
                }
            }
        }
        states
    }

    #[test]
    fn placeholders_match_bound_values() {
        let resume = SeekPosition::Resume {
            timestamp: 3,
            row_id: 9,
        };
        for state in sample_states() {
            for start in [state.position(), resume] {
                let sql = build_query(&state, start);
                assert_eq!(placeholder_count(&sql), bind_params(&state, start, 16).len(), "{sql}");
            }
        }
    }

    #[test]
    fn timestamp_order_breaks_ties_by_row_id() {
        let state = ReadState::default();
        let sql = build_query(&state, SeekPosition::Start);
        assert!(sql.ends_with("ORDER BY messages.timestamp ASC, messages.id ASC LIMIT ?"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn reverse_resume_uses_descending_keyset() {
        let mut state = ReadState::default();
        assert!(state.set_read_order(ReadOrder::new(ReadOrderSortBy::ReceivedTimestamp, true)));
        let sql = build_query(
            &state,
            SeekPosition::Resume {
                timestamp: 1,
                row_id: 2,
            },
        );
        assert!(sql.contains(
            "((messages.timestamp = ? AND messages.id < ?) OR messages.timestamp < ?)"
        ));
        assert!(sql.contains("ORDER BY messages.timestamp DESC, messages.id DESC"));
    }

    #[test]
    fn published_order_is_refused_and_state_kept() {
        let mut state = ReadState::default();
        let generation = state.generation();
        assert!(!state.set_read_order(ReadOrder::new(ReadOrderSortBy::PublishedTimestamp, false)));
        assert_eq!(state.order(), ReadOrder::default());
        assert_eq!(state.generation(), generation);
    }

    #[test]
    fn seek_sets_timestamp_position_and_new_generation() {
        let mut state = ReadState::default();
        let generation = state.generation();
        state.seek(42);
        assert_eq!(state.position(), SeekPosition::Timestamp(42));
        assert_ne!(state.generation(), generation);
    }

    #[test]
    fn order_change_drops_file_order_seek_bound() {
        let mut state = ReadState::default();
        assert!(state.set_read_order(ReadOrder::new(ReadOrderSortBy::File, false)));
        state.seek(7);
        assert!(build_query(&state, state.position()).contains("messages.timestamp >= ?"));
        assert!(state.set_read_order(ReadOrder::new(ReadOrderSortBy::File, true)));
        let sql = build_query(&state, state.position());
        assert!(!sql.contains("messages.timestamp"), "{sql}");
        assert_eq!(placeholder_count(&sql), bind_params(&state, state.position(), 4).len());
    }

    #[test]
    fn same_order_keeps_file_order_seek_bound() {
        let mut state = ReadState::default();
        let order = ReadOrder::new(ReadOrderSortBy::File, false);
        assert!(state.set_read_order(order));
        state.seek(7);
        assert!(state.set_read_order(order));
        assert!(build_query(&state, state.position()).contains("messages.timestamp >= ?"));
    }
}
