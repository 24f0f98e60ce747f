// crates/bagstore-core/src/core/replay.rs
// ============================================================================
// Module: Bagstore Replay Controls
// Description: Topic filters and read orders applied during replay.
// Purpose: Describe which messages a reader returns and in which order.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Replay controls are plain values handed to a reader. A filter narrows the
//! topics returned; a read order chooses the sort key and direction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Filter
// ============================================================================

/// Topic filter applied during replay.
///
/// # Invariants
/// - An empty `topics` list places no restriction on topic names.
/// - Empty regex strings are ignored; non-empty ones are evaluated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageFilter {
    /// Topic names to include.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Regular expression that topic names must match.
    #[serde(default)]
    pub topics_regex: String,
    /// Regular expression naming topics to exclude.
    #[serde(default)]
    pub topics_regex_to_exclude: String,
}

impl StorageFilter {
    /// Returns true when the filter places no restriction on replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.topics_regex.is_empty()
            && self.topics_regex_to_exclude.is_empty()
    }
}

// ============================================================================
// SECTION: Read Order
// ============================================================================

/// Sort key for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOrderSortBy {
    /// Order by the timestamp the message was received at.
    #[default]
    ReceivedTimestamp,
    /// Order by the timestamp the message was published at.
    PublishedTimestamp,
    /// Order in which messages were written to the file.
    File,
}

/// Replay order: sort key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadOrder {
    /// Sort key.
    #[serde(default)]
    pub sort_by: ReadOrderSortBy,
    /// Replay from the latest message backwards.
    #[serde(default)]
    pub reverse: bool,
}

impl ReadOrder {
    /// Builds a read order.
    #[must_use]
    pub const fn new(sort_by: ReadOrderSortBy, reverse: bool) -> Self {
        Self {
            sort_by,
            reverse,
        }
    }
}
