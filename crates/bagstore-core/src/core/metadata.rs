// crates/bagstore-core/src/core/metadata.rs
// ============================================================================
// Module: Bagstore Bag Metadata
// Description: Aggregate description of a recorded message log.
// Purpose: Report counts, time span, and provenance of a stored log.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Bag metadata summarizes a store: how many messages it holds per topic,
//! the time span they cover, and which tool produced it. Engines derive the
//! counts from stored rows and merge them with caller-supplied fields such as
//! compression settings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::message::TopicInformation;

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Aggregate metadata for a message log.
///
/// # Invariants
/// - `duration_ns` equals latest minus earliest timestamp; both are zero for an empty log.
/// - `message_count` equals the sum of per-topic counts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BagMetadata {
    /// Metadata format version.
    #[serde(default)]
    pub version: u32,
    /// On-disk size of the store in bytes.
    #[serde(default)]
    pub bag_size: u64,
    /// Storage engine identifier.
    #[serde(default)]
    pub storage_identifier: String,
    /// Store files relative to the bag directory.
    #[serde(default)]
    pub relative_file_paths: Vec<String>,
    /// Time between the earliest and latest message in nanoseconds.
    #[serde(default)]
    pub duration_ns: i64,
    /// Timestamp of the earliest message in nanoseconds.
    #[serde(default)]
    pub starting_time_ns: i64,
    /// Total number of stored messages.
    #[serde(default)]
    pub message_count: u64,
    /// Per-topic descriptions and counts.
    #[serde(default)]
    pub topics_with_message_count: Vec<TopicInformation>,
    /// Compression format label, passed through unchanged.
    #[serde(default)]
    pub compression_format: String,
    /// Compression mode label, passed through unchanged.
    #[serde(default)]
    pub compression_mode: String,
    /// Identifier of the tool that recorded the log.
    #[serde(default)]
    pub recorded_by: String,
}

// ============================================================================
// SECTION: Schema Version
// ============================================================================

/// Persisted layout version of a store.
///
/// # Invariants
/// - `Unset` only describes a store that has not been initialized yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SchemaVersion {
    /// Store has no layout yet.
    Unset,
    /// Store carries the given layout version.
    Version(u32),
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("unset"),
            Self::Version(value) => write!(f, "{value}"),
        }
    }
}
