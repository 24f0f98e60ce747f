// crates/bagstore-core/src/core/message.rs
// ============================================================================
// Module: Bagstore Messages and Topics
// Description: Serialized message records and topic descriptions.
// Purpose: Define the units written to and replayed from a message log.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A message log stores opaque payloads tagged with a topic name and a
//! nanosecond timestamp. Topics describe the payload type and serialization
//! format so that readers can decode what they replay; the log itself never
//! inspects payload bytes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// A single recorded message.
///
/// # Invariants
/// - `serialized_data` is opaque and never interpreted by storage engines.
/// - `time_stamp` is signed nanoseconds; negative values are legal.
/// - Writers borrow messages; a message is not mutated once handed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMessage {
    /// Name of the topic the message was recorded on.
    pub topic_name: String,
    /// Opaque payload bytes.
    pub serialized_data: Vec<u8>,
    /// Receive timestamp in nanoseconds.
    pub time_stamp: i64,
}

impl SerializedMessage {
    /// Builds a message for the given topic, payload, and timestamp.
    #[must_use]
    pub fn new(topic_name: impl Into<String>, serialized_data: Vec<u8>, time_stamp: i64) -> Self {
        Self {
            topic_name: topic_name.into(),
            serialized_data,
            time_stamp,
        }
    }
}

// ============================================================================
// SECTION: Topics
// ============================================================================

/// Description of a topic stored in a message log.
///
/// # Invariants
/// - `name` is unique within a store.
/// - `offered_qos_profiles` and `type_description_hash` are opaque text and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicMetadata {
    /// Topic name.
    pub name: String,
    /// Payload type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Payload serialization format identifier.
    pub serialization_format: String,
    /// Serialized quality-of-service profiles offered by publishers.
    #[serde(default)]
    pub offered_qos_profiles: String,
    /// Hash of the payload type description.
    #[serde(default)]
    pub type_description_hash: String,
}

impl TopicMetadata {
    /// Builds topic metadata with empty QoS and type description hash.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        serialization_format: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            serialization_format: serialization_format.into(),
            offered_qos_profiles: String::new(),
            type_description_hash: String::new(),
        }
    }
}

/// Topic description paired with the number of messages recorded on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInformation {
    /// Topic description.
    pub topic_metadata: TopicMetadata,
    /// Number of messages stored for the topic.
    pub message_count: u64,
}
