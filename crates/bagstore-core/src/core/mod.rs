// crates/bagstore-core/src/core/mod.rs
// ============================================================================
// Module: Bagstore Core Types
// Description: Canonical message, topic, replay, and metadata structures.
// Purpose: Provide stable, serializable types shared by storage engines and tools.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types describe what a message log contains and how it is replayed.
//! They carry no storage-engine details; engines map them onto their own
//! layouts.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod message;
pub mod metadata;
pub mod options;
pub mod replay;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use message::SerializedMessage;
pub use message::TopicInformation;
pub use message::TopicMetadata;
pub use metadata::BagMetadata;
pub use metadata::SchemaVersion;
pub use options::DEFAULT_BUSY_TIMEOUT_MS;
pub use options::DEFAULT_RECORDED_BY;
pub use options::DEFAULT_STORAGE_ID;
pub use options::IoFlag;
pub use options::PresetProfile;
pub use options::StorageOptions;
pub use options::TransactionMode;
pub use replay::ReadOrder;
pub use replay::ReadOrderSortBy;
pub use replay::StorageFilter;
