// crates/bagstore-store-sqlite/src/lib.rs
// ============================================================================
// Module: Bagstore SQLite Store Library
// Description: SQLite storage engine for recorded message logs.
// Purpose: Record and replay serialized messages in a single SQLite file.
// Dependencies: bagstore-core, regex, rusqlite, serde, tracing
// ============================================================================

//! ## Overview
//! The `sqlite3` storage engine keeps one store per file: a `topics` table, a
//! `messages` table indexed by timestamp, and `schema`/`metadata` tables that
//! carry the layout version, the recording tool, and bag-level metadata.
//! Invariants:
//! - Every write call is atomic; a failed call leaves no rows behind.
//! - Replay order is total on `(timestamp, row id)`.
//! - Layouts newer than [`CURRENT_SCHEMA_VERSION`] are refused; older layouts
//!   are migrated on writable opens and read as found otherwise.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod reader;
pub mod schema;
pub mod store;
pub mod wrapper;
pub mod writer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::FILE_EXTENSION;
pub use config::MIN_SPLIT_FILE_SIZE;
pub use config::PragmaEntry;
pub use config::PragmaSet;
pub use config::SqliteSyncMode;
pub use reader::DEFAULT_PAGE_SIZE;
pub use reader::SeekPosition;
pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::SqliteReader;
pub use store::SqliteStorage;
pub use store::open_read_only;
pub use store::open_read_write;
pub use writer::WriteStats;
