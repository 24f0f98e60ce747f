// crates/bagstore-core/src/core/options.rs
// ============================================================================
// Module: Bagstore Storage Options
// Description: Open-time options, open modes, and preset profiles.
// Purpose: Describe how a store is located, opened, and tuned.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Storage options are supplied once per open. They are deserializable so
//! hosts can load them from configuration files; every field except `uri`
//! has a default.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::StorageError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Storage identifier of the default engine.
pub const DEFAULT_STORAGE_ID: &str = "sqlite3";
/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Tool identifier recorded into new stores when none is configured.
pub const DEFAULT_RECORDED_BY: &str = concat!("bagstore/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// SECTION: Open Mode
// ============================================================================

/// Mode a store is opened in.
///
/// # Invariants
/// - `ReadWrite` creates a new store; the target file must not exist.
/// - `ReadOnly` and `Append` open an existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoFlag {
    /// Replay an existing store.
    ReadOnly,
    /// Record into a new store.
    ReadWrite,
    /// Record into and replay an existing store.
    Append,
}

impl IoFlag {
    /// Returns true when the mode permits writes.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Append)
    }

    /// Returns a stable label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for IoFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

/// When writes become durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Commit at the end of every write call.
    #[default]
    AutoCommit,
    /// Keep the transaction open until an explicit flush or close.
    Batched,
}

// ============================================================================
// SECTION: Preset Profiles
// ============================================================================

/// Durability/throughput trade-off selected at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresetProfile {
    /// Prefer crash safety over write throughput.
    Resilient,
    /// Prefer write throughput.
    #[default]
    WriteOptimized,
}

impl PresetProfile {
    /// Parses a preset profile label.
    ///
    /// Accepts `resilient` and `write_optimized`; `none` and the empty string
    /// select [`PresetProfile::WriteOptimized`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPreset`] for any other label.
    pub fn parse(label: &str) -> Result<Self, StorageError> {
        match label {
            "resilient" => Ok(Self::Resilient),
            "write_optimized" | "none" | "" => Ok(Self::WriteOptimized),
            other => Err(StorageError::InvalidPreset(format!(
                "{other} (expected one of: resilient, write_optimized, none)"
            ))),
        }
    }

    /// Returns the canonical label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Resilient => "resilient",
            Self::WriteOptimized => "write_optimized",
        }
    }
}

impl FromStr for PresetProfile {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

// ============================================================================
// SECTION: Options
// ============================================================================

/// Options used to open a store.
///
/// # Invariants
/// - `uri` names the store file; for `ReadWrite` opens the engine may append its extension.
/// - `storage_preset_profile` is parsed at open time, not at deserialization.
/// - `max_bagfile_size` of zero means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Store location.
    pub uri: PathBuf,
    /// Storage engine identifier.
    #[serde(default = "default_storage_id")]
    pub storage_id: String,
    /// Preset profile label.
    #[serde(default)]
    pub storage_preset_profile: String,
    /// Optional engine configuration file.
    #[serde(default)]
    pub storage_config_uri: Option<PathBuf>,
    /// Split threshold in bytes; zero disables splitting.
    #[serde(default)]
    pub max_bagfile_size: u64,
    /// Transaction policy for writes.
    #[serde(default)]
    pub transaction_mode: TransactionMode,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Tool identifier written into new stores.
    #[serde(default = "default_recorded_by")]
    pub recorded_by: String,
    /// Engine settings applied after the preset, keyed by setting name.
    #[serde(default)]
    pub custom_settings: BTreeMap<String, String>,
}

impl StorageOptions {
    /// Builds options for the given location with every other field defaulted.
    #[must_use]
    pub fn new(uri: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            storage_id: default_storage_id(),
            storage_preset_profile: String::new(),
            storage_config_uri: None,
            max_bagfile_size: 0,
            transaction_mode: TransactionMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            recorded_by: default_recorded_by(),
            custom_settings: BTreeMap::new(),
        }
    }
}

/// Returns the default storage identifier.
fn default_storage_id() -> String {
    DEFAULT_STORAGE_ID.to_string()
}

/// Returns the default busy timeout for store connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default recording tool identifier.
fn default_recorded_by() -> String {
    DEFAULT_RECORDED_BY.to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::IoFlag;
    use super::PresetProfile;
    use crate::interfaces::StorageError;

    #[test]
    fn preset_aliases_select_write_optimized() {
        for label in ["none", "", "write_optimized"] {
            assert_eq!(PresetProfile::parse(label).ok(), Some(PresetProfile::WriteOptimized));
        }
        assert_eq!(PresetProfile::parse("resilient").ok(), Some(PresetProfile::Resilient));
    }

    #[test]
    fn preset_rejects_unknown_labels() {
        for label in ["Resilient", "fast", " none"] {
            assert!(matches!(PresetProfile::parse(label), Err(StorageError::InvalidPreset(_))));
        }
    }

    #[test]
    fn only_recording_modes_are_writable() {
        assert!(!IoFlag::ReadOnly.is_writable());
        assert!(IoFlag::ReadWrite.is_writable());
        assert!(IoFlag::Append.is_writable());
    }
}
