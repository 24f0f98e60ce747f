// crates/bagstore-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Store Configuration
// Description: Preset pragmas, storage config files, and store path rules.
// Purpose: Turn storage options into a validated path and pragma set.
// Dependencies: bagstore-core, serde, serde_yaml, toml, tracing
// ============================================================================

//! ## Overview
//! Opening a store resolves three inputs into one ordered [`PragmaSet`]: the
//! preset profile (writable opens only), the optional storage config file,
//! and the per-open `custom_settings`. Later sources replace earlier entries
//! with the same pragma name. Every entry is screened for quote and statement
//! separator characters before it reaches the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use bagstore_core::DEFAULT_STORAGE_ID;
use bagstore_core::IoFlag;
use bagstore_core::PresetProfile;
use bagstore_core::StorageError;
use bagstore_core::StorageOptions;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File extension given to stores created in `ReadWrite` mode.
pub const FILE_EXTENSION: &str = "db3";
/// Smallest file size a store can be split at (84 KiB).
pub const MIN_SPLIT_FILE_SIZE: u64 = 86_016;
/// Maximum storage config file size accepted.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Characters never allowed in a pragma entry.
const FORBIDDEN_PRAGMA_CHARACTERS: [char; 3] = ['\'', ';', '"'];

// ============================================================================
// SECTION: Presets
// ============================================================================

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }

    /// Returns the sync mode a preset profile selects.
    #[must_use]
    pub const fn for_preset(preset: PresetProfile) -> Self {
        match preset {
            PresetProfile::Resilient => Self::Full,
            PresetProfile::WriteOptimized => Self::Normal,
        }
    }
}

/// Journal mode applied by every writable preset.
const PRESET_JOURNAL_MODE: &str = "WAL";

// ============================================================================
// SECTION: Pragma Set
// ============================================================================

/// A single pragma keyed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaEntry {
    /// Pragma name, e.g. `journal_mode`.
    pub name: String,
    /// Complete statement, e.g. `PRAGMA journal_mode=WAL;`.
    pub statement: String,
}

/// Ordered pragmas applied when a connection opens.
///
/// # Invariants
/// - Names are unique; replacing an entry keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PragmaSet {
    /// Entries in application order.
    entries: Vec<PragmaEntry>,
}

impl PragmaSet {
    /// Inserts an entry or replaces the statement of an entry with the same name.
    pub fn upsert(&mut self, entry: PragmaEntry) {
        match self.entries.iter_mut().find(|existing| existing.name == entry.name) {
            Some(existing) => existing.statement = entry.statement,
            None => self.entries.push(entry),
        }
    }

    /// Returns the statement stored for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.statement.as_str())
    }

    /// Returns entries in application order.
    pub fn iter(&self) -> impl Iterator<Item = &PragmaEntry> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no pragma is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns the pragmas a preset applies to writable opens.
#[must_use]
pub fn preset_pragmas(preset: PresetProfile) -> [PragmaEntry; 2] {
    [
        PragmaEntry {
            name: "journal_mode".to_string(),
            statement: format!("PRAGMA journal_mode={PRESET_JOURNAL_MODE};"),
        },
        PragmaEntry {
            name: "synchronous".to_string(),
            statement: format!(
                "PRAGMA synchronous={};",
                SqliteSyncMode::for_preset(preset).pragma_value()
            ),
        },
    ]
}

/// Parses one pragma entry from a storage config file.
///
/// Returns `None` for an empty entry. The pragma name is the text before the
/// first `=`, or before the first `(` when there is no `=`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidConfig`] when the entry contains a quote or
/// `;`, starts with `=` or `(`, or has an invalid pragma name.
pub fn parse_pragma_entry(entry: &str) -> Result<Option<PragmaEntry>, StorageError> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Ok(None);
    }
    ensure_no_forbidden_characters(entry)?;
    let split_at = entry.find('=').or_else(|| entry.find('('));
    let name = match split_at {
        Some(0) => {
            return Err(StorageError::InvalidConfig(format!(
                "incorrect storage setting syntax: {entry}"
            )));
        }
        Some(index) => entry[.. index].trim(),
        None => entry,
    };
    if !is_pragma_identifier(name) {
        return Err(StorageError::InvalidConfig(format!(
            "invalid storage setting name in: {entry}"
        )));
    }
    Ok(Some(PragmaEntry {
        name: name.to_string(),
        statement: format!("PRAGMA {entry};"),
    }))
}

/// Builds the pragma entry for a `custom_settings` key/value pair.
///
/// # Errors
///
/// Returns [`StorageError::InvalidConfig`] for an invalid key, or a value that
/// is empty or not a single word or number.
pub fn custom_setting_entry(key: &str, value: &str) -> Result<PragmaEntry, StorageError> {
    if !is_pragma_identifier(key) {
        return Err(StorageError::InvalidConfig(format!("invalid storage setting name: {key}")));
    }
    let value = value.trim();
    if value.is_empty() {
        return Err(StorageError::InvalidConfig(format!("storage setting {key} has no value")));
    }
    if !is_setting_token(value) {
        return Err(StorageError::InvalidConfig(format!(
            "storage setting {key} value {value} must be a single word or number"
        )));
    }
    Ok(PragmaEntry {
        name: key.to_string(),
        statement: format!("PRAGMA {key}={value};"),
    })
}

/// Returns true for `name` or `schema.name` made of ASCII word characters.
#[must_use]
pub fn is_pragma_identifier(key: &str) -> bool {
    let mut parts = key.split('.');
    let valid_part =
        |part: &str| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => valid_part(name),
        (Some(schema), Some(name), None) => valid_part(schema) && valid_part(name),
        _ => false,
    }
}

/// Returns true for a word or signed number such as `FULL`, `-4000`, or `1.5`.
fn is_setting_token(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.')
}

/// Rejects text containing quotes or statement separators.
fn ensure_no_forbidden_characters(text: &str) -> Result<(), StorageError> {
    match text.chars().find(|ch| FORBIDDEN_PRAGMA_CHARACTERS.contains(ch)) {
        Some(found) => Err(StorageError::InvalidConfig(format!(
            "invalid character {found} in storage setting {text}; avoid ', ; and \""
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// SECTION: Storage Config File
// ============================================================================

/// Storage config file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageConfigFile {
    /// Pragmas applied to read-only opens.
    #[serde(default)]
    read: PragmaSection,
    /// Pragmas applied to writable opens.
    #[serde(default)]
    write: PragmaSection,
}

/// Pragma list for one open mode.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PragmaSection {
    /// Raw pragma entries.
    #[serde(default)]
    pragmas: Vec<String>,
}

/// Loads the pragma entries for `io_flag` from a YAML or TOML storage config file.
///
/// Files with a `.toml` extension are parsed as TOML; anything else as YAML.
///
/// # Errors
///
/// Returns [`StorageError::Io`] when the file cannot be read, or
/// [`StorageError::InvalidConfig`] when it is oversized, malformed, or holds
/// an unsafe entry.
pub fn load_storage_config(path: &Path, io_flag: IoFlag) -> Result<PragmaSet, StorageError> {
    let bytes = fs::read(path).map_err(|err| {
        StorageError::Io(format!("failed to read storage config {}: {err}", path.display()))
    })?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(StorageError::InvalidConfig("storage config file exceeds size limit".to_string()));
    }
    let content = std::str::from_utf8(&bytes)
        .map_err(|_| StorageError::InvalidConfig("storage config file must be utf-8".to_string()))?;
    let is_toml = path.extension().is_some_and(|extension| extension == "toml");
    let file: StorageConfigFile = if is_toml {
        toml::from_str(content).map_err(|err| StorageError::InvalidConfig(err.to_string()))?
    } else if content.trim().is_empty() {
        StorageConfigFile::default()
    } else {
        serde_yaml::from_str(content).map_err(|err| StorageError::InvalidConfig(err.to_string()))?
    };
    let section = match io_flag {
        IoFlag::ReadOnly => file.read,
        IoFlag::ReadWrite | IoFlag::Append => file.write,
    };
    let mut pragmas = PragmaSet::default();
    for raw in &section.pragmas {
        if let Some(entry) = parse_pragma_entry(raw)? {
            pragmas.upsert(entry);
        }
    }
    Ok(pragmas)
}

/// Resolves the complete pragma set for an open.
///
/// Order: preset (writable opens only), then the storage config file, then
/// `custom_settings`; later sources replace same-named entries.
///
/// # Errors
///
/// Returns [`StorageError`] when the config file or a custom setting is invalid.
pub fn resolve_pragmas(
    options: &StorageOptions,
    io_flag: IoFlag,
    preset: PresetProfile,
) -> Result<PragmaSet, StorageError> {
    let mut pragmas = PragmaSet::default();
    if io_flag.is_writable() {
        for entry in preset_pragmas(preset) {
            pragmas.upsert(entry);
        }
    }
    if let Some(config_path) = &options.storage_config_uri {
        for entry in load_storage_config(config_path, io_flag)?.entries {
            pragmas.upsert(entry);
        }
    }
    for (key, value) in &options.custom_settings {
        pragmas.upsert(custom_setting_entry(key, value)?);
    }
    Ok(pragmas)
}

/// Validates option fields that do not depend on the filesystem.
///
/// # Errors
///
/// Returns [`StorageError::InvalidConfig`] for a foreign storage identifier or
/// a split size below [`MIN_SPLIT_FILE_SIZE`].
pub fn validate_options(options: &StorageOptions, io_flag: IoFlag) -> Result<(), StorageError> {
    if !options.storage_id.is_empty() && options.storage_id != DEFAULT_STORAGE_ID {
        return Err(StorageError::InvalidConfig(format!(
            "storage id {} is not handled by the {DEFAULT_STORAGE_ID} engine",
            options.storage_id
        )));
    }
    if io_flag.is_writable()
        && options.max_bagfile_size != 0
        && options.max_bagfile_size < MIN_SPLIT_FILE_SIZE
    {
        return Err(StorageError::InvalidConfig(format!(
            "max_bagfile_size {} is below the minimum split size {MIN_SPLIT_FILE_SIZE}",
            options.max_bagfile_size
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Paths
// ============================================================================

/// Resolves the store file for an open mode.
///
/// `ReadWrite` appends the `.db3` extension when missing, requires the file
/// not to exist, and creates missing parent directories. `ReadOnly` and
/// `Append` require an existing file.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPath`] when the path violates a limit or the
/// existence rule for the mode, or [`StorageError::Io`] when parent
/// directories cannot be created.
pub fn resolve_store_path(uri: &Path, io_flag: IoFlag) -> Result<PathBuf, StorageError> {
    validate_store_path(uri)?;
    match io_flag {
        IoFlag::ReadWrite => {
            let path = with_store_extension(uri);
            validate_store_path(&path)?;
            if path.exists() {
                return Err(StorageError::InvalidPath(format!(
                    "store file {} already exists",
                    path.display()
                )));
            }
            ensure_parent_dir(&path)?;
            Ok(path)
        }
        IoFlag::ReadOnly | IoFlag::Append => {
            if !uri.exists() {
                return Err(StorageError::InvalidPath(format!(
                    "store file {} does not exist",
                    uri.display()
                )));
            }
            Ok(uri.to_path_buf())
        }
    }
}

/// Removes a store file created by a failed open, with its journal side files.
pub fn remove_created_store(path: &Path) {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut raw = OsString::from(path.as_os_str());
        raw.push(suffix);
        targets.push(PathBuf::from(raw));
    }
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => debug!(path = %target.display(), "removed file of failed open"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %target.display(), error = %err, "failed to remove file of failed open");
            }
        }
    }
}

/// Returns the current size of a store file, or zero when it is missing.
#[must_use]
pub fn bagfile_size(path: &Path) -> u64 {
    fs::metadata(path).map(|metadata| metadata.len()).unwrap_or(0)
}

/// Appends the store extension unless the path already carries it.
fn with_store_extension(uri: &Path) -> PathBuf {
    if uri.extension().is_some_and(|extension| extension == FILE_EXTENSION) {
        return uri.to_path_buf();
    }
    let mut raw = OsString::from(uri.as_os_str());
    raw.push(".");
    raw.push(FILE_EXTENSION);
    PathBuf::from(raw)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    let Some(parent) = path.parent() else {
        return Err(StorageError::InvalidPath("store path missing parent directory".to_string()));
    };
    fs::create_dir_all(parent).map_err(|err| StorageError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), StorageError> {
    if path.as_os_str().is_empty() {
        return Err(StorageError::InvalidPath("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(StorageError::InvalidPath("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(StorageError::InvalidPath(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(StorageError::InvalidPath(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
