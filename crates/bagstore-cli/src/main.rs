// crates/bagstore-cli/src/main.rs
// ============================================================================
// Module: Bagstore CLI Entry Point
// Description: Command dispatcher for inspecting and replaying message stores.
// Purpose: Provide operator commands over the SQLite storage engine.
// Dependencies: bagstore-core, bagstore-store-sqlite, clap, serde, tracing.
// ============================================================================

//! ## Overview
//! The `bagstore` CLI opens stores read-only and reports on them:
//! - `info` prints bag metadata and the layout version.
//! - `topics` lists topics with their message counts.
//! - `cat` replays messages with topic filters, seek, and read order.
//!
//! Storage options may be loaded from a TOML file; the positional store path
//! always overrides its `uri`. Logs go to stderr so stdout stays parseable.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use bagstore_core::BagMetadata;
use bagstore_core::ReadOnlyStorage;
use bagstore_core::ReadOrder;
use bagstore_core::ReadOrderSortBy;
use bagstore_core::SchemaVersion;
use bagstore_core::StorageError;
use bagstore_core::StorageFilter;
use bagstore_core::StorageOptions;
use bagstore_core::TopicInformation;
use bagstore_store_sqlite::open_read_only;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a storage options file.
const MAX_OPTIONS_BYTES: usize = 1024 * 1024;
/// Log filter used when neither `--log` nor `--verbose` is given.
const DEFAULT_LOG_FILTER: &str = "warn";
/// Log filter used with `--verbose`.
const VERBOSE_LOG_FILTER: &str = "bagstore=debug,bagstore_store_sqlite=debug";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "bagstore", version, disable_help_subcommand = true)]
struct Cli {
    /// Log filter directives (for example `bagstore_store_sqlite=debug`).
    #[arg(long, value_name = "FILTER", global = true)]
    log: Option<String>,
    /// Enable debug logging for bagstore crates.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print bag metadata.
    Info(InfoCommand),
    /// List topics with message counts.
    Topics(TopicsCommand),
    /// Replay messages.
    Cat(CatCommand),
}

/// Store location shared by every command.
#[derive(Args, Debug, Clone)]
struct StoreLocation {
    /// Path of the store file.
    #[arg(value_name = "STORE")]
    uri: PathBuf,
    /// TOML file with storage options.
    #[arg(long, value_name = "PATH")]
    options: Option<PathBuf>,
}

/// Output format selector.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON (one document, or one line per message for `cat`).
    Json,
}

/// Arguments for `info`.
#[derive(Args, Debug)]
struct InfoCommand {
    /// Store to inspect.
    #[command(flatten)]
    location: StoreLocation,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Arguments for `topics`.
#[derive(Args, Debug)]
struct TopicsCommand {
    /// Store to inspect.
    #[command(flatten)]
    location: StoreLocation,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Arguments for `cat`.
#[derive(Args, Debug)]
struct CatCommand {
    /// Store to replay.
    #[command(flatten)]
    location: StoreLocation,
    /// Replay only these topics (repeatable).
    #[arg(long = "topic", value_name = "NAME")]
    topics: Vec<String>,
    /// Replay only topics whose whole name matches this pattern.
    #[arg(long, value_name = "REGEX")]
    include_regex: Option<String>,
    /// Skip topics whose whole name matches this pattern.
    #[arg(long, value_name = "REGEX")]
    exclude_regex: Option<String>,
    /// Start at this timestamp (nanoseconds).
    #[arg(long, value_name = "NS", allow_negative_numbers = true)]
    start: Option<i64>,
    /// Replay newest first.
    #[arg(long)]
    reverse: bool,
    /// Replay in insertion order instead of timestamp order.
    #[arg(long)]
    file_order: bool,
    /// Stop after this many messages.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// Document printed by `info --format json`.
#[derive(Debug, Serialize)]
struct InfoOutput {
    /// Aggregated bag metadata.
    metadata: BagMetadata,
    /// Layout version of the store file.
    schema_version: SchemaVersion,
}

/// Line printed per message by `cat --format json`.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct CatLine<'a> {
    /// Topic name.
    topic: &'a str,
    /// Receive timestamp in nanoseconds.
    time_stamp: i64,
    /// Payload size in bytes.
    size: usize,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for operator-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }

    /// Wraps a storage failure with the store path.
    fn storage(path: &Path, err: &StorageError) -> Self {
        Self::new(format!("{}: {err}", path.display()))
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Errors returned by bounded file reads.
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log.as_deref());
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(command: Commands) -> CliResult<ExitCode> {
    match command {
        Commands::Info(command) => command_info(&command),
        Commands::Topics(command) => command_topics(&command),
        Commands::Cat(command) => command_cat(&command),
    }
}

/// Installs the stderr log subscriber.
fn init_logging(verbose: bool, directives: Option<&str>) {
    let filter = match directives {
        Some(directives) => EnvFilter::new(directives),
        None if verbose => EnvFilter::new(VERBOSE_LOG_FILTER),
        None => EnvFilter::new(DEFAULT_LOG_FILTER),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `info`.
fn command_info(command: &InfoCommand) -> CliResult<ExitCode> {
    let storage = open_store(&command.location)?;
    let uri = &command.location.uri;
    let output = InfoOutput {
        metadata: storage.get_metadata().map_err(|err| CliError::storage(uri, &err))?,
        schema_version: storage
            .get_db_schema_version()
            .map_err(|err| CliError::storage(uri, &err))?,
    };
    match command.format {
        OutputFormat::Json => write_json_line(&output)?,
        OutputFormat::Text => write_stdout_text(&render_info_text(&output))?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `topics`.
fn command_topics(command: &TopicsCommand) -> CliResult<ExitCode> {
    let storage = open_store(&command.location)?;
    let metadata =
        storage.get_metadata().map_err(|err| CliError::storage(&command.location.uri, &err))?;
    match command.format {
        OutputFormat::Json => write_json_line(&metadata.topics_with_message_count)?,
        OutputFormat::Text => {
            write_stdout_text(&render_topics_text(&metadata.topics_with_message_count))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `cat`.
fn command_cat(command: &CatCommand) -> CliResult<ExitCode> {
    let uri = &command.location.uri;
    let mut storage = open_store(&command.location)?;
    storage.set_filter(cat_filter(command));
    let sort_by =
        if command.file_order { ReadOrderSortBy::File } else { ReadOrderSortBy::ReceivedTimestamp };
    storage.set_read_order(ReadOrder::new(sort_by, command.reverse));
    if let Some(start) = command.start {
        storage.seek(start);
    }
    let limit = command.limit.unwrap_or(usize::MAX);
    let mut stdout = std::io::stdout().lock();
    let mut printed = 0_usize;
    while printed < limit && storage.has_next().map_err(|err| CliError::storage(uri, &err))? {
        let message = storage.read_next().map_err(|err| CliError::storage(uri, &err))?;
        let line = CatLine {
            topic: &message.topic_name,
            time_stamp: message.time_stamp,
            size: message.serialized_data.len(),
        };
        let rendered = match command.format {
            OutputFormat::Json => render_json_line(&line)?,
            OutputFormat::Text => render_cat_text(&line),
        };
        writeln!(stdout, "{rendered}").map_err(|err| output_error("stdout", &err))?;
        printed += 1;
    }
    debug!(printed, "replay finished");
    Ok(ExitCode::SUCCESS)
}

/// Builds the replay filter from `cat` arguments.
fn cat_filter(command: &CatCommand) -> StorageFilter {
    StorageFilter {
        topics: command.topics.clone(),
        topics_regex: command.include_regex.clone().unwrap_or_default(),
        topics_regex_to_exclude: command.exclude_regex.clone().unwrap_or_default(),
    }
}

// ============================================================================
// SECTION: Store Access
// ============================================================================

/// Opens the store read-only with options resolved from the command line.
fn open_store(location: &StoreLocation) -> CliResult<Box<dyn ReadOnlyStorage>> {
    let options = load_options(location)?;
    debug!(uri = %options.uri.display(), "opening store");
    open_read_only(&options).map_err(|err| CliError::storage(&location.uri, &err))
}

/// Resolves storage options; the positional store path overrides any `uri` in the file.
fn load_options(location: &StoreLocation) -> CliResult<StorageOptions> {
    let Some(path) = &location.options else {
        return Ok(StorageOptions::new(&location.uri));
    };
    let bytes = read_bytes_with_limit(path, MAX_OPTIONS_BYTES).map_err(|err| match err {
        ReadLimitError::Io(err) => {
            CliError::new(format!("failed to read options {}: {err}", path.display()))
        }
        ReadLimitError::TooLarge {
            size,
            limit,
        } => CliError::new(format!(
            "options file {} is {size} bytes; limit is {limit} bytes",
            path.display()
        )),
    })?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| CliError::new(format!("options file {} must be utf-8", path.display())))?;
    let mut table: toml::Table = toml::from_str(text)
        .map_err(|err| CliError::new(format!("invalid options {}: {err}", path.display())))?;
    table.insert("uri".to_string(), toml::Value::String(location.uri.display().to_string()));
    toml::Value::Table(table)
        .try_into()
        .map_err(|err| CliError::new(format!("invalid options {}: {err}", path.display())))
}

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders `info` output as aligned text.
fn render_info_text(output: &InfoOutput) -> String {
    let metadata = &output.metadata;
    let mut text = String::new();
    let mut field = |label: &str, value: String| {
        let _ = writeln!(text, "{label:<19}{value}");
    };
    field("Files:", metadata.relative_file_paths.join(", "));
    field("Bag size:", format!("{} B", metadata.bag_size));
    field("Storage id:", metadata.storage_identifier.clone());
    field("Schema version:", output.schema_version.to_string());
    field("Recorded by:", metadata.recorded_by.clone());
    field("Duration:", format_nanos(metadata.duration_ns));
    field("Start:", format!("{} ns", metadata.starting_time_ns));
    field("Messages:", metadata.message_count.to_string());
    if !metadata.compression_format.is_empty() {
        field(
            "Compression:",
            format!("{} ({})", metadata.compression_format, metadata.compression_mode),
        );
    }
    text.push_str("Topic information:\n");
    text.push_str(&render_topics_text(&metadata.topics_with_message_count));
    text
}

/// Renders one topic per line.
fn render_topics_text(topics: &[TopicInformation]) -> String {
    topics
        .iter()
        .map(|info| {
            format!(
                "  Topic: {} | Type: {} | Count: {} | Serialization Format: {}\n",
                info.topic_metadata.name,
                info.topic_metadata.type_name,
                info.message_count,
                info.topic_metadata.serialization_format
            )
        })
        .collect()
}

/// Renders one replayed message.
fn render_cat_text(line: &CatLine<'_>) -> String {
    format!("{} {} {} B", line.time_stamp, line.topic, line.size)
}

/// Formats a nanosecond span as seconds.
fn format_nanos(nanos: i64) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let magnitude = nanos.unsigned_abs();
    format!("{sign}{}.{:09} s", magnitude / 1_000_000_000, magnitude % 1_000_000_000)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes text to stdout as-is.
fn write_stdout_text(text: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes()).map_err(|err| output_error("stdout", &err))
}

/// Encodes a value as a single line of JSON.
fn render_json_line<T: Serialize>(value: &T) -> CliResult<String> {
    serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))
}

/// Writes a value as one line of JSON to stdout.
fn write_json_line<T: Serialize>(value: &T) -> CliResult<()> {
    let text = render_json_line(value)?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{text}").map_err(|err| output_error("stdout", &err))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Builds the error for a failed write to an output stream.
fn output_error(stream: &str, error: &std::io::Error) -> CliError {
    CliError::new(format!("failed to write to {stream}: {error}"))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
