// crates/bagstore-store-sqlite/src/wrapper.rs
// ============================================================================
// Module: SQLite Connection Wrapper
// Description: Single-connection handle with typed statements and row iteration.
// Purpose: Isolate rusqlite specifics behind a small, error-mapped surface.
// Dependencies: bagstore-core, regex, rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`SqliteDatabase`] owns exactly one `SQLite` connection. Statements bind a
//! fixed set of value kinds ([`SqlValue`]) and yield typed row tuples through
//! a lazy, forward-only [`QueryResult`]. Engine failures surface as
//! [`StorageError::Query`]; failures that leave the connection unusable latch
//! a broken state so every later call fails fast with
//! [`StorageError::ConnectionBroken`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::OnceCell;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bagstore_core::IoFlag;
use bagstore_core::StorageError;
use regex::Regex;
use rusqlite::CachedStatement;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::Row;
use rusqlite::Rows;
use rusqlite::Statement;
use rusqlite::ToSql;
use rusqlite::functions::FunctionFlags;
use rusqlite::params_from_iter;
use rusqlite::types::FromSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use tracing::warn;

use crate::config::is_pragma_identifier;

// ============================================================================
// SECTION: Values
// ============================================================================

/// Value bound to a statement parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlValue<'a> {
    /// Binary payload.
    Blob(&'a [u8]),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(&'a str),
}

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        })
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Typed decoding of a result row.
pub trait FromRow: Sized {
    /// Decodes the row into `Self`.
    ///
    /// # Errors
    ///
    /// Returns the rusqlite error when a column is missing or has the wrong type.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Implements [`FromRow`] for a tuple of column types.
macro_rules! impl_from_row_for_tuple {
    ($($index:tt => $name:ident),+) => {
        impl<$($name: FromSql),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get::<usize, $name>($index)?,)+))
            }
        }
    };
}

impl_from_row_for_tuple!(0 => A);
impl_from_row_for_tuple!(0 => A, 1 => B);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C, 3 => D);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => G);
impl_from_row_for_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => G, 7 => H);

/// Lazy, forward-only, single-pass iterator over typed rows.
///
/// # Invariants
/// - Rows are decoded on demand; dropping the result stops the query.
pub struct QueryResult<'stmt, T> {
    /// Underlying row cursor.
    rows: Rows<'stmt>,
    /// Database used for error mapping.
    database: &'stmt SqliteDatabase,
    /// Row type marker.
    marker: PhantomData<T>,
}

impl<T: FromRow> Iterator for QueryResult<'_, T> {
    type Item = Result<T, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next() {
            Ok(Some(row)) => Some(T::from_row(row).map_err(|err| self.database.map_error(err))),
            Ok(None) => None,
            Err(err) => Some(Err(self.database.map_error(err))),
        }
    }
}

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Prepared statement storage.
enum StatementHandle<'conn> {
    /// Statement owned by the caller.
    Fresh(Statement<'conn>),
    /// Statement returned to the connection cache on drop.
    Cached(CachedStatement<'conn>),
}

impl<'conn> StatementHandle<'conn> {
    /// Returns the underlying statement.
    fn get_mut(&mut self) -> &mut Statement<'conn> {
        match self {
            Self::Fresh(statement) => statement,
            Self::Cached(statement) => &mut **statement,
        }
    }
}

/// Prepared statement bound to a [`SqliteDatabase`].
pub struct SqliteStatement<'conn> {
    /// Prepared statement.
    handle: StatementHandle<'conn>,
    /// Owning database.
    database: &'conn SqliteDatabase,
}

impl SqliteStatement<'_> {
    /// Executes the statement and returns the number of changed rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when binding or execution fails.
    pub fn execute(&mut self, params: &[SqlValue<'_>]) -> Result<usize, StorageError> {
        let database = self.database;
        self.try_execute(params).map_err(|err| database.map_error(err))
    }

    /// Executes the statement and returns the raw engine error on failure.
    ///
    /// # Errors
    ///
    /// Returns the rusqlite error unmapped so callers can classify it.
    pub fn try_execute(&mut self, params: &[SqlValue<'_>]) -> rusqlite::Result<usize> {
        self.handle.get_mut().execute(params_from_iter(params.iter()))
    }

    /// Runs the statement as a query yielding typed rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when binding or the first step fails.
    pub fn query<T: FromRow>(
        &mut self,
        params: &[SqlValue<'_>],
    ) -> Result<QueryResult<'_, T>, StorageError> {
        let database = self.database;
        let rows = self
            .handle
            .get_mut()
            .query(params_from_iter(params.iter()))
            .map_err(|err| database.map_error(err))?;
        Ok(QueryResult {
            rows,
            database,
            marker: PhantomData,
        })
    }
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// Owner of a single `SQLite` connection.
///
/// # Invariants
/// - Exactly one connection per instance; it is never shared across instances.
/// - Once broken, the instance rejects every call until dropped.
pub struct SqliteDatabase {
    /// Open connection.
    connection: Connection,
    /// Database file path.
    path: PathBuf,
    /// Mode the connection was opened in.
    io_flag: IoFlag,
    /// Diagnostic of the failure that made the connection unusable.
    broken: OnceCell<String>,
}

impl SqliteDatabase {
    /// Opens a connection for the given mode and registers SQL functions.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] when the connection cannot be opened or configured.
    pub fn open(path: &Path, io_flag: IoFlag, busy_timeout_ms: u64) -> Result<Self, StorageError> {
        let access = match io_flag {
            IoFlag::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            IoFlag::ReadWrite | IoFlag::Append => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let flags = access | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection =
            Connection::open_with_flags(path, flags).map_err(|err| StorageError::Query {
                message: format!("failed to open {}: {err}", path.display()),
            })?;
        connection.busy_timeout(Duration::from_millis(busy_timeout_ms)).map_err(|err| {
            StorageError::Query {
                message: err.to_string(),
            }
        })?;
        register_regexp(&connection).map_err(|err| StorageError::Query {
            message: err.to_string(),
        })?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
            io_flag,
            broken: OnceCell::new(),
        })
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the open mode.
    #[must_use]
    pub const fn io_flag(&self) -> IoFlag {
        self.io_flag
    }

    /// Fails fast when the connection has been marked broken.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConnectionBroken`] once a fatal engine error was seen.
    pub fn ensure_usable(&self) -> Result<(), StorageError> {
        match self.broken.get() {
            Some(message) => Err(StorageError::ConnectionBroken(message.clone())),
            None => Ok(()),
        }
    }

    /// Maps an engine error, latching the broken state for fatal codes.
    #[must_use]
    pub fn map_error(&self, err: rusqlite::Error) -> StorageError {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err
            && matches!(
                failure.code,
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt | ErrorCode::CannotOpen
            )
        {
            let message = err.to_string();
            if self.broken.set(message.clone()).is_ok() {
                warn!(path = %self.path.display(), error = %message, "sqlite connection marked broken");
            }
            return StorageError::ConnectionBroken(message);
        }
        StorageError::Query {
            message: err.to_string(),
        }
    }

    /// Prepares a statement owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the SQL does not compile.
    pub fn prepare(&self, sql: &str) -> Result<SqliteStatement<'_>, StorageError> {
        self.ensure_usable()?;
        let statement = self.connection.prepare(sql).map_err(|err| self.map_error(err))?;
        Ok(SqliteStatement {
            handle: StatementHandle::Fresh(statement),
            database: self,
        })
    }

    /// Prepares a statement through the connection's statement cache.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the SQL does not compile.
    pub fn prepare_cached(&self, sql: &str) -> Result<SqliteStatement<'_>, StorageError> {
        self.ensure_usable()?;
        let statement = self.connection.prepare_cached(sql).map_err(|err| self.map_error(err))?;
        Ok(SqliteStatement {
            handle: StatementHandle::Cached(statement),
            database: self,
        })
    }

    /// Runs one or more parameterless statements.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.ensure_usable()?;
        self.connection.execute_batch(sql).map_err(|err| self.map_error(err))
    }

    /// Runs `body` inside a named savepoint.
    ///
    /// Outside a transaction the savepoint opens one and releasing it commits;
    /// inside a transaction it nests. A failing body is rolled back to the
    /// savepoint and its error returned; when the engine already rolled back
    /// the enclosing transaction there is no savepoint left to roll back to.
    ///
    /// # Errors
    ///
    /// Returns the body's [`StorageError`], or the engine error when the
    /// savepoint cannot be opened or released.
    pub fn with_savepoint<T>(
        &self,
        name: &str,
        body: impl FnOnce(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.execute_batch(&format!("SAVEPOINT {name};"))?;
        match body(self) {
            Ok(value) => {
                self.execute_batch(&format!("RELEASE {name};"))?;
                Ok(value)
            }
            Err(err) => {
                if self.is_autocommit() {
                    warn!(savepoint = name, error = %err, "engine rolled back the whole transaction");
                } else if let Err(rollback) =
                    self.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
                {
                    warn!(savepoint = name, error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Runs a query and returns its first row, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    pub fn query_first<T: FromRow>(
        &self,
        sql: &str,
        params: &[SqlValue<'_>],
    ) -> Result<Option<T>, StorageError> {
        let mut statement = self.prepare_cached(sql)?;
        let mut rows = statement.query::<T>(params)?;
        rows.next().transpose()
    }

    /// Returns true when no transaction is open on the connection.
    ///
    /// The engine rolls back a whole transaction on some failures (for example
    /// a full disk), so callers tracking their own transaction flag resync it
    /// from here after an error.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.connection.is_autocommit()
    }

    /// Returns the row id of the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.connection.last_insert_rowid()
    }

    /// Returns true when the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the catalog query fails.
    pub fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let row = self.query_first::<(i64,)>(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[SqlValue::Text(table)],
        )?;
        Ok(row.is_some())
    }

    /// Returns true when the table has a column with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the catalog query fails.
    pub fn field_exists(&self, table: &str, field: &str) -> Result<bool, StorageError> {
        let row = self.query_first::<(i64,)>(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
            &[SqlValue::Text(table), SqlValue::Text(field)],
        )?;
        Ok(row.is_some())
    }

    /// Reads the current value of a pragma as text.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] when `key` is not a pragma name,
    /// or [`StorageError`] when the pragma query fails.
    pub fn query_pragma_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !is_pragma_identifier(key) {
            return Err(StorageError::InvalidConfig(format!("invalid storage setting name: {key}")));
        }
        let row = self.query_first::<(Value,)>(&format!("PRAGMA {key};"), &[])?;
        Ok(row.and_then(|(value,)| match value {
            Value::Null => None,
            Value::Integer(number) => Some(number.to_string()),
            Value::Real(number) => Some(number.to_string()),
            Value::Text(text) => Some(text),
            Value::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        }))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Boxed error accepted by rusqlite auxiliary data constructors.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Compiles a topic name pattern; patterns must match the whole name.
///
/// # Errors
///
/// Returns the regex error for an invalid pattern.
pub fn compile_topic_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// Registers `regexp(pattern, text)`, caching the compiled pattern per statement.
fn register_regexp(connection: &Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> =
                ctx.get_or_create_aux(0, |value| -> Result<Regex, BoxError> {
                    Ok(compile_topic_pattern(value.as_str()?)?)
                })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|err| rusqlite::Error::UserFunctionError(err.into()))?;
            Ok(pattern.is_match(text))
        },
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================
