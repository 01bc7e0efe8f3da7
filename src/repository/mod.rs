//! Repository layer for database persistence.
//!
//! All job-state writes go through atomic conditional updates inside
//! `BEGIN IMMEDIATE` transactions; partial unique indexes back the
//! single-open-job and single-ownership invariants.

mod job;
mod post;

pub use job::{JobRepository, RegisterOutcome};
pub use post::{parse_identifier_path, PendingIdentifier, PostRepository};

use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a rusqlite Result<T> to Result<Option<T>>, treating QueryReturnedNoRows as None.
pub fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already registered in another active job")]
    Duplicate,
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Whether an error is a unique-constraint violation from a partial index.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Create a database connection with optimized settings for concurrency.
pub fn connect(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // WAL mode allows multiple readers alongside the single writer.
    // WAL mode persists, so this is effectively a one-time setting per database.
    conn.execute_batch(&format!(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = {};

        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
    "#,
        busy_timeout.as_millis()
    ))?;

    Ok(conn)
}

/// Run a closure inside a `BEGIN IMMEDIATE` transaction.
///
/// The immediate lock serializes writers up front; the closure's writes
/// commit together or roll back together.
pub fn immediate_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Execute a database operation with retry logic for lock errors.
/// Retries up to 5 times with exponential backoff (100ms, 200ms, 400ms, 800ms, 1600ms).
pub fn with_retry<T, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_retries = 5;
    let mut delay_ms = 100;

    for attempt in 0..max_retries {
        match operation() {
            Ok(result) => return Ok(result),
            Err(RepositoryError::Database(ref e)) => {
                let is_lock_error = e.to_string().contains("database is locked")
                    || e.to_string().contains("SQLITE_BUSY")
                    || e.to_string().contains("SQLITE_LOCKED");

                if is_lock_error && attempt < max_retries - 1 {
                    tracing::debug!(
                        "Database locked, retrying in {}ms (attempt {}/{})",
                        delay_ms,
                        attempt + 1,
                        max_retries
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                    continue;
                }
                return Err(RepositoryError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(
                        e.sqlite_error_code()
                            .unwrap_or(rusqlite::ffi::ErrorCode::Unknown)
                            as i32,
                    ),
                    Some(e.to_string()),
                )));
            }
            Err(e) => return Err(e),
        }
    }

    operation()
}
