//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the database rejected the write because the row already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::DatabaseSqlx(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// Result of an insert into an append-only table.
///
/// Transient failures are reported through `Err`; a duplicate row is an
/// expected outcome under redelivery and is reported here instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row was inserted.
    Written,
    /// A row with the same key was already present.
    Duplicate,
}

impl WriteOutcome {
    /// Classify the result of an insert, folding unique violations into
    /// [`WriteOutcome::Duplicate`].
    pub fn classify<T>(result: std::result::Result<T, sqlx::Error>) -> Result<Self> {
        match result {
            Ok(_) => Ok(Self::Written),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(Self::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate)
    }
}
