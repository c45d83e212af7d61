use std::path::PathBuf;

use thiserror::Error;

use crate::migration::Direction;

/// Core error type for dbman operations.
#[derive(Error, Debug)]
pub enum DbmanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read migrations from {}", path.display())]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed migration name '{0}': expected <unix-timestamp>-<description>")]
    MalformedUnitName(String),

    #[error("Script for migration '{unit}' not found at {}", path.display())]
    ScriptNotFound { unit: String, path: PathBuf },

    #[error("Migration '{0}' not found")]
    UnitNotFound(String),

    #[error("Migration '{0}' is not pending")]
    NotPending(String),

    #[error("Migration '{0}' is not applied")]
    NotApplied(String),

    #[error("Migration ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Migration '{unit}' failed during {direction}")]
    MigrationExecutionFailed {
        unit: String,
        direction: Direction,
        #[source]
        cause: Box<DbmanError>,
    },

    /// Run-all stopped at a failing unit; `applied` were committed first.
    #[error("Run halted after applying {} migration(s)", applied.len())]
    RunHalted {
        applied: Vec<String>,
        #[source]
        cause: Box<DbmanError>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("SQL error")]
    Sql(#[from] sqlx::Error),
}

impl DbmanError {
    /// Wrap a failure raised inside a unit's transaction.
    pub fn execution_failed(unit: impl Into<String>, direction: Direction, cause: DbmanError) -> Self {
        DbmanError::MigrationExecutionFailed {
            unit: unit.into(),
            direction,
            cause: Box::new(cause),
        }
    }

    /// The ledger table does not exist yet.
    pub fn ledger_missing(table: &str) -> Self {
        DbmanError::LedgerUnavailable(format!(
            "table \"{}\" does not exist (run `dbman init` to provision it)",
            table
        ))
    }

    /// Name of the unit a failure is attached to, if any.
    pub fn unit_name(&self) -> Option<&str> {
        match self {
            DbmanError::RunHalted { cause, .. } => cause.unit_name(),
            DbmanError::MigrationExecutionFailed { unit, .. } => Some(unit),
            DbmanError::ScriptNotFound { unit, .. } => Some(unit),
            DbmanError::MalformedUnitName(name)
            | DbmanError::UnitNotFound(name)
            | DbmanError::NotPending(name)
            | DbmanError::NotApplied(name) => Some(name),
            _ => None,
        }
    }
}

/// Result type alias using DbmanError.
pub type Result<T> = std::result::Result<T, DbmanError>;
