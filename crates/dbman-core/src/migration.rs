//! Migration data model.
//!
//! A migration unit is a directory named `<unix-timestamp>-<description>`
//! holding a forward and a reverse SQL script. The ledger records which
//! units have been applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DbmanError, Result};

/// Which script of a unit to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the unit (forward script, ledger insert).
    Forward,
    /// Revert the unit (reverse script, ledger delete).
    Reverse,
}

impl Direction {
    pub fn verb(&self) -> &'static str {
        match self {
            Direction::Forward => "Applying",
            Direction::Reverse => "Reverting",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "migration"),
            Direction::Reverse => write!(f, "rollback"),
        }
    }
}

/// A migration unit loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    /// Directory name, e.g. `1700000000-create-users`.
    pub name: String,
    /// Forward script. May be empty.
    pub forward: String,
    /// Reverse script. May be empty.
    pub reverse: String,
}

impl MigrationUnit {
    /// Script text for the given direction.
    pub fn script(&self, direction: Direction) -> &str {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }
}

/// A row of the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Parse the numeric timestamp prefix of a unit name.
///
/// The prefix is everything before the first `-` (or the whole name when it
/// has none) and must be a non-empty run of ASCII digits.
pub fn unit_timestamp(name: &str) -> Result<u64> {
    let prefix = match name.split_once('-') {
        Some((prefix, _)) => prefix,
        None => name,
    };

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DbmanError::MalformedUnitName(name.to_string()));
    }

    prefix
        .parse::<u64>()
        .map_err(|_| DbmanError::MalformedUnitName(name.to_string()))
}

/// Build a unit name from a timestamp and a free-form description.
///
/// Runs of whitespace in the description become a single `-`.
pub fn unit_name(timestamp: i64, description: &str) -> Result<String> {
    let slug = description.split_whitespace().collect::<Vec<_>>().join("-");
    if slug.is_empty() {
        return Err(DbmanError::Config(
            "Migration description must not be empty".to_string(),
        ));
    }
    if slug.contains(['/', '\\']) {
        return Err(DbmanError::Config(format!(
            "Migration description must not contain path separators: {}",
            description
        )));
    }
    Ok(format!("{}-{}", timestamp, slug))
}
