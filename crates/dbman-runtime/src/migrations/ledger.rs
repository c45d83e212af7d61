//! The applied-set ledger.
//!
//! One row per applied unit. Mutations are only legal inside a transaction
//! opened by the engine, so a script and its ledger row commit together.

use std::collections::BTreeSet;

use tracing::debug;

use dbman_core::error::{DbmanError, Result};
use dbman_core::migration::LedgerEntry;

use crate::db::Session;

/// Ledger table accessor.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// The table name is interpolated into SQL, so it must be a plain
    /// identifier.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(DbmanError::Config(format!(
                "Invalid ledger table name: {:?}",
                table
            )));
        }
        Ok(Self { table })
    }

    /// Names of all applied units.
    ///
    /// Reads only the `name` column, so the id and timestamp types of a
    /// table provisioned elsewhere do not matter here.
    pub async fn list_applied<S: Session + ?Sized>(&self, session: &mut S) -> Result<BTreeSet<String>> {
        let names = session.select_ledger_names(&self.table).await?;
        debug!("Ledger {} holds {} names", self.table, names.len());
        Ok(names.into_iter().collect())
    }

    /// All ledger rows ordered by id.
    pub async fn list_entries<S: Session + ?Sized>(&self, session: &mut S) -> Result<Vec<LedgerEntry>> {
        let entries = session.select_ledger(&self.table).await?;
        debug!("Ledger {} holds {} entries", self.table, entries.len());
        Ok(entries)
    }

    /// Record a unit as applied.
    pub async fn record_applied<S: Session + ?Sized>(&self, session: &mut S, name: &str) -> Result<()> {
        self.require_transaction(session, "record_applied")?;
        session.insert_ledger(&self.table, name).await
    }

    /// Remove the record of an applied unit.
    pub async fn record_reverted<S: Session + ?Sized>(&self, session: &mut S, name: &str) -> Result<()> {
        self.require_transaction(session, "record_reverted")?;
        let removed = session.delete_ledger(&self.table, name).await?;
        if removed == 0 {
            return Err(DbmanError::NotApplied(name.to_string()));
        }
        Ok(())
    }

    /// Create the ledger table if it does not exist.
    pub async fn provision<S: Session + ?Sized>(&self, session: &mut S) -> Result<()> {
        session.create_ledger(&self.table).await
    }

    fn require_transaction<S: Session + ?Sized>(&self, session: &S, operation: &str) -> Result<()> {
        if session.in_transaction() {
            Ok(())
        } else {
            Err(DbmanError::PreconditionViolation(format!(
                "{} called outside a transaction",
                operation
            )))
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
