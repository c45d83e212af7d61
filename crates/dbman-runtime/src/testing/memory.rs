//! In-memory session for engine tests.
//!
//! Keeps a committed state and, while a transaction is open, a staged copy
//! of it. Rolling back discards the staged copy, so tests can check that a
//! failed unit leaves no trace.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::BoxFuture;

use dbman_core::error::{DbmanError, Result};
use dbman_core::migration::LedgerEntry;

use crate::db::Session;

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<String, Vec<LedgerEntry>>,
    executed: Vec<String>,
    next_id: i64,
}

/// Session double with configurable failures.
#[derive(Debug, Default)]
pub struct MemorySession {
    committed: State,
    staged: Option<State>,
    failing_fragments: Vec<String>,
    fail_ledger_writes: bool,
    transactions_started: usize,
}

impl MemorySession {
    /// A session with no ledger table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose ledger table already exists.
    pub fn provisioned(table: &str) -> Self {
        let mut session = Self::new();
        session.committed.tables.insert(table.to_string(), Vec::new());
        session
    }

    /// Add a committed ledger row.
    pub fn seed_ledger(&mut self, table: &str, name: &str) {
        let state = &mut self.committed;
        state.next_id += 1;
        let entry = LedgerEntry {
            id: state.next_id,
            name: name.to_string(),
            applied_at: Utc::now(),
        };
        state.tables.entry(table.to_string()).or_default().push(entry);
    }

    /// Fail any script containing `fragment`.
    pub fn fail_on(&mut self, fragment: &str) {
        self.failing_fragments.push(fragment.to_string());
    }

    /// Fail every ledger insert and delete.
    pub fn fail_ledger_writes(&mut self) {
        self.fail_ledger_writes = true;
    }

    /// Committed scripts in execution order.
    pub fn executed(&self) -> &[String] {
        &self.committed.executed
    }

    /// Committed ledger names ordered by id.
    pub fn ledger_names(&self, table: &str) -> Vec<String> {
        self.committed
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|row| row.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of transactions opened so far.
    pub fn transactions_started(&self) -> usize {
        self.transactions_started
    }

    fn state(&mut self) -> &mut State {
        match self.staged {
            Some(ref mut staged) => staged,
            None => &mut self.committed,
        }
    }

    fn table(&mut self, table: &str) -> Result<&mut Vec<LedgerEntry>> {
        self.state()
            .tables
            .get_mut(table)
            .ok_or_else(|| DbmanError::Database(format!("relation \"{}\" does not exist", table)))
    }

    fn check_ledger_write(&self) -> Result<()> {
        if self.fail_ledger_writes {
            Err(DbmanError::Database("ledger write rejected".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Session for MemorySession {
    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.staged.is_some() {
                return Err(DbmanError::PreconditionViolation(
                    "a transaction is already open".to_string(),
                ));
            }
            self.staged = Some(self.committed.clone());
            self.transactions_started += 1;
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let staged = self.staged.take().ok_or_else(|| {
                DbmanError::PreconditionViolation("commit without an open transaction".to_string())
            })?;
            self.committed = staged;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.staged.take().map(|_| ()).ok_or_else(|| {
                DbmanError::PreconditionViolation(
                    "rollback without an open transaction".to_string(),
                )
            })
        })
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn execute<'a>(&'a mut self, script: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if script.trim().is_empty() {
                return Ok(());
            }
            if let Some(fragment) = self
                .failing_fragments
                .iter()
                .find(|fragment| script.contains(fragment.as_str()))
            {
                return Err(DbmanError::Database(format!(
                    "syntax error at or near \"{}\"",
                    fragment
                )));
            }
            self.state().executed.push(script.to_string());
            Ok(())
        })
    }

    fn select_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
        Box::pin(async move {
            self.state()
                .tables
                .get(table)
                .cloned()
                .ok_or_else(|| DbmanError::ledger_missing(table))
        })
    }

    fn select_ledger_names<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let rows = self.select_ledger(table).await?;
            Ok(rows.into_iter().map(|row| row.name).collect())
        })
    }

    fn insert_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_ledger_write()?;
            let state = self.state();
            state.next_id += 1;
            let id = state.next_id;

            let rows = self.table(table)?;
            if rows.iter().any(|row| row.name == name) {
                return Err(DbmanError::Database(format!(
                    "duplicate key value violates unique constraint: {}",
                    name
                )));
            }
            rows.push(LedgerEntry {
                id,
                name: name.to_string(),
                applied_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn delete_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.check_ledger_write()?;
            let rows = self.table(table)?;
            let before = rows.len();
            rows.retain(|row| row.name != name);
            Ok((before - rows.len()) as u64)
        })
    }

    fn create_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state().tables.entry(table.to_string()).or_default();
            Ok(())
        })
    }
}
