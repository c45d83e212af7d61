//! Migration engine.
//!
//! Reconciles the store against the ledger and executes one unit at a time.
//! Each unit runs in its own transaction: the script and the ledger change
//! commit together or not at all. Nothing is cached between calls; every
//! operation re-reads the store and the ledger.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use dbman_core::config::MigrationsConfig;
use dbman_core::error::{DbmanError, Result};
use dbman_core::migration::Direction;

use super::ledger::Ledger;
use super::store::MigrationStore;
use crate::db::Session;

/// Result of executing one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub name: String,
    pub direction: Direction,
}

/// Result of a successful run-all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Units applied by this run, in order.
    pub applied: Vec<String>,
}

/// An applied unit still present in the store.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Snapshot of the store reconciled against the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    /// Applied units in chronological order.
    pub applied: Vec<AppliedMigration>,
    /// Pending units in chronological order.
    pub pending: Vec<String>,
    /// Ledger names with no unit on disk.
    pub orphaned: Vec<String>,
}

/// Units in the store that are not in the ledger, in store order.
pub fn select_pending(units: &[String], applied: &BTreeSet<String>) -> Vec<String> {
    units
        .iter()
        .filter(|name| !applied.contains(*name))
        .cloned()
        .collect()
}

/// Units in the store that are also in the ledger, in store order.
pub fn select_rollback_candidates(units: &[String], applied: &BTreeSet<String>) -> Vec<String> {
    units
        .iter()
        .filter(|name| applied.contains(*name))
        .cloned()
        .collect()
}

/// Executes migrations over a single session.
pub struct MigrationEngine<S: Session> {
    store: MigrationStore,
    ledger: Ledger,
    session: S,
}

impl<S: Session> MigrationEngine<S> {
    pub fn new(store: MigrationStore, ledger: Ledger, session: S) -> Self {
        Self {
            store,
            ledger,
            session,
        }
    }

    /// Build an engine from the migrations section of the config.
    pub fn from_config(config: &MigrationsConfig, session: S) -> Result<Self> {
        Ok(Self::new(
            MigrationStore::new(config),
            Ledger::new(config.table.clone())?,
            session,
        ))
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Pending units in chronological order.
    pub async fn list_pending(&mut self) -> Result<Vec<String>> {
        let (units, applied) = self.snapshot().await?;
        Ok(select_pending(&units, &applied))
    }

    /// Applied units that can be reverted, in chronological order.
    pub async fn list_rollback_candidates(&mut self) -> Result<Vec<String>> {
        let (units, applied) = self.snapshot().await?;
        Ok(select_rollback_candidates(&units, &applied))
    }

    /// Applied, pending and orphaned units.
    pub async fn status(&mut self) -> Result<MigrationStatus> {
        let units = self.store.list().await?;
        let entries = self.ledger.list_entries(&mut self.session).await?;

        let applied_names: BTreeSet<String> = entries.iter().map(|e| e.name.clone()).collect();
        let on_disk: BTreeSet<&String> = units.iter().collect();

        let applied = units
            .iter()
            .filter_map(|name| {
                entries
                    .iter()
                    .find(|entry| &entry.name == name)
                    .map(|entry| AppliedMigration {
                        name: name.clone(),
                        applied_at: entry.applied_at,
                    })
            })
            .collect();

        let orphaned = entries
            .iter()
            .filter(|entry| !on_disk.contains(&entry.name))
            .map(|entry| entry.name.clone())
            .collect();

        Ok(MigrationStatus {
            applied,
            pending: select_pending(&units, &applied_names),
            orphaned,
        })
    }

    /// Apply one pending unit.
    pub async fn apply(&mut self, name: &str) -> Result<MigrationOutcome> {
        let (units, applied) = self.snapshot().await?;
        if !units.iter().any(|unit| unit == name) {
            return Err(DbmanError::UnitNotFound(name.to_string()));
        }
        if applied.contains(name) {
            return Err(DbmanError::NotPending(name.to_string()));
        }

        self.execute(name, Direction::Forward).await
    }

    /// Revert one applied unit.
    pub async fn revert(&mut self, name: &str) -> Result<MigrationOutcome> {
        let (units, applied) = self.snapshot().await?;
        if !units.iter().any(|unit| unit == name) {
            return Err(DbmanError::UnitNotFound(name.to_string()));
        }
        if !applied.contains(name) {
            return Err(DbmanError::NotApplied(name.to_string()));
        }

        self.execute(name, Direction::Reverse).await
    }

    /// Apply every pending unit in order, stopping at the first failure.
    ///
    /// Units committed before the failure stay committed and are listed in
    /// the returned `RunHalted` error.
    pub async fn run_all_pending(&mut self) -> Result<RunReport> {
        let pending = self.list_pending().await?;
        if pending.is_empty() {
            debug!("No pending migrations");
            return Ok(RunReport::default());
        }

        let mut report = RunReport::default();
        for name in pending {
            if let Err(e) = self.execute(&name, Direction::Forward).await {
                warn!(
                    applied = report.applied.len(),
                    "Run halted at migration {}",
                    name
                );
                return Err(DbmanError::RunHalted {
                    applied: report.applied,
                    cause: Box::new(e),
                });
            }
            report.applied.push(name);
        }

        Ok(report)
    }

    /// Create the ledger table if it does not exist.
    pub async fn provision(&mut self) -> Result<()> {
        self.session.begin().await?;
        match self.ledger.provision(&mut self.session).await {
            Ok(()) => self.session.commit().await,
            Err(e) => {
                if let Err(rollback_err) = self.session.rollback().await {
                    warn!("Failed to roll back ledger provisioning: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn snapshot(&mut self) -> Result<(Vec<String>, BTreeSet<String>)> {
        let units = self.store.list().await?;
        let applied = self.ledger.list_applied(&mut self.session).await?;
        Ok((units, applied))
    }

    /// Run one unit in one direction inside its own transaction.
    async fn execute(&mut self, name: &str, direction: Direction) -> Result<MigrationOutcome> {
        let script = self.store.load_script(name, direction).await?;

        info!("{} {}", direction.verb(), name);

        self.session
            .begin()
            .await
            .map_err(|e| DbmanError::execution_failed(name, direction, e))?;

        if let Err(cause) = self.run_in_transaction(name, &script, direction).await {
            if let Err(rollback_err) = self.session.rollback().await {
                warn!("Failed to roll back {} {}: {}", direction, name, rollback_err);
            }
            return Err(DbmanError::execution_failed(name, direction, cause));
        }

        self.session
            .commit()
            .await
            .map_err(|e| DbmanError::execution_failed(name, direction, e))?;

        info!("Committed {} {}", direction, name);
        Ok(MigrationOutcome {
            name: name.to_string(),
            direction,
        })
    }

    async fn run_in_transaction(&mut self, name: &str, script: &str, direction: Direction) -> Result<()> {
        self.session.execute(script).await?;
        match direction {
            Direction::Forward => self.ledger.record_applied(&mut self.session, name).await,
            Direction::Reverse => self.ledger.record_reverted(&mut self.session, name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySession;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_unit(root: &Path, name: &str, forward: &str, reverse: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("migration.sql"), forward).unwrap();
        fs::write(dir.join("rollback.sql"), reverse).unwrap();
    }

    fn engine(root: &Path, session: MemorySession) -> MigrationEngine<MemorySession> {
        let config = MigrationsConfig {
            dir: root.to_path_buf(),
            ..Default::default()
        };
        MigrationEngine::from_config(&config, session).unwrap()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pending_and_candidates_partition_the_store() {
        let units = names(&["50-b", "100-a", "200-c", "300-d"]);
        let cases: Vec<BTreeSet<String>> = vec![
            BTreeSet::new(),
            ["100-a"].iter().map(|s| s.to_string()).collect(),
            ["50-b", "300-d", "999-gone"].iter().map(|s| s.to_string()).collect(),
            units.iter().cloned().collect(),
        ];

        for applied in cases {
            let pending = select_pending(&units, &applied);
            let candidates = select_rollback_candidates(&units, &applied);

            assert!(pending.iter().all(|p| !candidates.contains(p)));
            assert_eq!(pending.len() + candidates.len(), units.len());
            assert!(pending.iter().all(|p| !applied.contains(p)));
            assert!(candidates.iter().all(|c| applied.contains(c)));
            assert!(!candidates.contains(&"999-gone".to_string()));

            let mut merged: Vec<&String> = pending.iter().chain(candidates.iter()).collect();
            merged.sort_by_key(|n| units.iter().position(|u| u == *n));
            assert_eq!(merged, units.iter().collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_list_pending_chronological() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "", "");
        write_unit(dir.path(), "50-b", "", "");
        write_unit(dir.path(), "9999999999-c", "", "");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        assert_eq!(
            engine.list_pending().await.unwrap(),
            names(&["50-b", "100-a", "9999999999-c"])
        );
        assert!(engine.list_rollback_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));

        assert!(engine.list_pending().await.unwrap().is_empty());
        let report = engine.run_all_pending().await.unwrap();
        assert!(report.applied.is_empty());
        assert!(engine.into_session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_apply_moves_unit_to_candidates() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "CREATE TABLE a (id INT);", "DROP TABLE a;");
        write_unit(dir.path(), "200-b", "CREATE TABLE b (id INT);", "DROP TABLE b;");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        let outcome = engine.apply("100-a").await.unwrap();
        assert_eq!(outcome.name, "100-a");
        assert_eq!(outcome.direction, Direction::Forward);

        assert_eq!(engine.list_pending().await.unwrap(), names(&["200-b"]));
        assert_eq!(
            engine.list_rollback_candidates().await.unwrap(),
            names(&["100-a"])
        );

        let session = engine.into_session();
        assert_eq!(session.executed(), &["CREATE TABLE a (id INT);".to_string()]);
    }

    #[tokio::test]
    async fn test_apply_then_revert_restores_ledger() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "CREATE TABLE a (id INT);", "DROP TABLE a;");

        let mut session = MemorySession::provisioned("migrations");
        session.seed_ledger("migrations", "50-elsewhere");
        let before = session.ledger_names("migrations");

        let mut engine = engine(dir.path(), session);
        engine.apply("100-a").await.unwrap();
        let outcome = engine.revert("100-a").await.unwrap();
        assert_eq!(outcome.direction, Direction::Reverse);

        assert_eq!(engine.list_pending().await.unwrap(), names(&["100-a"]));
        let session = engine.into_session();
        assert_eq!(session.ledger_names("migrations"), before);
        assert_eq!(
            session.executed(),
            &["CREATE TABLE a (id INT);".to_string(), "DROP TABLE a;".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_forward_script_rolls_back_everything() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "CREATE TABLE a (id INT); CREAT BROKEN;", "");

        let mut session = MemorySession::provisioned("migrations");
        session.fail_on("CREAT BROKEN");
        let mut engine = engine(dir.path(), session);

        let err = engine.apply("100-a").await.unwrap_err();
        match err {
            DbmanError::MigrationExecutionFailed {
                ref unit,
                direction,
                ..
            } => {
                assert_eq!(unit, "100-a");
                assert_eq!(direction, Direction::Forward);
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(engine.list_pending().await.unwrap(), names(&["100-a"]));
        let session = engine.into_session();
        assert!(!session.in_transaction());
        assert!(session.ledger_names("migrations").is_empty());
        assert!(session.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_ledger_write_rolls_back_script() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "CREATE TABLE a (id INT);", "");

        let mut session = MemorySession::provisioned("migrations");
        session.fail_ledger_writes();
        let mut engine = engine(dir.path(), session);

        let err = engine.apply("100-a").await.unwrap_err();
        assert_eq!(err.unit_name(), Some("100-a"));

        let session = engine.into_session();
        assert!(session.executed().is_empty());
        assert!(session.ledger_names("migrations").is_empty());
    }

    #[tokio::test]
    async fn test_failed_reverse_script_keeps_unit_applied() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "CREATE TABLE a (id INT);", "DROP TABLE BROKEN;");

        let mut session = MemorySession::provisioned("migrations");
        session.fail_on("BROKEN");
        let mut engine = engine(dir.path(), session);

        engine.apply("100-a").await.unwrap();
        let err = engine.revert("100-a").await.unwrap_err();
        assert!(matches!(
            err,
            DbmanError::MigrationExecutionFailed {
                direction: Direction::Reverse,
                ..
            }
        ));

        assert_eq!(
            engine.list_rollback_candidates().await.unwrap(),
            names(&["100-a"])
        );
    }

    #[tokio::test]
    async fn test_run_all_halts_at_first_failure() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-first", "CREATE TABLE one (id INT);", "");
        write_unit(dir.path(), "200-second", "CREATE TABLE BROKEN;", "");
        write_unit(dir.path(), "300-third", "CREATE TABLE three (id INT);", "");

        let mut session = MemorySession::provisioned("migrations");
        session.fail_on("BROKEN");
        let mut engine = engine(dir.path(), session);

        let err = engine.run_all_pending().await.unwrap_err();
        assert_eq!(err.unit_name(), Some("200-second"));
        match err {
            DbmanError::RunHalted { applied, cause } => {
                assert_eq!(applied, names(&["100-first"]));
                assert!(matches!(*cause, DbmanError::MigrationExecutionFailed { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(
            engine.list_pending().await.unwrap(),
            names(&["200-second", "300-third"])
        );
        let session = engine.into_session();
        assert_eq!(session.ledger_names("migrations"), names(&["100-first"]));
        assert_eq!(session.executed(), &["CREATE TABLE one (id INT);".to_string()]);
    }

    #[tokio::test]
    async fn test_run_all_applies_in_order() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "300-c", "SELECT 3;", "");
        write_unit(dir.path(), "100-a", "SELECT 1;", "");
        write_unit(dir.path(), "200-b", "", "");

        let mut session = MemorySession::provisioned("migrations");
        session.seed_ledger("migrations", "200-b");
        let mut engine = engine(dir.path(), session);

        let report = engine.run_all_pending().await.unwrap();
        assert_eq!(report.applied, names(&["100-a", "300-c"]));
        assert!(engine.list_pending().await.unwrap().is_empty());

        let session = engine.into_session();
        assert_eq!(session.executed(), &["SELECT 1;".to_string(), "SELECT 3;".to_string()]);
        assert_eq!(
            session.ledger_names("migrations"),
            names(&["200-b", "100-a", "300-c"])
        );
    }

    #[tokio::test]
    async fn test_empty_scripts_still_update_ledger() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "", "");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        engine.apply("100-a").await.unwrap();
        assert_eq!(
            engine.list_rollback_candidates().await.unwrap(),
            names(&["100-a"])
        );
        engine.revert("100-a").await.unwrap();
        assert_eq!(engine.list_pending().await.unwrap(), names(&["100-a"]));
    }

    #[tokio::test]
    async fn test_apply_rejects_applied_and_unknown_units() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "SELECT 1;", "");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        engine.apply("100-a").await.unwrap();

        let err = engine.apply("100-a").await.unwrap_err();
        assert!(matches!(err, DbmanError::NotPending(_)));

        let err = engine.apply("999-missing").await.unwrap_err();
        assert!(matches!(err, DbmanError::UnitNotFound(_)));

        let err = engine.revert("999-missing").await.unwrap_err();
        assert!(matches!(err, DbmanError::UnitNotFound(_)));

        assert_eq!(engine.into_session().executed().len(), 1);
    }

    #[tokio::test]
    async fn test_revert_rejects_pending_unit() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "", "DROP TABLE a;");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        let err = engine.revert("100-a").await.unwrap_err();
        assert!(matches!(err, DbmanError::NotApplied(_)));
        assert!(engine.into_session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_aborts_before_transaction() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "SELECT 1;", "");
        fs::remove_file(dir.path().join("100-a/migration.sql")).unwrap();

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        let err = engine.apply("100-a").await.unwrap_err();
        assert!(matches!(err, DbmanError::ScriptNotFound { .. }));

        let session = engine.into_session();
        assert_eq!(session.transactions_started(), 0);
    }

    #[tokio::test]
    async fn test_unprovisioned_ledger_is_surfaced() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "SELECT 1;", "");

        let mut engine = engine(dir.path(), MemorySession::new());
        let err = engine.list_pending().await.unwrap_err();
        assert!(matches!(err, DbmanError::LedgerUnavailable(_)));

        engine.provision().await.unwrap();
        assert_eq!(engine.list_pending().await.unwrap(), names(&["100-a"]));
    }

    #[tokio::test]
    async fn test_status_reports_orphans() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "", "");
        write_unit(dir.path(), "200-b", "", "");

        let mut session = MemorySession::provisioned("migrations");
        session.seed_ledger("migrations", "200-b");
        session.seed_ledger("migrations", "150-deleted");
        let mut engine = engine(dir.path(), session);

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, names(&["100-a"]));
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.applied[0].name, "200-b");
        assert_eq!(status.orphaned, names(&["150-deleted"]));
    }

    #[tokio::test]
    async fn test_malformed_unit_blocks_listing() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "100-a", "", "");
        write_unit(dir.path(), "notes", "", "");

        let mut engine = engine(dir.path(), MemorySession::provisioned("migrations"));
        let err = engine.run_all_pending().await.unwrap_err();
        assert!(matches!(err, DbmanError::MalformedUnitName(_)));
        assert!(engine.into_session().executed().is_empty());
    }
}
