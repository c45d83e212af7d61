pub mod db;
pub mod migrations;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::{Database, PgSession, Session};
pub use migrations::{
    MigrationEngine, MigrationOutcome, MigrationStatus, MigrationStore, Ledger, RunReport,
};

/// Engine bound to a PostgreSQL session.
pub type PgMigrationEngine = MigrationEngine<PgSession>;
