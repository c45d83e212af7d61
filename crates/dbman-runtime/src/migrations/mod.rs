mod engine;
mod ledger;
mod store;

pub use engine::{
    select_pending, select_rollback_candidates, AppliedMigration, MigrationEngine,
    MigrationOutcome, MigrationStatus, RunReport,
};
pub use ledger::Ledger;
pub use store::MigrationStore;
