pub mod config;
pub mod error;
pub mod migration;
pub mod schema;

pub use config::{CodegenConfig, DatabaseConfig, DbmanConfig, MigrationsConfig};
pub use error::{DbmanError, Result};
pub use migration::{Direction, LedgerEntry, MigrationUnit};
pub use schema::EnumType;
