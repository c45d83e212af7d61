//! Test support: an in-memory session and explicit Postgres provisioning.

mod db;
mod memory;

pub use db::{IsolatedTestDb, TestDatabase, TEST_DATABASE_URL};
pub use memory::MemorySession;
