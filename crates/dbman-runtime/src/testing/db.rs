//! Explicit PostgreSQL provisioning for tests.
//!
//! Database tests read `TEST_DATABASE_URL` and never fall back to the
//! configured application database. Each test gets its own throw-away
//! database so ledgers and schemas never collide.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use dbman_core::error::{DbmanError, Result};

use crate::db::Database;

/// Environment variable naming the server used for database tests.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Postgres truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Connection to the test server.
pub struct TestDatabase {
    url: String,
}

impl TestDatabase {
    /// Use `TEST_DATABASE_URL`, or `None` when it is not set.
    pub fn from_env() -> Option<Self> {
        std::env::var(TEST_DATABASE_URL)
            .ok()
            .map(|url| Self { url })
    }

    /// Create a dedicated database for a single test.
    pub async fn isolated(&self, test_name: &str) -> Result<IsolatedTestDb> {
        let server: PgConnectOptions = self.url.parse()?;
        let db_name = isolated_db_name(test_name, &uuid::Uuid::new_v4().simple().to_string());

        let admin = connect(server.clone()).await?;
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&admin)
            .await?;
        admin.close().await;

        let pool = connect(server.clone().database(&db_name)).await?;

        Ok(IsolatedTestDb {
            pool,
            db_name,
            server,
        })
    }
}

/// A database that exists for the lifetime of a single test.
pub struct IsolatedTestDb {
    pool: PgPool,
    db_name: String,
    server: PgConnectOptions,
}

impl IsolatedTestDb {
    /// Connection manager over this database.
    pub fn database(&self) -> Database {
        Database::from_pool(self.pool.clone())
    }

    /// Run raw SQL to inspect or prepare state.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Whether a table exists in the public schema.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Drop the database, disconnecting any session still attached to it.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        let admin = connect(self.server).await?;

        let _ = sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1",
        )
        .bind(&self.db_name)
        .execute(&admin)
        .await;

        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.db_name))
            .execute(&admin)
            .await?;
        admin.close().await;

        Ok(())
    }
}

async fn connect(options: PgConnectOptions) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| DbmanError::Database(format!("Failed to connect to test database: {}", e)))
}

/// `dbman_test_<test>_<suffix>`, with the test part reduced to lowercase
/// ASCII and shortened so the whole name stays a valid identifier.
fn isolated_db_name(test_name: &str, suffix: &str) -> String {
    let prefix = "dbman_test_";
    let room = MAX_IDENTIFIER_LEN.saturating_sub(prefix.len() + suffix.len() + 1);
    let slug: String = test_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(room)
        .collect();
    format!("{}{}_{}", prefix, slug, suffix)
}
