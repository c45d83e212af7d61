//! The session seam between the engine and the database.
//!
//! A session runs scripts and ledger statements either inside the one open
//! transaction or, when none is open, directly on the connection.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{Executor, PgPool, Postgres, Transaction};
use tracing::debug;

use dbman_core::error::{DbmanError, Result};
use dbman_core::migration::LedgerEntry;
use dbman_core::schema::EnumType;

/// Database operations needed by the ledger and the engine.
pub trait Session: Send {
    /// Open a transaction. Fails if one is already open.
    fn begin(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Commit the open transaction.
    fn commit(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Whether a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Execute a script verbatim. Blank scripts are not sent.
    fn execute<'a>(&'a mut self, script: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read every ledger row ordered by id.
    fn select_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>>;

    /// Read only the names recorded in the ledger.
    fn select_ledger_names<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Insert one ledger row.
    fn insert_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Delete a ledger row, returning the number of rows removed.
    fn delete_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Create the ledger table if it does not exist.
    fn create_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<()>>;
}

const ENUM_TYPES_SQL: &str = r#"
    SELECT
        n.nspname::text AS enum_schema,
        t.typname::text AS enum_name,
        e.enumlabel::text AS enum_value
    FROM pg_type t
    JOIN pg_enum e ON t.oid = e.enumtypid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
    ORDER BY enum_schema, enum_name, e.enumsortorder
"#;

/// Postgres SQLSTATE for a missing relation.
const UNDEFINED_TABLE: &str = "42P01";

/// Map a failed ledger read. A missing table or a lost connection means the
/// ledger cannot be consulted; anything else is passed through.
fn ledger_read_error(table: &str, err: sqlx::Error) -> DbmanError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
            DbmanError::ledger_missing(table)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DbmanError::LedgerUnavailable(err.to_string()),
        _ => DbmanError::Sql(err),
    }
}

/// PostgreSQL session over the single-connection pool.
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Close the connection. Dropping an open transaction rolls it back.
    pub async fn close(self) {
        drop(self.tx);
        self.pool.close().await;
    }

    /// Enum types defined outside the system schemas, labels in sort order.
    pub async fn enum_types(&mut self) -> Result<Vec<EnumType>> {
        let rows: Vec<(String, String, String)> = match self.tx.as_mut() {
            Some(tx) => sqlx::query_as(ENUM_TYPES_SQL).fetch_all(&mut **tx).await?,
            None => sqlx::query_as(ENUM_TYPES_SQL).fetch_all(&self.pool).await?,
        };

        let mut types: Vec<EnumType> = Vec::new();
        for (schema, name, value) in rows {
            match types.last_mut() {
                Some(last) if last.schema == schema && last.name == name => last.values.push(value),
                _ => {
                    let mut enum_type = EnumType::new(schema, name);
                    enum_type.values.push(value);
                    types.push(enum_type);
                }
            }
        }

        debug!("Introspected {} enum types", types.len());
        Ok(types)
    }
}

impl Session for PgSession {
    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.tx.is_some() {
                return Err(DbmanError::PreconditionViolation(
                    "a transaction is already open".to_string(),
                ));
            }
            self.tx = Some(self.pool.begin().await?);
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let tx = self.tx.take().ok_or_else(|| {
                DbmanError::PreconditionViolation("commit without an open transaction".to_string())
            })?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let tx = self.tx.take().ok_or_else(|| {
                DbmanError::PreconditionViolation(
                    "rollback without an open transaction".to_string(),
                )
            })?;
            tx.rollback().await?;
            Ok(())
        })
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn execute<'a>(&'a mut self, script: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if script.trim().is_empty() {
                return Ok(());
            }
            // Without bind arguments the simple query protocol is used, so
            // multi-statement scripts run verbatim.
            match self.tx.as_mut() {
                Some(tx) => (&mut **tx).execute(script).await?,
                None => (&self.pool).execute(script).await?,
            };
            Ok(())
        })
    }

    fn select_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
        Box::pin(async move {
            // Casts accept any integer id and TIMESTAMP or TIMESTAMPTZ columns.
            let sql = format!(
                "SELECT id::bigint, name::text, applied_at::timestamptz FROM {} ORDER BY id",
                table
            );
            let query = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(&sql);
            let rows = match self.tx.as_mut() {
                Some(tx) => query.fetch_all(&mut **tx).await,
                None => query.fetch_all(&self.pool).await,
            }
            .map_err(|e| ledger_read_error(table, e))?;

            Ok(rows
                .into_iter()
                .map(|(id, name, applied_at)| LedgerEntry {
                    id,
                    name,
                    applied_at,
                })
                .collect())
        })
    }

    fn select_ledger_names<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let sql = format!("SELECT name::text FROM {} ORDER BY id", table);
            let query = sqlx::query_scalar::<_, String>(&sql);
            let names = match self.tx.as_mut() {
                Some(tx) => query.fetch_all(&mut **tx).await,
                None => query.fetch_all(&self.pool).await,
            }
            .map_err(|e| ledger_read_error(table, e))?;
            Ok(names)
        })
    }

    fn insert_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!("INSERT INTO {} (name) VALUES ($1)", table);
            let query = sqlx::query(&sql).bind(name);
            match self.tx.as_mut() {
                Some(tx) => query.execute(&mut **tx).await?,
                None => query.execute(&self.pool).await?,
            };
            Ok(())
        })
    }

    fn delete_ledger<'a>(&'a mut self, table: &'a str, name: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {} WHERE name = $1", table);
            let query = sqlx::query(&sql).bind(name);
            let result = match self.tx.as_mut() {
                Some(tx) => query.execute(&mut **tx).await?,
                None => query.execute(&self.pool).await?,
            };
            Ok(result.rows_affected())
        })
    }

    fn create_ledger<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(255) UNIQUE NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
                table
            );
            match self.tx.as_mut() {
                Some(tx) => sqlx::query(&sql).execute(&mut **tx).await?,
                None => sqlx::query(&sql).execute(&self.pool).await?,
            };
            Ok(())
        })
    }
}
