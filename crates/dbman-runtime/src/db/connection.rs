use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::debug;

use dbman_core::config::DatabaseConfig;
use dbman_core::error::{DbmanError, Result};

use super::session::PgSession;

/// Owner of the single database connection used for one run of the tool.
///
/// The underlying pool is capped at one connection so that every query,
/// transaction and ledger read shares the same session.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Validate the configuration and open the connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.database);
        if let Some(password) = config.password() {
            options = options.password(password);
        }

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                DbmanError::Database(format!(
                    "Failed to connect to {}:{}/{}: {}",
                    config.host, config.port, config.database, e
                ))
            })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Start a session on the connection.
    pub fn session(&self) -> PgSession {
        PgSession::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_incomplete_config_before_contact() {
        let config = DatabaseConfig {
            user: "postgres".into(),
            host: "unreachable.invalid".into(),
            port: 5432,
            ..Default::default()
        };

        let err = Database::connect(&config).await.err().unwrap();
        assert!(matches!(err, DbmanError::Config(ref msg) if msg.contains("database")));
    }

    #[tokio::test]
    async fn test_enum_introspection() {
        let Some(server) = crate::testing::TestDatabase::from_env() else {
            return;
        };
        let db = server.isolated("enum_introspection").await.unwrap();
        db.execute(
            "CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy');
             CREATE SCHEMA audit;
             CREATE TYPE audit.level AS ENUM ('low', 'high');",
        )
        .await
        .unwrap();

        let mut session = db.database().session();
        let types = session.enum_types().await.unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].schema, "audit");
        assert_eq!(types[0].values, vec!["low", "high"]);
        assert_eq!(types[1].name, "mood");
        assert_eq!(types[1].values, vec!["sad", "ok", "happy"]);

        session.close().await;
        db.cleanup().await.unwrap();
    }
}
