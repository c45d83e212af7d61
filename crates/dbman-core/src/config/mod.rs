mod database;

pub use database::DatabaseConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DbmanError, Result};

/// Root configuration for dbman.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbmanConfig {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration store and ledger settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Enum code generation settings.
    #[serde(default)]
    pub codegen: CodegenConfig,
}

impl DbmanConfig {
    /// Load configuration from a file.
    ///
    /// `.toml` files are parsed as TOML; anything else is read as a
    /// `key=value` env file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DbmanError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        if path.extension().map(|ext| ext == "toml").unwrap_or(false) {
            Self::parse_toml(&content)
        } else {
            Self::parse_env(&content)
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        toml::from_str(&content)
            .map_err(|e| DbmanError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from `key=value` lines.
    pub fn parse_env(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for item in dotenvy::from_read_iter(content.as_bytes()) {
            let (key, value) = item
                .map_err(|e| DbmanError::Config(format!("Invalid config line: {}", e)))?;

            match key.as_str() {
                "user" => config.database.user = value,
                "password" => config.database.password = Some(value),
                "host" => config.database.host = value,
                "port" => {
                    config.database.port = value.trim().parse().map_err(|_| {
                        DbmanError::Config(format!("Invalid port number: {}", value))
                    })?;
                }
                "database" => config.database.database = value,
                "migrations_dir" => config.migrations.dir = PathBuf::from(value),
                "migrations_table" => config.migrations.table = value,
                "enums_dir" => config.codegen.enums_dir = Some(PathBuf::from(value)),
                other => {
                    return Err(DbmanError::Config(format!(
                        "Unknown config key: {}",
                        other
                    )))
                }
            }
        }

        Ok(config)
    }
}

/// Where migration units live and how the ledger is named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Root directory holding one directory per unit.
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,

    /// Ledger table name.
    #[serde(default = "default_ledger_table")]
    pub table: String,

    /// File name of the forward script inside a unit.
    #[serde(default = "default_forward_file")]
    pub forward_file: String,

    /// File name of the reverse script inside a unit.
    #[serde(default = "default_reverse_file")]
    pub reverse_file: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            table: default_ledger_table(),
            forward_file: default_forward_file(),
            reverse_file: default_reverse_file(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_ledger_table() -> String {
    "migrations".to_string()
}

fn default_forward_file() -> String {
    "migration.sql".to_string()
}

fn default_reverse_file() -> String {
    "rollback.sql".to_string()
}

/// Enum code generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodegenConfig {
    /// Output directory for generated enum files. Generation after
    /// migrations is disabled when unset.
    #[serde(default)]
    pub enums_dir: Option<PathBuf>,
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| DbmanError::Config(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
