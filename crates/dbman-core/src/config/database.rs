use serde::{Deserialize, Serialize};

use crate::error::{DbmanError, Result};

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Role to connect as.
    #[serde(default)]
    pub user: String,

    /// Password, if the server requires one.
    #[serde(default)]
    pub password: Option<String>,

    /// Server host name or address.
    #[serde(default)]
    pub host: String,

    /// Server port.
    #[serde(default)]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: None,
            host: String::new(),
            port: 0,
            database: String::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Reject incomplete settings before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.user.trim().is_empty() {
            missing.push("user");
        }
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.port == 0 {
            missing.push("port");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbmanError::Config(format!(
                "Incomplete database configuration: missing {}",
                missing.join(", ")
            )))
        }
    }

    /// Password, with an empty string treated as absent.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> DatabaseConfig {
        DatabaseConfig {
            user: "postgres".into(),
            password: Some("secret".into()),
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.connect_timeout_secs, 30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_complete() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let config = DatabaseConfig {
            host: " ".into(),
            port: 0,
            ..complete()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("host"));
        assert!(err.contains("port"));
        assert!(!err.contains("user"));
    }

    #[test]
    fn test_password_is_optional() {
        let mut config = complete();
        config.password = None;
        assert!(config.validate().is_ok());
        config.password = Some(String::new());
        assert_eq!(config.password(), None);
    }

    #[test]
    fn test_parse_database_config() {
        let toml = r#"
            user = "postgres"
            host = "db.internal"
            port = 6543
            database = "app"
        "#;

        let config: DatabaseConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 6543);
        assert_eq!(config.password, None);
        assert!(config.validate().is_ok());
    }
}
