use std::path::PathBuf;

use axum::http::HeaderValue;
use shorts_core::config::{parse_or, process_env, string_or, ConfigError};

/// Server configuration loaded from environment variables.
///
/// Every field has a default suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins, parsed from the comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// Upper bound on a whole HTTP request. Run endpoints wait for the batch
    /// to finish, so this must cover a full batch.
    pub request_timeout_secs: u64,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Root directory for generated and uploaded artifacts.
    pub artifact_dir: PathBuf,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                   |
    /// |------------------------|---------------------------|
    /// | `HOST`                 | `0.0.0.0`                 |
    /// | `PORT`                 | `8000`                    |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`   |
    /// | `REQUEST_TIMEOUT_SECS` | `1800`                    |
    /// | `DATABASE_URL`         | `sqlite://data/shorts.db` |
    /// | `DB_MAX_CONNECTIONS`   | `5`                       |
    /// | `ARTIFACT_DIR`         | `downloads`               |
    /// | `LOG_FORMAT`           | `text` (or `json`)        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let raw_origins = string_or(&lookup, "CORS_ORIGINS", "http://localhost:3000");
        let cors_origins = raw_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                    var: "CORS_ORIGINS",
                    value: origin.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_format = string_or(&lookup, "LOG_FORMAT", "text");
        let json_logs = match log_format.to_ascii_lowercase().as_str() {
            "json" => true,
            "text" => false,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: log_format,
                    reason: "expected 'text' or 'json'".into(),
                })
            }
        };

        Ok(Self {
            host: string_or(&lookup, "HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 8000)?,
            cors_origins,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 1800)?,
            database_url: string_or(&lookup, "DATABASE_URL", "sqlite://data/shorts.db"),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            artifact_dir: PathBuf::from(string_or(&lookup, "ARTIFACT_DIR", "downloads")),
            json_logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cors_origins, vec![HeaderValue::from_static("http://localhost:3000")]);
        assert_eq!(config.artifact_dir, PathBuf::from("downloads"));
        assert!(!config.json_logs);
    }

    #[test]
    fn parses_origin_list_and_json_logs() {
        let config = ServerConfig::from_lookup(env(&[
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.json_logs);
    }

    #[test]
    fn rejects_bad_port() {
        let err = ServerConfig::from_lookup(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));
    }
}
