use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins (comma separated)
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JWT secret key used to validate bearer tokens
    pub auth_jwt_secret: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Lease length used when a lock request does not name one
    #[serde(default = "default_lock_duration_minutes")]
    pub lock_duration_minutes: i64,

    /// Upper bound for caller supplied lease lengths
    #[serde(default = "default_lock_max_minutes")]
    pub lock_max_minutes: i64,

    /// Interval of the background sweep of expired locks, 0 disables it
    #[serde(default = "default_lock_sweep_interval_secs")]
    pub lock_sweep_interval_secs: u64,

    #[serde(default = "default_permission_cache_ttl_secs")]
    pub permission_cache_ttl_secs: u64,

    /// Close presence sessions when a connection drops without leaving
    #[serde(default = "default_auto_leave_on_disconnect")]
    pub auto_leave_on_disconnect: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        Self::from_env_iter(std::env::vars())
    }

    /// Build the configuration from an explicit set of variables
    pub fn from_env_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_duration_minutes <= 0 {
            return Err(ConfigError::Invalid("LOCK_DURATION_MINUTES must be positive"));
        }
        if self.lock_max_minutes <= 0 {
            return Err(ConfigError::Invalid("LOCK_MAX_MINUTES must be positive"));
        }
        Ok(())
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn default_log_filter(&self) -> String {
        format!(
            "section_collab={0},tower_http={0},axum::rejection=trace,{0}",
            self.log_level
        )
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Lease length in effect for a request, clamped to the configured maximum.
    /// Returns `None` when the requested length is not positive.
    pub fn lease_minutes(&self, requested: Option<i64>) -> Option<i64> {
        match requested {
            None => Some(self.lock_duration_minutes.min(self.lock_max_minutes)),
            Some(m) if m <= 0 => None,
            Some(m) => Some(m.min(self.lock_max_minutes)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            auth_jwt_secret: None,
            db_url: None,
            db_max_connections: default_db_max_connections(),
            lock_duration_minutes: default_lock_duration_minutes(),
            lock_max_minutes: default_lock_max_minutes(),
            lock_sweep_interval_secs: default_lock_sweep_interval_secs(),
            permission_cache_ttl_secs: default_permission_cache_ttl_secs(),
            auto_leave_on_disconnect: default_auto_leave_on_disconnect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_lock_duration_minutes() -> i64 {
    15
}

fn default_lock_max_minutes() -> i64 {
    240
}

fn default_lock_sweep_interval_secs() -> u64 {
    60
}

fn default_permission_cache_ttl_secs() -> u64 {
    30
}

fn default_auto_leave_on_disconnect() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_apply_when_variables_are_absent() {
        let config = Config::from_env_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.lock_duration_minutes, 15);
        assert!(config.auto_leave_on_disconnect);
        assert!(config.db_url.is_none());
        assert!(config.is_development());
    }

    #[test]
    fn variables_override_defaults() {
        let vars = vec![
            ("PORT".to_string(), "8080".to_string()),
            ("LOCK_DURATION_MINUTES".to_string(), "5".to_string()),
            ("AUTO_LEAVE_ON_DISCONNECT".to_string(), "false".to_string()),
            ("DB_URL".to_string(), "postgres://localhost/editor".to_string()),
        ];
        let config = Config::from_env_iter(vars).unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.lock_duration_minutes, 5);
        assert!(!config.auto_leave_on_disconnect);
        assert_eq!(config.db_url.as_deref(), Some("postgres://localhost/editor"));
    }

    #[test]
    fn lease_minutes_defaults_and_clamps() {
        let config = Config::default();
        assert_eq!(config.lease_minutes(None), Some(15));
        assert_eq!(config.lease_minutes(Some(30)), Some(30));
        assert_eq!(config.lease_minutes(Some(10_000)), Some(240));
        assert_eq!(config.lease_minutes(Some(0)), None);
        assert_eq!(config.lease_minutes(Some(-3)), None);
    }

    #[test]
    fn non_positive_lease_settings_are_rejected() {
        for (name, value) in [("LOCK_MAX_MINUTES", "0"), ("LOCK_MAX_MINUTES", "-5"), ("LOCK_DURATION_MINUTES", "0")] {
            let vars = vec![(name.to_string(), value.to_string())];
            assert_matches!(Config::from_env_iter(vars), Err(ConfigError::Invalid(_)), "{}={}", name, value);
        }
    }

    #[test]
    fn default_lease_never_exceeds_the_maximum() {
        let config = Config { lock_duration_minutes: 60, lock_max_minutes: 30, ..Config::default() };
        assert_eq!(config.lease_minutes(None), Some(30));
    }

    #[test]
    fn log_level_feeds_the_default_filter() {
        let vars = vec![("LOG_LEVEL".to_string(), "warn".to_string())];
        let config = Config::from_env_iter(vars).unwrap();
        assert_eq!(config.default_log_filter(), "section_collab=warn,tower_http=warn,axum::rejection=trace,warn");
    }
}
