//! Application configuration.
//!
//! Environment variables are the single source of truth; defaults are
//! development-safe values only. Handlers never read the environment
//! directly — the server builds one [`LatticeConfig`] at startup and
//! threads it through the application context.

use serde::{Deserialize, Serialize};

use lattice_error::{CoreError, Result};

/// Development auth secret; refused outside development.
const DEV_SECRET: &str = "dev-secret-change-in-prod";

/// Analytical store (SQL over HTTP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticalStoreConfig {
    /// Base URL of the HTTP SQL endpoint.
    pub url:      String,
    /// Database to scope queries and catalog discovery to.
    pub database: String,
    /// Username.
    pub user:     String,
    /// Password.
    pub password: String,
}

impl Default for AnalyticalStoreConfig {
    fn default() -> Self {
        Self {
            url:      "http://localhost:8123".to_string(),
            database: "lattice".to_string(),
            user:     "default".to_string(),
            password: String::new(),
        }
    }
}

/// Live store (PostgreSQL wire protocol) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStoreConfig {
    /// Host name.
    pub host:          String,
    /// Port.
    pub port:          u16,
    /// Database name.
    pub database:      String,
    /// Username.
    pub user:          String,
    /// Password.
    pub password:      String,
    /// Connection pool size.
    pub pool_max_size: usize,
}

impl Default for LiveStoreConfig {
    fn default() -> Self {
        Self {
            host:          "localhost".to_string(),
            port:          6875,
            database:      "lattice".to_string(),
            user:          "lattice".to_string(),
            password:      String::new(),
            pool_max_size: 10,
        }
    }
}

/// Cache TTLs, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    /// Schema catalog materialization.
    pub schema_secs:          u64,
    /// Widget results whose terminal segment targets the analytical store.
    pub widget_analytical_secs: u64,
    /// Widget results whose terminal segment targets the live store.
    pub widget_live_secs:     u64,
    /// Preview results.
    pub preview_secs:         u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            schema_secs:          300,
            widget_analytical_secs: 300,
            widget_live_secs:     30,
            preview_secs:         300,
        }
    }
}

/// Execution budget applied to one dispatch path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionBudget {
    /// Wall-time cap in seconds; doubles as the cancellation deadline.
    pub max_execution_secs: u64,
    /// Memory cap in bytes.
    pub max_memory_bytes:   u64,
    /// Scan cap in rows.
    pub max_rows_to_read:   u64,
}

impl ExecutionBudget {
    /// Preview path: tight budgets for canvas interactivity.
    #[must_use]
    pub const fn preview_default() -> Self {
        Self {
            max_execution_secs: 3,
            max_memory_bytes:   100_000_000,
            max_rows_to_read:   10_000_000,
        }
    }

    /// Widget path: dashboards tolerate heavier queries.
    #[must_use]
    pub const fn widget_default() -> Self {
        Self {
            max_execution_secs: 30,
            max_memory_bytes:   500_000_000,
            max_rows_to_read:   50_000_000,
        }
    }
}

/// Embed rate limiting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default requests per window when the key declares no override.
    pub default_limit: u64,
    /// Window size in seconds.
    pub window_secs:   u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            window_secs:   1,
        }
    }
}

/// Lattice application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// Deployment environment (`development`, `staging`, `production`).
    pub app_env:        String,
    /// HS256 secret for bearer tokens.
    pub secret_key:     String,
    /// Namespace prefix for fast-store keys and bus channels.
    pub namespace:      String,
    /// Analytical store.
    pub analytical:     AnalyticalStoreConfig,
    /// Live store.
    pub live:           LiveStoreConfig,
    /// Fast store (cache, counters, pub/sub) connection URL.
    pub fast_store_url: String,
    /// Relational store (workflows, dashboards, widgets, API keys) URL.
    pub relational_url: String,
    /// Cache TTLs.
    pub cache_ttl:      CacheTtlConfig,
    /// Preview-path execution budget.
    pub preview_budget: ExecutionBudget,
    /// Widget-path execution budget.
    pub widget_budget:  ExecutionBudget,
    /// Embed rate limiting.
    pub rate_limit:     RateLimitConfig,
    /// CORS allowed origins.
    pub cors_origins:   Vec<String>,
    /// Log level filter (`info`, `debug`, …).
    pub log_level:      String,
    /// HTTP bind address.
    pub bind_addr:      String,
    /// Live-widget poll interval in seconds.
    pub live_poll_secs: u64,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            app_env:        "development".to_string(),
            secret_key:     DEV_SECRET.to_string(),
            namespace:      "lattice".to_string(),
            analytical:     AnalyticalStoreConfig::default(),
            live:           LiveStoreConfig::default(),
            fast_store_url: "redis://localhost:6379/0".to_string(),
            relational_url: "postgresql://localhost/lattice".to_string(),
            cache_ttl:      CacheTtlConfig::default(),
            preview_budget: ExecutionBudget::preview_default(),
            widget_budget:  ExecutionBudget::widget_default(),
            rate_limit:     RateLimitConfig::default(),
            cors_origins:   vec!["http://localhost:5173".to_string()],
            log_level:      "info".to_string(),
            bind_addr:      "127.0.0.1:8000".to_string(),
            live_poll_secs: 2,
        }
    }
}

impl LatticeConfig {
    /// Assemble configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` for unparseable values or a
    /// production environment still carrying the development secret.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        read_string("LATTICE_APP_ENV", &mut config.app_env);
        read_string("LATTICE_SECRET_KEY", &mut config.secret_key);
        read_string("LATTICE_NAMESPACE", &mut config.namespace);

        read_string("LATTICE_ANALYTICAL_URL", &mut config.analytical.url);
        read_string("LATTICE_ANALYTICAL_DATABASE", &mut config.analytical.database);
        read_string("LATTICE_ANALYTICAL_USER", &mut config.analytical.user);
        read_string("LATTICE_ANALYTICAL_PASSWORD", &mut config.analytical.password);

        read_string("LATTICE_LIVE_HOST", &mut config.live.host);
        read_parsed("LATTICE_LIVE_PORT", &mut config.live.port)?;
        read_string("LATTICE_LIVE_DATABASE", &mut config.live.database);
        read_string("LATTICE_LIVE_USER", &mut config.live.user);
        read_string("LATTICE_LIVE_PASSWORD", &mut config.live.password);
        read_parsed("LATTICE_LIVE_POOL_MAX_SIZE", &mut config.live.pool_max_size)?;

        read_string("LATTICE_FAST_STORE_URL", &mut config.fast_store_url);
        read_string("LATTICE_RELATIONAL_URL", &mut config.relational_url);

        read_parsed("LATTICE_SCHEMA_CACHE_TTL", &mut config.cache_ttl.schema_secs)?;
        read_parsed(
            "LATTICE_WIDGET_CACHE_TTL_ANALYTICAL",
            &mut config.cache_ttl.widget_analytical_secs,
        )?;
        read_parsed("LATTICE_WIDGET_CACHE_TTL_LIVE", &mut config.cache_ttl.widget_live_secs)?;
        read_parsed("LATTICE_PREVIEW_CACHE_TTL", &mut config.cache_ttl.preview_secs)?;

        read_parsed(
            "LATTICE_PREVIEW_MAX_EXECUTION_SECS",
            &mut config.preview_budget.max_execution_secs,
        )?;
        read_parsed(
            "LATTICE_WIDGET_MAX_EXECUTION_SECS",
            &mut config.widget_budget.max_execution_secs,
        )?;

        read_parsed("LATTICE_RATE_LIMIT_DEFAULT", &mut config.rate_limit.default_limit)?;
        read_parsed("LATTICE_RATE_LIMIT_WINDOW_SECS", &mut config.rate_limit.window_secs)?;

        if let Ok(raw) = std::env::var("LATTICE_CORS_ORIGINS") {
            config.cors_origins = serde_json::from_str(&raw).map_err(|e| {
                CoreError::config(format!("LATTICE_CORS_ORIGINS must be a JSON list: {e}"))
            })?;
        }

        read_string("LATTICE_LOG_LEVEL", &mut config.log_level);
        read_string("LATTICE_BIND_ADDR", &mut config.bind_addr);
        read_parsed("LATTICE_LIVE_POLL_SECS", &mut config.live_poll_secs)?;

        config.validate()?;
        Ok(config)
    }

    /// Refuse to start with dev defaults in non-development environments.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` when the development secret leaks
    /// into a non-development environment.
    pub fn validate(&self) -> Result<()> {
        if self.app_env != "development" && self.secret_key == DEV_SECRET {
            return Err(CoreError::config(format!(
                "LATTICE_SECRET_KEY must be set when LATTICE_APP_ENV={}; \
                 the default dev secret is not allowed outside development",
                self.app_env
            )));
        }
        Ok(())
    }
}

fn read_string(var: &str, slot: &mut String) {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn read_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<()> {
    if let Ok(value) = std::env::var(var) {
        *slot = value
            .parse()
            .map_err(|_| CoreError::config(format!("{var} has an invalid value '{value}'")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_development_safe() {
        let config = LatticeConfig::default();
        assert_eq!(config.app_env, "development");
        assert!(config.validate().is_ok());
        assert_eq!(config.preview_budget.max_execution_secs, 3);
        assert_eq!(config.widget_budget.max_execution_secs, 30);
        assert_eq!(config.cache_ttl.widget_live_secs, 30);
    }

    #[test]
    fn test_validate_rejects_dev_secret_in_production() {
        let config = LatticeConfig {
            app_env: "production".to_string(),
            ..LatticeConfig::default()
        };
        let err = config.validate().expect_err("must refuse dev secret");
        assert!(err.to_string().contains("LATTICE_SECRET_KEY"));
    }

    #[test]
    fn test_validate_accepts_real_secret_in_production() {
        let config = LatticeConfig {
            app_env: "production".to_string(),
            secret_key: "a-real-secret-of-reasonable-length".to_string(),
            ..LatticeConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
