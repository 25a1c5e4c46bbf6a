//! Process-wide database factory with fail-fast environment validation.
//!
//! Connection settings come from the `VNPY_DATABASE_*` environment
//! variables only. Missing variables abort startup with the full list;
//! there is no fallback to an implicit default store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rusqlite::Connection;

use crate::PersistenceError;

/// Variables that must be present (and non-blank) at startup.
pub const REQUIRED_ENV_VARS: [&str; 5] = [
    "VNPY_DATABASE_DRIVER",
    "VNPY_DATABASE_HOST",
    "VNPY_DATABASE_DATABASE",
    "VNPY_DATABASE_USER",
    "VNPY_DATABASE_PASSWORD",
];

/// Names of required variables that are missing or blank, in declaration
/// order.
#[must_use]
pub fn validate_env_vars() -> Vec<String> {
    REQUIRED_ENV_VARS
        .iter()
        .filter(|name| {
            std::env::var(name)
                .map(|value| value.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|name| (*name).to_string())
        .collect()
}

/// Connection settings resolved from the environment.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl DatabaseConfig {
    /// Read and validate the environment; missing variables are an error
    /// listing exactly the absent names.
    pub fn from_env() -> Result<Self, PersistenceError> {
        let missing = validate_env_vars();
        if !missing.is_empty() {
            return Err(PersistenceError::Config { missing });
        }
        let port = std::env::var("VNPY_DATABASE_PORT")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(3306);
        Ok(Self {
            driver: std::env::var("VNPY_DATABASE_DRIVER").unwrap_or_default(),
            host: std::env::var("VNPY_DATABASE_HOST").unwrap_or_default(),
            port,
            database: std::env::var("VNPY_DATABASE_DATABASE").unwrap_or_default(),
            user: std::env::var("VNPY_DATABASE_USER").unwrap_or_default(),
        })
    }

    /// Store location derived from the configured database name.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.db", self.database))
    }
}

static GLOBAL: Lazy<Mutex<Option<Arc<DatabaseFactory>>>> = Lazy::new(|| Mutex::new(None));

/// Singleton owner of the shared database connection.
pub struct DatabaseFactory {
    config: DatabaseConfig,
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseFactory {
    /// Build the factory: validate the environment, open the store and
    /// verify the connection within `timeout_seconds`.
    pub fn initialize(timeout_seconds: f64) -> Result<Self, PersistenceError> {
        let config = DatabaseConfig::from_env()?;
        let conn = Self::open_and_validate(&config, timeout_seconds)?;
        tracing::info!(
            driver = %config.driver,
            host = %config.host,
            database = %config.database,
            "database factory initialized"
        );
        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_and_validate(
        config: &DatabaseConfig,
        timeout_seconds: f64,
    ) -> Result<Connection, PersistenceError> {
        let open = || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open(config.storage_path())?;
            conn.busy_timeout(std::time::Duration::from_secs_f64(timeout_seconds))?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(conn)
        };
        open().map_err(|source| PersistenceError::Connection {
            database: format!("{}@{}", config.database, config.host),
            source,
        })
    }

    /// Process-wide instance, created on first use.
    pub fn global(timeout_seconds: f64) -> Result<Arc<Self>, PersistenceError> {
        let mut slot = GLOBAL.lock().expect("factory mutex poisoned");
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let factory = Arc::new(Self::initialize(timeout_seconds)?);
        *slot = Some(Arc::clone(&factory));
        Ok(factory)
    }

    /// Drop the singleton. Tests only.
    pub fn reset_global() {
        let mut slot = GLOBAL.lock().expect("factory mutex poisoned");
        *slot = None;
    }

    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Cheap liveness probe on the shared connection.
    #[must_use]
    pub fn validate_connection(&self) -> bool {
        let guard = self.conn.lock().expect("database mutex poisoned");
        guard
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::MutexGuard;

    // Environment mutation is process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in REQUIRED_ENV_VARS {
            std::env::remove_var(name);
        }
        std::env::remove_var("VNPY_DATABASE_PORT");
        guard
    }

    fn set_all_env(database: &str) {
        std::env::set_var("VNPY_DATABASE_DRIVER", "sqlite");
        std::env::set_var("VNPY_DATABASE_HOST", "localhost");
        std::env::set_var("VNPY_DATABASE_DATABASE", database);
        std::env::set_var("VNPY_DATABASE_USER", "trader");
        std::env::set_var("VNPY_DATABASE_PASSWORD", "secret");
    }

    #[test]
    fn validate_reports_exactly_the_missing_names() {
        let _guard = clear_env();
        let missing = validate_env_vars();
        assert_eq!(missing.len(), REQUIRED_ENV_VARS.len());

        std::env::set_var("VNPY_DATABASE_DRIVER", "sqlite");
        std::env::set_var("VNPY_DATABASE_HOST", "  "); // blank counts as missing
        let missing = validate_env_vars();
        assert!(!missing.contains(&"VNPY_DATABASE_DRIVER".to_string()));
        assert!(missing.contains(&"VNPY_DATABASE_HOST".to_string()));
        assert!(missing.contains(&"VNPY_DATABASE_PASSWORD".to_string()));
    }

    #[test]
    fn config_from_env_fails_fast_with_the_list() {
        let _guard = clear_env();
        let err = DatabaseConfig::from_env().unwrap_err();
        match err {
            PersistenceError::Config { missing } => {
                assert_eq!(missing.len(), REQUIRED_ENV_VARS.len());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn config_reads_port_with_default() {
        let _guard = clear_env();
        set_all_env("voltra_test_cfg");
        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.port, 3306);

        std::env::set_var("VNPY_DATABASE_PORT", "3307");
        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.port, 3307);
        assert_eq!(config.storage_path(), PathBuf::from("voltra_test_cfg.db"));
    }

    #[test]
    fn factory_initializes_against_a_real_store() {
        let _guard = clear_env();
        let dir = tempfile::tempdir().unwrap();
        let db_name = dir.path().join("factory_check").display().to_string();
        set_all_env(&db_name);

        let factory = DatabaseFactory::initialize(5.0).unwrap();
        assert!(factory.validate_connection());
        assert_eq!(factory.config().user, "trader");
    }
}
