//! Persistence: the typed-marker JSON snapshot codec with its migration
//! chain, the append-only state repository, periodic auto-save, the
//! env-validated database factory and the monitor table writer.

mod autosave;
mod database;
mod monitor;
mod repository;
mod serializer;

pub use autosave::AutoSave;
pub use database::{validate_env_vars, DatabaseConfig, DatabaseFactory, REQUIRED_ENV_VARS};
pub use monitor::MonitorWriter;
pub use repository::{LoadOutcome, StateRepository};
pub use serializer::{markers, JsonSerializer, MigrationChain, CURRENT_SCHEMA_VERSION};

use thiserror::Error;

/// Failures surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Required environment variables are missing; startup must abort.
    #[error("missing required environment variables: {}", missing.join(", "))]
    Config { missing: Vec<String> },
    /// The database could not be reached or validated in time.
    #[error("failed to connect to database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: rusqlite::Error,
    },
    /// A stored snapshot exists but cannot be decoded. Human intervention
    /// required; the supervisor must not restart into this.
    #[error("state record corrupted for strategy {strategy_name}: {detail}")]
    Corruption {
        strategy_name: String,
        detail: String,
    },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("migration error: {0}")]
    Migration(String),
}
