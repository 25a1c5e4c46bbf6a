//! Append-only snapshot repository over the relational store.
//!
//! Every save inserts a new row; load picks the newest row per strategy.
//! A missing archive is a normal outcome, a broken one is not.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::serializer::{JsonSerializer, CURRENT_SCHEMA_VERSION};
use crate::PersistenceError;

const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS strategy_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_name TEXT NOT NULL,
    snapshot_json TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    saved_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_strategy_state_name_saved
    ON strategy_state (strategy_name, saved_at);
"#;

/// Result of a load: an archive either exists or it does not.
#[derive(Debug)]
pub enum LoadOutcome {
    Found(Value),
    NotFound { strategy_name: String },
}

impl LoadOutcome {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Strategy state repository backed by the shared database connection.
pub struct StateRepository {
    conn: Arc<Mutex<Connection>>,
    serializer: JsonSerializer,
}

impl StateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self, PersistenceError> {
        {
            let guard = conn.lock().expect("database mutex poisoned");
            guard.execute_batch(STATE_SCHEMA)?;
        }
        Ok(Self {
            conn,
            serializer: JsonSerializer::new(),
        })
    }

    /// Convenience constructor opening a dedicated store file.
    pub fn open(path: &std::path::Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Self::new(Arc::new(Mutex::new(conn)))
    }

    /// Append one snapshot row.
    pub fn save(
        &self,
        strategy_name: &str,
        snapshot: &Value,
        now: DateTime<Local>,
    ) -> Result<(), PersistenceError> {
        let json_text = self.serializer.serialize(snapshot)?;
        let guard = self.conn.lock().expect("database mutex poisoned");
        guard.execute(
            "INSERT INTO strategy_state (strategy_name, snapshot_json, schema_version, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                strategy_name,
                json_text,
                CURRENT_SCHEMA_VERSION,
                now.to_rfc3339()
            ],
        )?;
        tracing::info!(strategy_name, "strategy state saved");
        Ok(())
    }

    /// Load the newest snapshot for a strategy.
    ///
    /// No rows is `NotFound`; a row that fails to decode raises
    /// [`PersistenceError::Corruption`] carrying the strategy name and the
    /// original parse error.
    pub fn load(&self, strategy_name: &str) -> Result<LoadOutcome, PersistenceError> {
        let raw: Option<String> = {
            let guard = self.conn.lock().expect("database mutex poisoned");
            guard
                .query_row(
                    "SELECT snapshot_json FROM strategy_state
                     WHERE strategy_name = ?1 ORDER BY saved_at DESC LIMIT 1",
                    params![strategy_name],
                    |row| row.get(0),
                )
                .optional()?
        };

        let Some(raw) = raw else {
            tracing::info!(strategy_name, "no strategy state archive found");
            return Ok(LoadOutcome::NotFound {
                strategy_name: strategy_name.to_string(),
            });
        };

        match self.serializer.deserialize(&raw) {
            Ok(value) => {
                tracing::info!(strategy_name, "strategy state loaded");
                Ok(LoadOutcome::Found(value))
            }
            Err(err) => Err(PersistenceError::Corruption {
                strategy_name: strategy_name.to_string(),
                detail: err.to_string(),
            }),
        }
    }

    /// True iff the newest row parses as JSON and carries `schema_version`.
    #[must_use]
    pub fn verify_integrity(&self, strategy_name: &str) -> bool {
        let raw: Option<String> = {
            let guard = self.conn.lock().expect("database mutex poisoned");
            guard
                .query_row(
                    "SELECT snapshot_json FROM strategy_state
                     WHERE strategy_name = ?1 ORDER BY saved_at DESC LIMIT 1",
                    params![strategy_name],
                    |row| row.get(0),
                )
                .optional()
                .unwrap_or(None)
        };
        let Some(raw) = raw else { return false };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value.get("schema_version").is_some(),
            Err(_) => false,
        }
    }

    /// Delete snapshots older than `keep_days`; returns the removed count.
    pub fn cleanup(
        &self,
        strategy_name: &str,
        keep_days: i64,
        now: DateTime<Local>,
    ) -> Result<usize, PersistenceError> {
        let cutoff = (now - Duration::days(keep_days)).to_rfc3339();
        let guard = self.conn.lock().expect("database mutex poisoned");
        let deleted = guard.execute(
            "DELETE FROM strategy_state WHERE strategy_name = ?1 AND saved_at < ?2",
            params![strategy_name, cutoff],
        )?;
        tracing::info!(strategy_name, deleted, "old snapshots cleaned up");
        Ok(deleted)
    }

    /// Raw row insert for tests that need to stage broken data.
    #[doc(hidden)]
    pub fn insert_raw(
        &self,
        strategy_name: &str,
        snapshot_json: &str,
        saved_at: DateTime<Local>,
    ) -> Result<(), PersistenceError> {
        let guard = self.conn.lock().expect("database mutex poisoned");
        guard.execute(
            "INSERT INTO strategy_state (strategy_name, snapshot_json, schema_version, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![strategy_name, snapshot_json, 0, saved_at.to_rfc3339()],
        )?;
        Ok(())
    }
}
