//! Dashboard-facing monitor tables: one latest snapshot per variant plus an
//! append-only, idempotent event stream. Writes are best-effort; the
//! dashboard is never allowed to take the engine down.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::PersistenceError;

const MONITOR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS monitor_signal_snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    variant TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    bar_dt TEXT,
    payload_json TEXT NOT NULL,
    UNIQUE (variant, instance_id)
);
CREATE TABLE IF NOT EXISTS monitor_signal_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    variant TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    vt_symbol TEXT NOT NULL,
    bar_dt TEXT,
    event_type TEXT NOT NULL,
    event_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    payload_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_monitor_event_variant_created
    ON monitor_signal_event (variant, created_at);
"#;

/// Writer scoped to one `(variant, instance)` strategy identity.
pub struct MonitorWriter {
    conn: Arc<Mutex<Connection>>,
    variant: String,
    instance_id: String,
}

impl MonitorWriter {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        variant: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        {
            let guard = conn.lock().expect("database mutex poisoned");
            guard.execute_batch(MONITOR_SCHEMA)?;
        }
        Ok(Self {
            conn,
            variant: variant.into(),
            instance_id: instance_id.into(),
        })
    }

    /// Upsert this variant's latest snapshot row.
    pub fn write_snapshot(
        &self,
        payload: &Value,
        bar_dt: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) {
        let result = || -> Result<(), PersistenceError> {
            let text = serde_json::to_string(payload)?;
            let guard = self.conn.lock().expect("database mutex poisoned");
            guard.execute(
                "INSERT INTO monitor_signal_snapshot
                     (variant, instance_id, updated_at, bar_dt, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (variant, instance_id) DO UPDATE SET
                     updated_at = excluded.updated_at,
                     bar_dt = excluded.bar_dt,
                     payload_json = excluded.payload_json",
                params![
                    self.variant,
                    self.instance_id,
                    now.to_rfc3339(),
                    bar_dt.map(|dt| dt.to_rfc3339()),
                    text
                ],
            )?;
            Ok(())
        }();
        if let Err(err) = result {
            tracing::warn!(error = %err, "monitor snapshot write failed");
        }
    }

    /// Append one event; duplicate idempotency keys are silently dropped.
    ///
    /// Returns whether a new row was written.
    pub fn record_event(
        &self,
        vt_symbol: &str,
        bar_dt: Option<DateTime<Local>>,
        event_type: &str,
        extra_key: &str,
        payload: &Value,
        now: DateTime<Local>,
    ) -> bool {
        let bar_key = bar_dt.map(|dt| dt.to_rfc3339()).unwrap_or_default();
        let event_key = format!(
            "{}|{}|{}|{}|{}{}",
            self.variant, self.instance_id, vt_symbol, bar_key, event_type, extra_key
        );
        let result = || -> Result<usize, PersistenceError> {
            let text = serde_json::to_string(payload)?;
            let guard = self.conn.lock().expect("database mutex poisoned");
            let inserted = guard.execute(
                "INSERT OR IGNORE INTO monitor_signal_event
                     (variant, instance_id, vt_symbol, bar_dt, event_type, event_key,
                      created_at, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    self.variant,
                    self.instance_id,
                    vt_symbol,
                    bar_dt.map(|dt| dt.to_rfc3339()),
                    event_type,
                    event_key,
                    now.to_rfc3339(),
                    text
                ],
            )?;
            Ok(inserted)
        }();
        match result {
            Ok(inserted) => inserted > 0,
            Err(err) => {
                tracing::warn!(error = %err, "monitor event write failed");
                false
            }
        }
    }
}
