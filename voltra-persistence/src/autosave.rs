//! Periodic state saving driven from the bar callback.
//!
//! Timing uses the monotonic clock so wall-clock adjustments cannot stall
//! or double-fire saves. Snapshot construction is lazy: the closure only
//! runs when a save is actually due. Failures are logged and swallowed so
//! a database hiccup never interrupts trading.

use std::time::Instant;

use chrono::Local;
use serde_json::Value;

use crate::repository::StateRepository;

pub struct AutoSave {
    strategy_name: String,
    interval_seconds: f64,
    last_save: Instant,
}

impl AutoSave {
    #[must_use]
    pub fn new(strategy_name: impl Into<String>, interval_seconds: f64) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            interval_seconds,
            last_save: Instant::now(),
        }
    }

    /// Save if the interval elapsed; returns whether a save was attempted.
    pub fn maybe_save(
        &mut self,
        repository: &StateRepository,
        snapshot_fn: impl FnOnce() -> Value,
    ) -> bool {
        if self.last_save.elapsed().as_secs_f64() < self.interval_seconds {
            return false;
        }
        self.do_save(repository, snapshot_fn);
        true
    }

    /// Unconditional save, used on shutdown.
    pub fn force_save(&mut self, repository: &StateRepository, snapshot_fn: impl FnOnce() -> Value) {
        self.do_save(repository, snapshot_fn);
    }

    pub fn reset_timer(&mut self) {
        self.last_save = Instant::now();
    }

    fn do_save(&mut self, repository: &StateRepository, snapshot_fn: impl FnOnce() -> Value) {
        let snapshot = snapshot_fn();
        match repository.save(&self.strategy_name, &snapshot, Local::now()) {
            Ok(()) => {
                self.last_save = Instant::now();
            }
            Err(err) => {
                // Next bar will try again.
                tracing::error!(
                    strategy = %self.strategy_name,
                    error = %err,
                    "auto-save failed"
                );
            }
        }
    }
}
