//! JSON snapshot codec with typed markers and the schema migration chain.
//!
//! Values that plain JSON cannot represent faithfully (datetimes, dates,
//! enums, sets, bar-history tables) travel as marker objects:
//! `{"__datetime__": iso8601}`, `{"__date__": iso8601}`,
//! `{"__enum__": "Type.VALUE"}`, `{"__set__": true, "values": [...]}`,
//! `{"__dataframe__": true, "records": [...]}`. The decoder validates the
//! markers it knows and passes unknown ones through untouched.

use chrono::{DateTime, Local, NaiveDate};
use serde_json::{json, Map, Value};

use crate::PersistenceError;

/// Schema version written into every new snapshot.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Marker constructors and readers.
pub mod markers {
    use super::*;

    #[must_use]
    pub fn datetime(value: DateTime<Local>) -> Value {
        json!({ "__datetime__": value.to_rfc3339() })
    }

    #[must_use]
    pub fn date(value: NaiveDate) -> Value {
        json!({ "__date__": value.format("%Y-%m-%d").to_string() })
    }

    #[must_use]
    pub fn enum_value(type_name: &str, variant: &str) -> Value {
        json!({ "__enum__": format!("{type_name}.{variant}") })
    }

    #[must_use]
    pub fn set(values: Vec<Value>) -> Value {
        json!({ "__set__": true, "values": values })
    }

    /// Tabular data (e.g., bar history) as a list of row records.
    #[must_use]
    pub fn dataframe(records: Vec<Value>) -> Value {
        json!({ "__dataframe__": true, "records": records })
    }

    pub fn read_datetime(value: &Value) -> Option<DateTime<Local>> {
        let raw = value.get("__datetime__")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Local))
    }

    pub fn read_date(value: &Value) -> Option<NaiveDate> {
        let raw = value.get("__date__")?.as_str()?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }

    pub fn read_set(value: &Value) -> Option<&Vec<Value>> {
        if value.get("__set__")?.as_bool()? {
            value.get("values")?.as_array()
        } else {
            None
        }
    }

    pub fn read_dataframe(value: &Value) -> Option<&Vec<Value>> {
        if value.get("__dataframe__")?.as_bool()? {
            value.get("records")?.as_array()
        } else {
            None
        }
    }

    /// Does this object carry any `__marker__`-style key?
    #[must_use]
    pub fn is_marker(value: &Value) -> bool {
        value.as_object().is_some_and(|map| {
            map.keys()
                .any(|k| k.starts_with("__") && k.ends_with("__"))
        })
    }
}

type Migration = fn(Value) -> Result<Value, PersistenceError>;

/// Ordered `v_n -> v_{n+1}` upgrade steps. Registration is append-only:
/// once a step ships it never changes.
pub struct MigrationChain {
    /// `steps[i]` upgrades a snapshot from version `i + 1` to `i + 2`.
    steps: Vec<Migration>,
}

impl Default for MigrationChain {
    fn default() -> Self {
        // Version 1 is current; the chain is empty until version 2 exists.
        Self { steps: Vec::new() }
    }
}

impl MigrationChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn latest_version(&self) -> i64 {
        self.steps.len() as i64 + 1
    }

    /// Upgrade a decoded snapshot to the latest version in sequence.
    pub fn upgrade(&self, mut snapshot: Value) -> Result<Value, PersistenceError> {
        let version = snapshot
            .get("schema_version")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                PersistenceError::Migration("snapshot carries no schema_version".into())
            })?;
        if version < 1 || version > self.latest_version() {
            return Err(PersistenceError::Migration(format!(
                "unsupported schema version {version}"
            )));
        }
        for step in &self.steps[(version - 1) as usize..] {
            snapshot = step(snapshot)?;
        }
        Ok(snapshot)
    }
}

/// Snapshot codec: compact JSON text on the outside, marker-validated
/// `Value` trees on the inside.
#[derive(Default)]
pub struct JsonSerializer {
    migrations: MigrationChain,
}

impl JsonSerializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_migrations(migrations: MigrationChain) -> Self {
        Self { migrations }
    }

    /// Wrap aggregate state into the versioned top-level snapshot document.
    #[must_use]
    pub fn build_snapshot(
        target_aggregate: Value,
        position_aggregate: Value,
        current_dt: DateTime<Local>,
    ) -> Value {
        json!({
            "schema_version": CURRENT_SCHEMA_VERSION,
            "saved_at": markers::datetime(current_dt),
            "target_aggregate": target_aggregate,
            "position_aggregate": position_aggregate,
            "current_dt": markers::datetime(current_dt),
        })
    }

    pub fn serialize(&self, snapshot: &Value) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string(snapshot)?)
    }

    /// Parse, migrate and validate a stored snapshot.
    pub fn deserialize(&self, raw: &str) -> Result<Value, PersistenceError> {
        let parsed: Value = serde_json::from_str(raw)?;
        let migrated = self.migrations.upgrade(parsed)?;
        Ok(Self::decode_value(migrated))
    }

    /// Recursive marker pass: known markers are validated and normalized,
    /// unknown markers and plain values pass through unchanged.
    fn decode_value(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(dt) = markers::read_datetime(&Value::Object(map.clone())) {
                    return markers::datetime(dt);
                }
                let as_value = Value::Object(map.clone());
                if let Some(date) = markers::read_date(&as_value) {
                    return markers::date(date);
                }
                let decoded: Map<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| (k, Self::decode_value(v)))
                    .collect();
                Value::Object(decoded)
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(Self::decode_value).collect())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_dt() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 10, 15, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_document_has_the_contract_shape() {
        let snapshot = JsonSerializer::build_snapshot(json!({"a": 1}), json!({"b": 2}), sample_dt());
        assert_eq!(snapshot["schema_version"], CURRENT_SCHEMA_VERSION);
        assert!(markers::read_datetime(&snapshot["saved_at"]).is_some());
        assert_eq!(snapshot["target_aggregate"]["a"], 1);
    }

    #[test]
    fn round_trip_preserves_markers_and_unknowns() {
        let serializer = JsonSerializer::new();
        let document = json!({
            "schema_version": 1,
            "saved_at": markers::datetime(sample_dt()),
            "target_aggregate": {
                "bars": markers::dataframe(vec![json!({"close": 4000.0})]),
                "state": markers::enum_value("Direction", "SHORT"),
            },
            "position_aggregate": {
                "managed": markers::set(vec![json!("rb2505P3900.SHFE")]),
                "last_trading_date": markers::date(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()),
            },
            "current_dt": markers::datetime(sample_dt()),
            "extra": { "__custom__": true, "payload": [1, 2, 3] },
        });

        let text = serializer.serialize(&document).unwrap();
        let restored = serializer.deserialize(&text).unwrap();

        assert_eq!(
            markers::read_datetime(&restored["current_dt"]).unwrap(),
            sample_dt()
        );
        assert_eq!(
            markers::read_date(&restored["position_aggregate"]["last_trading_date"]).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
        );
        assert_eq!(
            markers::read_set(&restored["position_aggregate"]["managed"]).unwrap().len(),
            1
        );
        assert_eq!(
            markers::read_dataframe(&restored["target_aggregate"]["bars"]).unwrap()[0]["close"],
            4000.0
        );
        // Unknown markers pass through untouched.
        assert_eq!(restored["extra"]["__custom__"], true);
        assert_eq!(restored["extra"]["payload"][2], 3);
        // Enum markers are opaque strings.
        assert_eq!(
            restored["target_aggregate"]["state"]["__enum__"],
            "Direction.SHORT"
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        let serializer = JsonSerializer::new();
        assert!(serializer.deserialize("{not json").is_err());
    }

    #[test]
    fn snapshot_without_version_fails_migration() {
        let serializer = JsonSerializer::new();
        let result = serializer.deserialize(r#"{"saved_at": "x"}"#);
        assert!(matches!(result, Err(PersistenceError::Migration(_))));
    }

    #[test]
    fn future_versions_are_rejected() {
        let serializer = JsonSerializer::new();
        let result = serializer.deserialize(r#"{"schema_version": 99}"#);
        assert!(matches!(result, Err(PersistenceError::Migration(_))));
    }

    #[test]
    fn migration_steps_apply_in_sequence() {
        fn v1_to_v2(mut value: Value) -> Result<Value, PersistenceError> {
            value["schema_version"] = json!(2);
            value["renamed"] = value["legacy"].take();
            Ok(value)
        }
        let chain = MigrationChain { steps: vec![v1_to_v2] };
        assert_eq!(chain.latest_version(), 2);
        let upgraded = chain
            .upgrade(json!({"schema_version": 1, "legacy": "x"}))
            .unwrap();
        assert_eq!(upgraded["schema_version"], 2);
        assert_eq!(upgraded["renamed"], "x");

        // Already current: chain is a pass-through.
        let current = chain.upgrade(json!({"schema_version": 2})).unwrap();
        assert_eq!(current["schema_version"], 2);
    }

    #[test]
    fn marker_detection() {
        assert!(markers::is_marker(&markers::datetime(sample_dt())));
        assert!(markers::is_marker(&json!({"__weird__": 1})));
        assert!(!markers::is_marker(&json!({"plain": 1})));
    }
}
