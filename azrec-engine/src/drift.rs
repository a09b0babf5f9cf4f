//! Per-field drift suppression.
//!
//! A disabled flow log reports zeroed retention defaults (`days: 0`,
//! `enabled: false`) that differ from the declared configuration without
//! meaning anything. Suppression is asymmetric: it only engages while the
//! parent toggle is off and the declared value is non-empty, and never hides
//! a difference while the feature is enabled.

use serde_json::Value;

use crate::attrs::Attrs;

/// Fields reported with placeholder defaults while the parent toggle is off.
const RETENTION_FIELDS: &[&str] = &["retention_policy.enabled", "retention_policy.days"];

/// Decide whether an observed difference on `field` is meaningful.
///
/// Pure function of its inputs; evaluated once per field per comparison.
pub fn suppress(field: &str, declared: &Value, _observed: &Value, desired: &Attrs) -> bool {
    if desired.bool("enabled").unwrap_or(false) {
        return false;
    }
    RETENTION_FIELDS.contains(&field) && !is_empty(declared)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_i64() == Some(0),
        Value::Bool(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
