//! Property-level diff between desired and recorded state.
//!
//! Desired values are compared with what the snapshot recorded as applied.
//! Names are taken from the union of both sides; a property missing on one
//! side is treated as absent there.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::KindSchema;

/// Desired value of a property at planning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum PlannedValue {
    /// Fully resolved.
    Known(Value),
    /// Depends on outputs produced by this apply.
    Unknown,
    /// Not declared.
    Absent,
}

/// One changed property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Property name.
    pub name: String,
    /// Recorded value.
    pub old: Option<Value>,
    /// Desired value.
    pub new: PlannedValue,
    /// Whether the change forces a replacement.
    pub requires_replace: bool,
}

/// Computes property diffs for one kind.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'a> {
    schema: &'a KindSchema,
}

impl PlannedValue {
    /// Returns the value if it is known.
    #[must_use]
    pub const fn known(&self) -> Option<&Value> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown | Self::Absent => None,
        }
    }
}

impl std::fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Absent => write!(f, "(removed)"),
        }
    }
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine for a kind.
    #[must_use]
    pub const fn new(schema: &'a KindSchema) -> Self {
        Self { schema }
    }

    /// Diffs desired values against recorded ones.
    ///
    /// An `Unknown` value always counts as a change.
    #[must_use]
    pub fn compute_diff(
        &self,
        desired: &BTreeMap<String, PlannedValue>,
        recorded: &BTreeMap<String, Value>,
    ) -> Vec<PropertyChange> {
        let names: BTreeSet<&String> = desired.keys().chain(recorded.keys()).collect();

        names
            .into_iter()
            .filter_map(|name| {
                let old = recorded.get(name);
                let new = desired.get(name).cloned().unwrap_or(PlannedValue::Absent);

                let unchanged = match (&new, old) {
                    (PlannedValue::Known(new), Some(old)) => new == old,
                    (PlannedValue::Absent, None) => true,
                    _ => false,
                };
                if unchanged {
                    return None;
                }

                Some(PropertyChange {
                    name: name.clone(),
                    old: old.cloned(),
                    new,
                    requires_replace: !self.schema.is_updatable(name),
                })
            })
            .collect()
    }

    /// Diffs a resource that does not exist yet.
    #[must_use]
    pub fn creation(desired: &BTreeMap<String, PlannedValue>) -> Vec<PropertyChange> {
        desired
            .iter()
            .map(|(name, new)| PropertyChange {
                name: name.clone(),
                old: None,
                new: new.clone(),
                requires_replace: false,
            })
            .collect()
    }

    /// Diffs a resource that is going away.
    #[must_use]
    pub fn removal(recorded: &BTreeMap<String, Value>) -> Vec<PropertyChange> {
        recorded
            .iter()
            .map(|(name, old)| PropertyChange {
                name: name.clone(),
                old: Some(old.clone()),
                new: PlannedValue::Absent,
                requires_replace: false,
            })
            .collect()
    }
}

/// Builds the change set sent to the provider for an in-place update.
///
/// Only changed properties are included; removed ones map to `null`.
#[must_use]
pub fn update_payload(
    desired: &BTreeMap<String, Value>,
    recorded: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut payload: BTreeMap<String, Value> = desired
        .iter()
        .filter(|(name, value)| recorded.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for name in recorded.keys() {
        if !desired.contains_key(name) {
            payload.insert(name.clone(), Value::Null);
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ResourceKind};
    use serde_json::json;

    fn known(pairs: &[(&str, Value)]) -> BTreeMap<String, PlannedValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), PlannedValue::Known(v.clone())))
            .collect()
    }

    fn raw(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_properties_have_no_diff() {
        let catalog = Catalog::builtin();
        let engine = DiffEngine::new(catalog.schema(ResourceKind::Bucket));

        let diff = engine.compute_diff(
            &known(&[("bucket_name", json!("a")), ("versioned", json!(true))]),
            &raw(&[("bucket_name", json!("a")), ("versioned", json!(true))]),
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_covers_union_of_names() {
        let catalog = Catalog::builtin();
        let engine = DiffEngine::new(catalog.schema(ResourceKind::Bucket));

        let diff = engine.compute_diff(
            &known(&[("bucket_name", json!("b")), ("cors", json!([]))]),
            &raw(&[("bucket_name", json!("a")), ("versioned", json!(true))]),
        );

        let names: Vec<&str> = diff.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bucket_name", "cors", "versioned"]);
        assert!(diff[0].requires_replace);
        assert!(!diff[1].requires_replace);
        assert_eq!(diff[2].new, PlannedValue::Absent);
    }

    #[test]
    fn test_unknown_is_a_change() {
        let catalog = Catalog::builtin();
        let engine = DiffEngine::new(catalog.schema(ResourceKind::Distribution));

        let mut desired = BTreeMap::new();
        desired.insert(String::from("origin_domain_name"), PlannedValue::Unknown);

        let diff = engine.compute_diff(&desired, &raw(&[("origin_domain_name", json!("x"))]));
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].new.to_string(), "(known after apply)");
    }

    #[test]
    fn test_update_payload_nulls_removed() {
        let payload = update_payload(
            &raw(&[("ttl", json!(300)), ("values", json!(["1.2.3.4"]))]),
            &raw(&[("ttl", json!(60)), ("values", json!(["1.2.3.4"])), ("alias_target", json!("x"))]),
        );
        assert_eq!(payload, raw(&[("alias_target", Value::Null), ("ttl", json!(300))]));
    }
}
