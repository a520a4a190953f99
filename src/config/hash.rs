//! Deterministic hashing of stack files and property bags.
//!
//! Hashes feed the plan file staleness check and the per-resource
//! `properties_hash` in the state snapshot. Inputs are iterated in sorted
//! order so the same declaration always hashes the same.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::{ResourceConfig, StackConfig};

/// Hasher for stack files and property bags.
#[derive(Debug, Default)]
pub struct ConfigHasher;

/// Serializes a value canonically; object keys are already sorted.
fn canonical(value: &Value) -> String {
    value.to_string()
}

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole stack file.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());
        if let Some(region) = &config.project.region {
            hasher.update(region.as_bytes());
        }

        for (id, resource) in &config.resources {
            hasher.update(id.as_bytes());
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, output) in &config.outputs {
            hasher.update(name.as_bytes());
            hasher.update(canonical(&output.value).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of one resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.kind.as_bytes());
        hasher.update(Self::hash_properties(&resource.properties).as_bytes());

        let mut hints: Vec<&str> = resource.depends_on.iter().map(String::as_str).collect();
        hints.sort_unstable();
        for hint in hints {
            hasher.update(hint.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a property bag.
    #[must_use]
    pub fn hash_properties(properties: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();

        for (name, value) in properties {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(canonical(value).as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Returns the first 8 characters of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use serde_json::json;

    const STACK: &str = r#"
project:
  name: site
resources:
  bucket:
    kind: bucket
    properties:
      bucket_name: assets
      versioned: true
  cdn:
    kind: distribution
    properties:
      origin_domain_name: "${bucket.regional_domain_name}"
"#;

    #[test]
    fn test_config_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let a = ConfigParser::parse_yaml(STACK).unwrap();
        let b = ConfigParser::parse_yaml(STACK).unwrap();
        assert_eq!(hasher.hash_config(&a), hasher.hash_config(&b));
    }

    #[test]
    fn test_config_hash_changes_with_property() {
        let hasher = ConfigHasher::new();
        let a = ConfigParser::parse_yaml(STACK).unwrap();
        let b = ConfigParser::parse_yaml(&STACK.replace("versioned: true", "versioned: false"))
            .unwrap();
        assert_ne!(hasher.hash_config(&a), hasher.hash_config(&b));
    }

    #[test]
    fn test_property_hash_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert(String::from("x"), json!({ "b": 1, "a": 2 }));
        a.insert(String::from("y"), json!("v"));

        let mut b = BTreeMap::new();
        b.insert(String::from("y"), json!("v"));
        b.insert(String::from("x"), json!({ "a": 2, "b": 1 }));

        assert_eq!(ConfigHasher::hash_properties(&a), ConfigHasher::hash_properties(&b));
    }

    #[test]
    fn test_short_hash() {
        let short = ConfigHasher::short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
