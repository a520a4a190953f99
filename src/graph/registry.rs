//! Declared resources for one synthesis pass.

use std::collections::BTreeMap;

use serde_json::Value;

use super::value::PropertyValue;
use crate::catalog::{REMOVAL_POLICY, ResourceKind};
use crate::config::StackConfig;
use crate::error::{ConfigError, GraphError, Result};

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Logical id, unique within the stack.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Declared properties.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Explicit ordering hints.
    pub depends_on: Vec<String>,
    /// Declared with `removal_policy: retain`.
    pub retain: bool,
}

impl ResourceSpec {
    /// Creates a spec with no properties.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            retain: false,
        }
    }

    /// Adds a property, parsing references out of the raw value.
    ///
    /// `removal_policy` sets [`ResourceSpec::retain`] instead of becoming a
    /// property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, raw: Value) -> Self {
        let name = name.into();
        if name == REMOVAL_POLICY {
            self.retain = raw.as_str() == Some("retain");
        } else {
            self.properties.insert(name, PropertyValue::parse(&raw));
        }
        self
    }

    /// Adds an explicit ordering hint.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Returns the declared properties in raw stack-file form.
    #[must_use]
    pub fn raw_properties(&self) -> BTreeMap<String, Value> {
        self.properties
            .iter()
            .map(|(name, value)| (name.clone(), value.to_raw()))
            .collect()
    }
}

/// Holds the declared resources, keyed by logical id.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    specs: BTreeMap<String, ResourceSpec>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every resource declared in a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource uses a kind the catalog does not know.
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let mut registry = Self::new();

        for (id, resource) in &config.resources {
            let kind: ResourceKind =
                resource
                    .kind
                    .parse()
                    .map_err(|kind| ConfigError::UnknownKind {
                        resource: id.clone(),
                        kind,
                    })?;

            let mut spec = resource
                .properties
                .iter()
                .fold(ResourceSpec::new(id.clone(), kind), |spec, (name, raw)| {
                    spec.with_property(name.clone(), raw.clone())
                });
            spec.depends_on.clone_from(&resource.depends_on);
            registry.register(spec)?;
        }

        Ok(registry)
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateId` if the id is already registered.
    pub fn register(&mut self, spec: ResourceSpec) -> std::result::Result<(), GraphError> {
        if self.specs.contains_key(&spec.id) {
            return Err(GraphError::DuplicateId { id: spec.id });
        }
        self.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Iterates over every resource in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.values()
    }

    /// Looks up a resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceSpec> {
        self.specs.get(id)
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use serde_json::json;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(ResourceSpec::new("bucket", ResourceKind::Bucket))
            .unwrap();

        let err = registry
            .register(ResourceSpec::new("bucket", ResourceKind::Certificate))
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateId { id: String::from("bucket") });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("bucket").unwrap().kind, ResourceKind::Bucket);
    }

    #[test]
    fn test_all_is_sorted_by_id() {
        let mut registry = ResourceRegistry::new();
        for id in ["zone", "bucket", "cdn"] {
            registry
                .register(ResourceSpec::new(id, ResourceKind::HostedZone))
                .unwrap();
        }
        let ids: Vec<&str> = registry.all().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["bucket", "cdn", "zone"]);
    }

    #[test]
    fn test_from_config_parses_references() {
        let config = ConfigParser::parse_yaml(
            r#"
project:
  name: site
resources:
  bucket:
    kind: bucket
    properties:
      bucket_name: site-assets
  cdn:
    kind: distribution
    properties:
      origin_domain_name: "${bucket.regional_domain_name}"
    depends_on: [bucket]
"#,
        )
        .unwrap();

        let registry = ResourceRegistry::from_config(&config).unwrap();
        let cdn = registry.get("cdn").unwrap();
        assert_eq!(cdn.kind, ResourceKind::Distribution);
        assert_eq!(cdn.depends_on, vec![String::from("bucket")]);
        assert!(!cdn.properties["origin_domain_name"].is_literal());
        assert_eq!(
            registry.get("bucket").unwrap().raw_properties()["bucket_name"],
            json!("site-assets")
        );
    }

    #[test]
    fn test_removal_policy_is_not_a_property() {
        let spec = ResourceSpec::new("bucket", ResourceKind::Bucket)
            .with_property("bucket_name", json!("site-assets"))
            .with_property("removal_policy", json!("retain"));
        assert!(spec.retain);
        assert!(!spec.properties.contains_key("removal_policy"));

        let spec = spec.with_property("removal_policy", json!("destroy"));
        assert!(!spec.retain);
    }

    #[test]
    fn test_from_config_unknown_kind() {
        let config = ConfigParser::parse_yaml(
            r"
project:
  name: site
resources:
  lb:
    kind: load_balancer
",
        )
        .unwrap();

        let err = ResourceRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("load_balancer"));
    }
}
