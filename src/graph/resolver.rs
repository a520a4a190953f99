//! Expands property references into dependency edges.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::registry::ResourceRegistry;
use super::value::{PropertyValue, Reference};
use crate::catalog::Catalog;
use crate::error::{GraphError, UnresolvedReason};

/// Ordering constraint between two resources.
///
/// `from` is created or updated before `to`, and `to` is destroyed before
/// `from`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    /// The dependency.
    pub from: String,
    /// The dependent.
    pub to: String,
}

impl DependencyEdge {
    /// Creates an edge.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Validates references against the registry and the kind catalog.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> ReferenceResolver<'a> {
    /// Creates a resolver over a catalog.
    #[must_use]
    pub const fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Produces one edge per distinct (referenced, referencing) pair.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnresolvedReference` for the first reference, in
    /// id then property order, whose target resource or output is missing.
    pub fn resolve(
        &self,
        registry: &ResourceRegistry,
    ) -> Result<BTreeSet<DependencyEdge>, GraphError> {
        let mut edges = BTreeSet::new();

        for spec in registry.all() {
            for (name, value) in &spec.properties {
                for (path, reference) in value.references(name) {
                    self.check(registry, &spec.id, &path, &reference)?;
                    edges.insert(DependencyEdge::new(reference.resource, spec.id.clone()));
                }
            }
        }

        debug!(edges = edges.len(), "Resolved resource references");
        Ok(edges)
    }

    /// Validates the references used by stack outputs.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnresolvedReference` naming the output.
    pub fn check_outputs(
        &self,
        registry: &ResourceRegistry,
        outputs: &BTreeMap<String, PropertyValue>,
    ) -> Result<(), GraphError> {
        for (name, value) in outputs {
            for (path, reference) in value.references(name) {
                self.check(registry, "outputs", &path, &reference)?;
            }
        }
        Ok(())
    }

    fn check(
        &self,
        registry: &ResourceRegistry,
        resource: &str,
        property: &str,
        reference: &Reference,
    ) -> Result<(), GraphError> {
        let reason = match registry.get(&reference.resource) {
            None => Some(UnresolvedReason::MissingResource),
            Some(target) if !self.catalog.schema(target.kind).has_output(&reference.output) => {
                Some(UnresolvedReason::UnknownOutput)
            }
            Some(_) => None,
        };

        match reason {
            Some(reason) => Err(GraphError::UnresolvedReference {
                resource: resource.to_string(),
                property: property.to_string(),
                target: reference.resource.clone(),
                output: reference.output.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceKind;
    use crate::graph::ResourceSpec;
    use serde_json::json;

    fn registry(specs: Vec<ResourceSpec>) -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        registry
    }

    #[test]
    fn test_duplicate_references_collapse() {
        let registry = registry(vec![
            ResourceSpec::new("bucket", ResourceKind::Bucket)
                .with_property("bucket_name", json!("assets")),
            ResourceSpec::new("cdn", ResourceKind::Distribution)
                .with_property("origin_domain_name", json!("${bucket.regional_domain_name}"))
                .with_property("comment", json!("origin ${bucket.bucket_name}")),
        ]);
        let catalog = Catalog::builtin();

        let edges = ReferenceResolver::new(&catalog).resolve(&registry).unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges.contains(&DependencyEdge::new("bucket", "cdn")));
    }

    #[test]
    fn test_missing_resource_is_reported() {
        let registry = registry(vec![
            ResourceSpec::new("record", ResourceKind::DnsRecord)
                .with_property("alias_target", json!({ "dns": "${cdn.domain_name}" })),
        ]);
        let catalog = Catalog::builtin();

        let err = ReferenceResolver::new(&catalog).resolve(&registry).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedReference {
                resource: String::from("record"),
                property: String::from("alias_target.dns"),
                target: String::from("cdn"),
                output: String::from("domain_name"),
                reason: UnresolvedReason::MissingResource,
            }
        );
    }

    #[test]
    fn test_unknown_output_is_reported() {
        let registry = registry(vec![
            ResourceSpec::new("bucket", ResourceKind::Bucket),
            ResourceSpec::new("cdn", ResourceKind::Distribution)
                .with_property("origin_domain_name", json!("${bucket.website_url}")),
        ]);
        let catalog = Catalog::builtin();

        let err = ReferenceResolver::new(&catalog).resolve(&registry).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnresolvedReference { reason: UnresolvedReason::UnknownOutput, .. }
        ));
    }

    #[test]
    fn test_check_outputs() {
        let registry = registry(vec![ResourceSpec::new("cdn", ResourceKind::Distribution)]);
        let catalog = Catalog::builtin();
        let resolver = ReferenceResolver::new(&catalog);

        let mut outputs = BTreeMap::new();
        outputs.insert(
            String::from("WebsiteURL"),
            PropertyValue::parse(&json!("https://${cdn.domain_name}")),
        );
        assert!(resolver.check_outputs(&registry, &outputs).is_ok());

        outputs.insert(
            String::from("BucketName"),
            PropertyValue::parse(&json!("${bucket.bucket_name}")),
        );
        let err = resolver.check_outputs(&registry, &outputs).unwrap_err();
        assert!(err.to_string().contains("outputs.BucketName"));
    }
}
