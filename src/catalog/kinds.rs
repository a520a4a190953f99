//! Built-in kind schemas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Tag identifying a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// DNS hosted zone.
    HostedZone,
    /// Object storage bucket.
    Bucket,
    /// CDN origin access control.
    OriginAccessControl,
    /// TLS certificate.
    Certificate,
    /// CDN distribution.
    Distribution,
    /// DNS record (alias or plain).
    DnsRecord,
}

/// Lifecycle directive accepted on every kind. It stays with the engine
/// and is never sent to the provider.
pub const REMOVAL_POLICY: &str = "removal_policy";

/// How a replacement is sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOrder {
    /// Provision the replacement, then destroy the original.
    CreateBeforeDelete,
    /// Destroy the original first, accepting a provisioning gap.
    DeleteBeforeCreate,
}

/// Schema entry for one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySchema {
    /// Property name.
    pub name: &'static str,
    /// Whether the property must be declared.
    pub required: bool,
    /// Whether the provider can change the property on a live resource.
    pub updatable: bool,
}

/// Data-driven description of a resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSchema {
    /// Kind this schema describes.
    pub kind: ResourceKind,
    /// Allowed properties.
    pub properties: Vec<PropertySchema>,
    /// Output names produced on create.
    pub outputs: Vec<&'static str>,
    /// Property holding a name that must be unique outside this stack.
    pub unique_name: Option<&'static str>,
    /// Replacement sequencing.
    pub replace_order: ReplaceOrder,
    /// Whether remote operations are safe to repeat after a transient failure.
    pub idempotent: bool,
}

/// Lookup table from kind tag to schema.
#[derive(Debug, Clone)]
pub struct Catalog {
    schemas: BTreeMap<ResourceKind, KindSchema>,
}

const fn prop(name: &'static str, required: bool, updatable: bool) -> PropertySchema {
    PropertySchema {
        name,
        required,
        updatable,
    }
}

impl ResourceKind {
    /// All kinds known to the built-in catalog.
    pub const ALL: [Self; 6] = [
        Self::HostedZone,
        Self::Bucket,
        Self::OriginAccessControl,
        Self::Certificate,
        Self::Distribution,
        Self::DnsRecord,
    ];

    /// Returns the tag used in stack files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostedZone => "hosted_zone",
            Self::Bucket => "bucket",
            Self::OriginAccessControl => "origin_access_control",
            Self::Certificate => "certificate",
            Self::Distribution => "distribution",
            Self::DnsRecord => "dns_record",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KindSchema {
    /// Looks up a property schema by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns true if the kind declares the output.
    #[must_use]
    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains(&name)
    }

    /// Returns true if a change to the property can be applied in place.
    ///
    /// Properties unknown to the schema are treated as requiring replacement.
    #[must_use]
    pub fn is_updatable(&self, name: &str) -> bool {
        self.property(name).is_some_and(|p| p.updatable)
    }

    /// Iterates over required property names.
    pub fn required_properties(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().filter(|p| p.required).map(|p| p.name)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// Builds the catalog of built-in kinds.
    #[must_use]
    pub fn builtin() -> Self {
        let schemas = [
            KindSchema {
                kind: ResourceKind::HostedZone,
                properties: vec![prop("domain_name", true, false), prop("comment", false, true)],
                outputs: vec!["zone_id", "name_servers", "domain_name"],
                unique_name: None,
                replace_order: ReplaceOrder::CreateBeforeDelete,
                idempotent: false,
            },
            KindSchema {
                kind: ResourceKind::Bucket,
                properties: vec![
                    prop("bucket_name", true, false),
                    prop("versioned", false, true),
                    prop("public_read_access", false, true),
                    prop("block_public_access", false, true),
                    prop("cors", false, true),
                    prop("object_lock", false, false),
                ],
                outputs: vec!["bucket_name", "arn", "regional_domain_name"],
                unique_name: Some("bucket_name"),
                replace_order: ReplaceOrder::DeleteBeforeCreate,
                idempotent: false,
            },
            KindSchema {
                kind: ResourceKind::OriginAccessControl,
                properties: vec![
                    prop("name", false, true),
                    prop("origin_type", false, false),
                    prop("signing_behavior", false, true),
                    prop("signing_protocol", false, true),
                ],
                outputs: vec!["id"],
                unique_name: None,
                replace_order: ReplaceOrder::CreateBeforeDelete,
                idempotent: false,
            },
            KindSchema {
                kind: ResourceKind::Certificate,
                properties: vec![
                    prop("domain_name", true, false),
                    prop("subject_alternative_names", false, false),
                    prop("validation_method", false, false),
                    prop("validation_zone_id", false, false),
                ],
                outputs: vec!["arn", "status"],
                unique_name: None,
                replace_order: ReplaceOrder::CreateBeforeDelete,
                idempotent: false,
            },
            KindSchema {
                kind: ResourceKind::Distribution,
                properties: vec![
                    prop("origin_domain_name", true, true),
                    prop("origin_access_control_id", false, true),
                    prop("aliases", false, true),
                    prop("certificate_arn", false, true),
                    prop("minimum_protocol_version", false, true),
                    prop("default_root_object", false, true),
                    prop("viewer_protocol_policy", false, true),
                    prop("allowed_methods", false, true),
                    prop("cached_methods", false, true),
                    prop("cache_policy", false, true),
                    prop("compress", false, true),
                    prop("error_responses", false, true),
                    prop("price_class", false, true),
                ],
                outputs: vec!["distribution_id", "domain_name", "hosted_zone_id"],
                unique_name: None,
                replace_order: ReplaceOrder::CreateBeforeDelete,
                idempotent: false,
            },
            KindSchema {
                kind: ResourceKind::DnsRecord,
                properties: vec![
                    prop("zone_id", true, false),
                    prop("record_name", true, false),
                    prop("record_type", true, false),
                    prop("alias_target", false, true),
                    prop("alias_zone_id", false, true),
                    prop("ttl", false, true),
                    prop("values", false, true),
                ],
                outputs: vec!["fqdn"],
                unique_name: Some("record_name"),
                replace_order: ReplaceOrder::DeleteBeforeCreate,
                idempotent: true,
            },
        ];

        Self {
            schemas: schemas.into_iter().map(|s| (s.kind, s)).collect(),
        }
    }

    /// Replaces the schema of a kind.
    #[must_use]
    pub fn with_schema(mut self, schema: KindSchema) -> Self {
        self.schemas.insert(schema.kind, schema);
        self
    }

    /// Returns the schema of a kind.
    #[must_use]
    pub fn schema(&self, kind: ResourceKind) -> &KindSchema {
        // Catalogs are only built from `builtin`, which covers every kind.
        &self.schemas[&kind]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_schema() {
        let catalog = Catalog::builtin();
        for kind in ResourceKind::ALL {
            let schema = catalog.schema(kind);
            assert_eq!(schema.kind, kind);
            assert!(!schema.outputs.is_empty(), "{kind} has no outputs");
        }
    }

    #[test]
    fn test_kind_tag_roundtrip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("load_balancer".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_updatable_lookup() {
        let catalog = Catalog::builtin();
        let bucket = catalog.schema(ResourceKind::Bucket);
        assert!(bucket.is_updatable("versioned"));
        assert!(!bucket.is_updatable("bucket_name"));
        assert!(!bucket.is_updatable("not_a_property"));
        assert_eq!(bucket.replace_order, ReplaceOrder::DeleteBeforeCreate);
    }

    #[test]
    fn test_schema_override() {
        let mut schema = Catalog::builtin().schema(ResourceKind::Bucket).clone();
        schema.properties = vec![prop("versioned", false, false)];
        let catalog = Catalog::builtin().with_schema(schema);
        let bucket = catalog.schema(ResourceKind::Bucket);
        assert!(!bucket.is_updatable("versioned"));
    }
}
