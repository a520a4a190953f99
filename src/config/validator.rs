//! Stack file validation.
//!
//! Checks everything that can be checked without building the graph:
//! names, backend settings, execution bounds and each resource's property
//! bag against its kind schema. Reference and cycle checks happen later in
//! the graph stage.

use std::collections::BTreeSet;

use tracing::debug;

use super::spec::{
    ExecutionConfig, ProjectConfig, ProviderBackend, ProviderConfig, ResourceConfig, StackConfig,
    StateBackend, StateConfig,
};
use crate::catalog::{Catalog, REMOVAL_POLICY, ResourceKind};
use crate::error::{ConfigError, Result};

/// Accepted values of the `removal_policy` property.
pub const REMOVAL_POLICIES: &[&str] = &["destroy", "retain"];

/// Validator for stack files.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    catalog: Catalog,
}

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors.
    pub errors: Vec<ValidationError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// Field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl ConfigValidator {
    /// Creates a validator over the built-in catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator over a custom catalog.
    #[must_use]
    pub const fn with_catalog(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Collects every problem in the stack file.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_execution(&config.execution, &mut result);

        if config.resources.is_empty() {
            result.warnings.push(String::from("No resources declared in stack"));
        }
        for (id, resource) in &config.resources {
            self.validate_resource(id, resource, &mut result);
        }

        for name in config.outputs.keys() {
            if !is_valid_output_name(name) {
                result.error(
                    format!("outputs.{name}"),
                    format!("Output name '{name}' is invalid. Must be alphanumeric."),
                );
            }
        }

        result
    }

    /// Validates a stack file, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for the first error found.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!(warnings = result.warning_count(), "Stack validation passed");
                Ok(result)
            }
            Some(first) => Err(ConfigError::validation(&first.message, &first.field).into()),
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error("state.bucket", "S3 bucket name is required when using S3 backend");
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        match (&provider.backend, &provider.endpoint) {
            (ProviderBackend::Http, None) => result.warnings.push(String::from(
                "provider.endpoint is not set; plan works but apply needs an endpoint",
            )),
            (ProviderBackend::Http, Some(endpoint))
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
            {
                result.error(
                    "provider.endpoint",
                    format!("Endpoint '{endpoint}' must start with http:// or https://"),
                );
            }
            _ => {}
        }

        if provider.token_env.is_empty() {
            result.error("provider.token_env", "Token variable name cannot be empty");
        }
        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Request timeout must be at least 1 second");
        }
    }

    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.parallelism == 0 {
            result.error("execution.parallelism", "Parallelism must be at least 1");
        } else if execution.parallelism > 16 {
            result.warnings.push(format!(
                "execution.parallelism: {} concurrent operations may hit provider rate limits",
                execution.parallelism
            ));
        }

        if execution.operation_timeout_secs == 0 {
            result.error(
                "execution.operation_timeout_secs",
                "Operation timeout must be at least 1 second",
            );
        }
    }

    fn validate_resource(&self, id: &str, resource: &ResourceConfig, result: &mut ValidationResult) {
        let prefix = format!("resources.{id}");

        if !is_valid_resource_id(id) {
            result.error(
                &prefix,
                format!(
                    "Resource id '{id}' is invalid. Must start with a letter and contain only letters, digits, '_' or '-'."
                ),
            );
        }

        let Ok(kind) = resource.kind.parse::<ResourceKind>() else {
            result.error(
                format!("{prefix}.kind"),
                ConfigError::UnknownKind {
                    resource: id.to_string(),
                    kind: resource.kind.clone(),
                }
                .to_string(),
            );
            return;
        };
        let schema = self.catalog.schema(kind);

        for name in resource.properties.keys() {
            if name != REMOVAL_POLICY && schema.property(name).is_none() {
                result.error(
                    format!("{prefix}.properties.{name}"),
                    format!("Unknown property '{name}' for kind {kind}"),
                );
            }
        }

        for required in schema.required_properties() {
            if !resource.properties.contains_key(required) {
                result.error(
                    format!("{prefix}.properties.{required}"),
                    format!("Missing required property '{required}' for kind {kind}"),
                );
            }
        }

        let mut hints = BTreeSet::new();
        for hint in &resource.depends_on {
            if !hints.insert(hint) {
                result
                    .warnings
                    .push(format!("{prefix}.depends_on: '{hint}' listed more than once"));
            }
        }

        match resource.properties.get(REMOVAL_POLICY) {
            Some(policy) if !policy.as_str().is_some_and(|p| REMOVAL_POLICIES.contains(&p)) => {
                result.error(
                    format!("{prefix}.properties.removal_policy"),
                    format!("removal_policy must be one of {}", REMOVAL_POLICIES.join(", ")),
                );
            }
            None if kind == ResourceKind::Bucket => result.warnings.push(format!(
                "{prefix}: bucket has no removal_policy; it will be deleted with the stack"
            )),
            _ => {}
        }
    }
}

/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Resource ids must be usable inside `${id.output}` references.
fn is_valid_resource_id(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_output_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::StackError;

    fn check(yaml: &str) -> ValidationResult {
        ConfigValidator::new().check(&ConfigParser::parse_yaml(yaml).unwrap())
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("static-site"));
        assert!(is_valid_name("site2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Static"));
        assert!(!is_valid_name("1site"));
        assert!(!is_valid_name("site_"));
        assert!(!is_valid_name("site-"));
        assert!(!is_valid_name("a--b"));
    }

    #[test]
    fn test_resource_id_rules() {
        assert!(is_valid_resource_id("website_bucket"));
        assert!(is_valid_resource_id("cdn-1"));
        assert!(!is_valid_resource_id("1bucket"));
        assert!(!is_valid_resource_id("bucket.name"));
    }

    #[test]
    fn test_valid_stack_passes() {
        let result = check(
            r#"
project:
  name: site
provider:
  endpoint: https://provision.example.com
resources:
  bucket:
    kind: bucket
    properties:
      bucket_name: site-assets
      removal_policy: retain
outputs:
  BucketName:
    value: "${bucket.bucket_name}"
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_schema_errors() {
        let result = check(
            r"
project:
  name: site
resources:
  cdn:
    kind: distribution
    properties:
      price: cheap
  lb:
    kind: load_balancer
",
        );
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"resources.cdn.properties.price"));
        assert!(fields.contains(&"resources.cdn.properties.origin_domain_name"));
        assert!(fields.contains(&"resources.lb.kind"));
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let result = check("project:\n  name: site\nstate:\n  backend: s3\n");
        assert!(result.errors.iter().any(|e| e.field == "state.bucket"));
    }

    #[test]
    fn test_bucket_without_removal_policy_warns() {
        let result = check(
            r"
project:
  name: site
provider:
  backend: memory
resources:
  bucket:
    kind: bucket
    properties:
      bucket_name: site-assets
",
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("removal_policy")));
    }

    #[test]
    fn test_removal_policy_on_any_kind() {
        let result = check(
            r"
project:
  name: site
provider:
  backend: memory
resources:
  zone:
    kind: hosted_zone
    properties:
      domain_name: example.com
      removal_policy: retain
  cert:
    kind: certificate
    properties:
      domain_name: example.com
      removal_policy: keep
",
        );
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["resources.cert.properties.removal_policy"]);
    }

    #[test]
    fn test_validate_returns_first_error() {
        let config = ConfigParser::parse_yaml(
            "project:\n  name: Site\nexecution:\n  parallelism: 0\n",
        )
        .unwrap();
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        match err {
            StackError::Config(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field.as_deref(), Some("project.name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
