//! Stack file types.
//!
//! These structs map one-to-one onto `stackplan.yaml`. Resource properties
//! are kept as raw JSON values here; references inside them are parsed
//! when the resources are registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provisioning API configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Apply behaviour.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Declared resources by logical id.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
    /// Values exposed after apply.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Environment (e.g. "dev", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Default region passed to the provider.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (s3 backend).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (s3 backend).
    #[serde(default)]
    pub region: Option<String>,
    /// State file path (local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local JSON file.
    #[default]
    Local,
    /// S3 object.
    S3,
}

/// Provisioning API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: ProviderBackend,
    /// Base URL of the provisioning API (http backend).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// JSON over HTTP.
    #[default]
    Http,
    /// In-process rehearsal backend.
    Memory,
}

/// Apply behaviour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum concurrently in-flight remote operations.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Timeout for a single remote call, in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// Extra attempts for idempotent kinds after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Kind tag from the catalog.
    pub kind: String,
    /// Property bag; strings may contain `${id.output}` references.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Explicit ordering hints.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A declared stack output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Value; may contain references.
    pub value: Value,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

const fn default_parallelism() -> usize {
    1
}

const fn default_operation_timeout() -> u64 {
    300
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_retry_delay() -> u64 {
    1000
}

const fn default_request_timeout() -> u64 {
    60
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_token_env() -> String {
    String::from("STACKPLAN_API_TOKEN")
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::default(),
            endpoint: None,
            token_env: default_token_env(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            operation_timeout_secs: default_operation_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl StackConfig {
    /// Returns the project name qualified with the environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns the declared resource ids.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: StackConfig = serde_yaml::from_str("project:\n  name: site\n").unwrap();
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.backend, ProviderBackend::Http);
        assert_eq!(config.provider.token_env, "STACKPLAN_API_TOKEN");
        assert_eq!(config.execution, ExecutionConfig::default());
        assert_eq!(config.execution.parallelism, 1);
        assert!(config.resources.is_empty());
        assert_eq!(config.qualified_name(), "site-dev");
    }

    #[test]
    fn test_resource_properties_keep_types() {
        let config: StackConfig = serde_yaml::from_str(
            r"
project:
  name: site
resources:
  bucket:
    kind: bucket
    properties:
      versioned: false
      cors:
        - allowed_methods: [GET, HEAD]
",
        )
        .unwrap();

        let bucket = &config.resources["bucket"];
        assert_eq!(bucket.properties["versioned"], Value::Bool(false));
        assert!(bucket.properties["cors"].is_array());
        assert_eq!(config.resource_ids(), vec!["bucket"]);
    }
}
