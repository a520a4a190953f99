//! Remote provisioning backends.
//!
//! The engine talks to the outside world only through [`Provisioner`].
//! Two backends are provided:
//! - [`HttpProvisioner`]: a JSON API over HTTP with bearer authentication
//! - [`MemoryProvisioner`]: an in-process map, for rehearsals and tests

mod http;
mod memory;
mod provisioner;
mod types;

pub use http::HttpProvisioner;
pub use memory::MemoryProvisioner;
#[cfg(test)]
pub use provisioner::MockProvisioner;
pub use provisioner::Provisioner;
pub use types::{Created, Outputs, Properties};

use crate::config::{ConfigParser, ProviderBackend, StackConfig};
use crate::error::{ConfigError, Result};

/// Builds the backend selected in the stack file.
///
/// # Errors
///
/// Returns an error if the HTTP backend has no endpoint or token, or the
/// endpoint is invalid.
pub fn build_provisioner(config: &StackConfig) -> Result<Box<dyn Provisioner>> {
    match config.provider.backend {
        ProviderBackend::Memory => Ok(Box::new(MemoryProvisioner::new())),
        ProviderBackend::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation(
                    "provider.endpoint is required for the http backend",
                    "provider.endpoint",
                )
            })?;
            let token = ConfigParser::api_token(config)?;
            let client = HttpProvisioner::new(endpoint, &token, config.provider.timeout_secs)?;
            Ok(Box::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_selected() {
        let config = ConfigParser::parse_yaml(
            r"
project:
  name: site
provider:
  backend: memory
",
        )
        .unwrap();
        assert_eq!(build_provisioner(&config).unwrap().name(), "memory");
    }

    #[test]
    fn test_http_backend_needs_endpoint() {
        let config = ConfigParser::parse_yaml(
            r"
project:
  name: site
provider:
  backend: http
",
        )
        .unwrap();
        assert!(build_provisioner(&config).is_err());
    }
}
