//! Remote provisioning contract.

use async_trait::async_trait;

use super::types::{Created, Outputs, Properties};
use crate::catalog::ResourceKind;
use crate::error::ProviderError;

/// Operations the engine needs from a provisioning API.
///
/// Every call targets a single remote object. Implementations must not
/// retry on their own; retry policy belongs to the executor, which only
/// repeats calls for kinds declared idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Creates an object and returns its remote id and outputs.
    async fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &Properties,
    ) -> Result<Created, ProviderError>;

    /// Changes properties of a live object in place.
    ///
    /// `changes` holds only the changed properties; a removed property is
    /// sent as `null`.
    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        changes: &Properties,
    ) -> Result<Outputs, ProviderError>;

    /// Deletes an object.
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<(), ProviderError>;

    /// Reads the current properties of an object, `None` if it is gone.
    async fn read(
        &self,
        kind: ResourceKind,
        remote_id: &str,
    ) -> Result<Option<Properties>, ProviderError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
