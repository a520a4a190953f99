//! In-process provisioning backend.
//!
//! Keeps remote objects in a map. Useful to rehearse a stack end to end
//! without a provisioning API, and as the backend of the engine tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use super::provisioner::Provisioner;
use super::types::{Created, Outputs, Properties};
use crate::catalog::{Catalog, ResourceKind};
use crate::error::ProviderError;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    objects: BTreeMap<String, (ResourceKind, Properties)>,
    calls: Vec<String>,
}

/// Provisioner backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryProvisioner {
    catalog: Catalog,
    inner: Mutex<Inner>,
}

impl MemoryProvisioner {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs derived from properties: a property with the output's name
    /// is echoed, anything else is synthesized from the remote id.
    fn outputs(&self, kind: ResourceKind, remote_id: &str, properties: &Properties) -> Outputs {
        self.catalog
            .schema(kind)
            .outputs
            .iter()
            .map(|name| {
                let value = properties
                    .get(*name)
                    .cloned()
                    .unwrap_or_else(|| Value::String(format!("{remote_id}.{name}")));
                ((*name).to_string(), value)
            })
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ProviderError> {
        self.inner
            .lock()
            .map_err(|e| ProviderError::network(format!("memory backend poisoned: {e}")))
    }

    /// Calls received so far, as `"<op> <kind> <id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|inner| inner.calls.clone()).unwrap_or_default()
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.lock().map(|inner| inner.objects.len()).unwrap_or_default()
    }

    /// Changes an object out of band, as an operator editing it by hand would.
    pub fn tamper(&self, remote_id: &str, name: &str, value: Value) {
        if let Ok(mut inner) = self.lock()
            && let Some((_, properties)) = inner.objects.get_mut(remote_id)
        {
            properties.insert(name.to_string(), value);
        }
    }

    /// Removes an object out of band.
    pub fn forget(&self, remote_id: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.objects.remove(remote_id);
        }
    }
}

#[async_trait]
impl Provisioner for MemoryProvisioner {
    async fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &Properties,
    ) -> Result<Created, ProviderError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let remote_id = format!("{kind}-{}", inner.next_id);

        inner.calls.push(format!("create {kind} {logical_id}"));
        inner
            .objects
            .insert(remote_id.clone(), (kind, properties.clone()));
        debug!(%kind, logical_id, remote_id, "Created in memory");

        Ok(Created {
            outputs: self.outputs(kind, &remote_id, properties),
            remote_id,
        })
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        changes: &Properties,
    ) -> Result<Outputs, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.push(format!("update {kind} {remote_id}"));

        let (_, properties) =
            inner
                .objects
                .get_mut(remote_id)
                .ok_or_else(|| ProviderError::NotFound {
                    remote_id: remote_id.to_string(),
                })?;

        for (name, value) in changes {
            if value.is_null() {
                properties.remove(name);
            } else {
                properties.insert(name.clone(), value.clone());
            }
        }
        let properties = properties.clone();

        Ok(self.outputs(kind, remote_id, &properties))
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.push(format!("delete {kind} {remote_id}"));

        inner
            .objects
            .remove(remote_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            })
    }

    async fn read(
        &self,
        _kind: ResourceKind,
        remote_id: &str,
    ) -> Result<Option<Properties>, ProviderError> {
        let inner = self.lock()?;
        Ok(inner.objects.get(remote_id).map(|(_, p)| p.clone()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_echoes_outputs() {
        let backend = MemoryProvisioner::new();
        let created = backend
            .create(
                ResourceKind::Bucket,
                "assets",
                &props(&[("bucket_name", json!("site-assets"))]),
            )
            .await
            .unwrap();

        assert_eq!(created.remote_id, "bucket-1");
        assert_eq!(created.outputs["bucket_name"], json!("site-assets"));
        assert_eq!(created.outputs["arn"], json!("bucket-1.arn"));
        assert_eq!(backend.calls(), vec!["create bucket assets"]);
    }

    #[tokio::test]
    async fn test_update_merges_and_removes() {
        let backend = MemoryProvisioner::new();
        let created = backend
            .create(
                ResourceKind::Bucket,
                "assets",
                &props(&[("bucket_name", json!("a")), ("versioned", json!(true))]),
            )
            .await
            .unwrap();

        backend
            .update(
                ResourceKind::Bucket,
                &created.remote_id,
                &props(&[("versioned", Value::Null), ("cors", json!([]))]),
            )
            .await
            .unwrap();

        let live = backend
            .read(ResourceKind::Bucket, &created.remote_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live, props(&[("bucket_name", json!("a")), ("cors", json!([]))]));
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let backend = MemoryProvisioner::new();
        let created = backend
            .create(ResourceKind::HostedZone, "zone", &Properties::new())
            .await
            .unwrap();

        backend.delete(ResourceKind::HostedZone, &created.remote_id).await.unwrap();
        let err = backend
            .delete(ResourceKind::HostedZone, &created.remote_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
        assert_eq!(backend.object_count(), 0);
    }
}
