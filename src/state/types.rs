//! State snapshot types.
//!
//! The snapshot is the only data that outlives a single run. It records,
//! per logical id, what was last confirmed to exist remotely: the resolved
//! properties as applied, the provider-assigned id and the outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::catalog::ResourceKind;
use crate::config::ConfigHasher;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// Last-known remote representation of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Incremented on every persisted write.
    pub serial: u64,
    /// Identifies this state's history across serials.
    pub lineage: String,
    /// Hash of the last applied stack file.
    #[serde(default)]
    pub config_hash: String,
    /// Recorded resources by logical id.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Evaluated stack outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// When the snapshot was last changed.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Recorded state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Logical id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Provider-assigned identifier.
    pub remote_id: String,
    /// Resolved properties as applied.
    pub properties: BTreeMap<String, Value>,
    /// Hash of `properties`.
    pub properties_hash: String,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Logical ids this resource depended on when last applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Replaced objects not yet deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<DeposedObject>,
    /// Forget instead of deleting the remote object on removal.
    #[serde(default)]
    pub retain: bool,
    /// When the remote object was created.
    pub created_at: DateTime<Utc>,
    /// When the entry was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Remote object superseded by a create-before-delete replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeposedObject {
    /// Provider-assigned identifier of the old object.
    pub remote_id: String,
    /// Kind the old object was created as.
    pub kind: ResourceKind,
    /// Whether the old object is kept when it is purged.
    #[serde(default)]
    pub retain: bool,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: StackOperation,
    /// Stack file hash at the time.
    pub config_hash: String,
    /// Resources touched.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Error message for failed runs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StackOperation {
    /// Plan applied.
    Apply,
    /// Every resource destroyed.
    Destroy,
    /// Recorded properties refreshed from the provider.
    Refresh,
}

impl StateSnapshot {
    /// Creates an empty snapshot with a fresh lineage.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by logical id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Gets a mutable resource by logical id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut ResourceState> {
        self.resources.get_mut(id)
    }

    /// Adds or replaces a resource.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.id.clone(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource.
    pub fn remove_resource(&mut self, id: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns a recorded output value.
    #[must_use]
    pub fn output(&self, id: &str, output: &str) -> Option<&Value> {
        self.resources.get(id)?.outputs.get(output)
    }

    /// Marks a new persisted revision.
    pub fn bump_serial(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all recorded logical ids.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceState {
    /// Creates a resource entry for a freshly created remote object.
    #[must_use]
    pub fn new(
        id: &str,
        kind: ResourceKind,
        remote_id: &str,
        properties: BTreeMap<String, Value>,
        outputs: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            remote_id: remote_id.to_string(),
            properties_hash: ConfigHasher::hash_properties(&properties),
            properties,
            outputs,
            dependencies: Vec::new(),
            deposed: Vec::new(),
            retain: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the recorded properties.
    pub fn set_properties(&mut self, properties: BTreeMap<String, Value>) {
        self.properties_hash = ConfigHasher::hash_properties(&properties);
        self.properties = properties;
        self.updated_at = Utc::now();
    }

    /// Merges outputs reported by an update.
    pub fn merge_outputs(&mut self, outputs: BTreeMap<String, Value>) {
        self.outputs.extend(outputs);
        self.updated_at = Utc::now();
    }

    /// Returns true if `properties` hash the same as the recorded ones.
    #[must_use]
    pub fn matches_properties(&self, properties: &BTreeMap<String, Value>) -> bool {
        self.properties_hash == ConfigHasher::hash_properties(properties)
    }

    /// Returns a recorded property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Returns true if the resource was declared with `removal_policy: retain`.
    #[must_use]
    pub const fn is_retained(&self) -> bool {
        self.retain
    }

    /// Describes the current remote object as a deposed one.
    #[must_use]
    pub fn to_deposed(&self) -> DeposedObject {
        DeposedObject {
            remote_id: self.remote_id.clone(),
            kind: self.kind,
            retain: self.retain,
        }
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: StackOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: StackOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for StackOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket() -> ResourceState {
        let mut properties = BTreeMap::new();
        properties.insert(String::from("bucket_name"), json!("assets"));
        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("arn"), json!("arn:bucket:assets"));
        ResourceState::new("bucket", ResourceKind::Bucket, "b-1", properties, outputs)
    }

    #[test]
    fn test_new_snapshot_has_lineage() {
        let a = StateSnapshot::new("site", "dev");
        let b = StateSnapshot::new("site", "dev");
        assert_eq!(a.serial, 0);
        assert_ne!(a.lineage, b.lineage);
        assert!(a.is_empty());
    }

    #[test]
    fn test_output_lookup() {
        let mut state = StateSnapshot::new("site", "dev");
        state.set_resource(bucket());
        assert_eq!(state.output("bucket", "arn"), Some(&json!("arn:bucket:assets")));
        assert_eq!(state.output("bucket", "nope"), None);
        assert_eq!(state.output("cdn", "arn"), None);
    }

    #[test]
    fn test_properties_hash_tracks_changes() {
        let mut resource = bucket();
        let before = resource.properties_hash.clone();

        let mut properties = resource.properties.clone();
        properties.insert(String::from("versioned"), json!(true));
        resource.set_properties(properties);

        assert_ne!(resource.properties_hash, before);
        assert!(resource.matches_properties(&resource.properties));
        assert!(!bucket().matches_properties(&resource.properties));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StateSnapshot::new("site", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(StackOperation::Apply, &i.to_string(), vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }

    #[test]
    fn test_snapshot_serde() {
        let mut state = StateSnapshot::new("site", "prod");
        state.set_resource(bucket());
        state.bump_serial();

        let json = serde_json::to_string(&state).unwrap();
        let loaded: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, state);
        assert!(!json.contains("deposed"));
    }

    #[test]
    fn test_retain_policy() {
        let mut resource = bucket();
        assert!(!resource.is_retained());

        resource.retain = true;
        assert!(resource.is_retained());
        assert!(!resource.properties.contains_key("removal_policy"));
        let deposed = resource.to_deposed();
        assert_eq!(deposed.remote_id, "b-1");
        assert!(deposed.retain);
    }
}
