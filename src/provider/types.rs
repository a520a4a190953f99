//! Provisioning API data types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolved property bag sent to the provider.
pub type Properties = BTreeMap<String, Value>;

/// Output values reported by the provider.
pub type Outputs = BTreeMap<String, Value>;

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    /// Provider-assigned identifier.
    pub remote_id: String,
    /// Outputs of the new object.
    #[serde(default)]
    pub outputs: Outputs,
}

/// Body of a create request.
#[derive(Debug, Serialize)]
pub(crate) struct CreateRequest<'a> {
    pub logical_id: &'a str,
    pub properties: &'a Properties,
}

/// Body of an update request.
#[derive(Debug, Serialize)]
pub(crate) struct UpdateRequest<'a> {
    pub changes: &'a Properties,
}

/// Response to an update.
#[derive(Debug, Deserialize)]
pub(crate) struct UpdateResponse {
    #[serde(default)]
    pub outputs: Outputs,
}

/// Response to a read.
#[derive(Debug, Deserialize)]
pub(crate) struct ReadResponse {
    pub properties: Properties,
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}
