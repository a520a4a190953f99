//! Change plan types.
//!
//! A plan is produced fresh for each synthesis. It can be written to a
//! plan file and applied later, as long as the snapshot it was computed
//! against has not moved since.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::{ReplaceOrder, ResourceKind};
use crate::error::{PlanError, Result};
use crate::graph::PropertyValue;
use crate::state::{StackOperation, StateSnapshot};

use super::diff::PropertyChange;

/// A complete change plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Stack file hash the plan was computed from.
    pub config_hash: String,
    /// Whether the plan applies or destroys the stack.
    pub operation: StackOperation,
    /// Serial of the snapshot the plan was computed against.
    pub state_serial: u64,
    /// Lineage of that snapshot.
    pub lineage: String,
    /// Actions in execution order.
    pub actions: Vec<PlanAction>,
}

/// Planned change for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
    /// Logical id.
    pub resource_id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// What happens to the resource.
    pub action: ActionKind,
    /// Logical ids whose actions must finish first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Property diff.
    #[serde(default)]
    pub changes: Vec<PropertyChange>,
    /// Sequencing of a replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_order: Option<ReplaceOrder>,
    /// Remote id of the existing object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Why the action was chosen.
    pub reason: String,
    /// Declared properties, resolved again right before the remote call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub desired: BTreeMap<String, PropertyValue>,
    /// Logical ids the resource depends on once applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Declared with `removal_policy: retain`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retain: bool,
    /// Logical ids whose actions must finish before superseded objects are
    /// deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purge_after: Vec<String>,
}

/// Kinds of planned actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Provision a new remote object.
    Create,
    /// Change properties in place.
    Update,
    /// Provision a new object and destroy the old one.
    Replace,
    /// Destroy the remote object.
    Delete,
    /// Nothing to do.
    #[serde(rename = "noop")]
    NoOp,
}

/// Remote operation making up an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create the object and record it.
    Create,
    /// Update the object in place.
    Update,
    /// Delete the recorded object and forget it.
    Delete,
    /// Delete objects superseded by a replacement.
    PurgeDeposed,
}

/// Part of an action the executor schedules on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The steps dependents wait for.
    Main,
    /// Deleting superseded objects once dependents have moved off them.
    Purge,
}

impl Plan {
    /// Creates an empty plan against a snapshot.
    #[must_use]
    pub fn new(operation: StackOperation, config_hash: &str, state: &StateSnapshot) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            operation,
            state_serial: state.serial,
            lineage: state.lineage.clone(),
            actions: Vec::new(),
        }
    }

    /// Returns true if any action has a remote effect.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action != ActionKind::NoOp)
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a kind.
    #[must_use]
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.action == kind).count()
    }

    /// Actions with a remote effect, in execution order.
    pub fn changes(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions.iter().filter(|a| a.action != ActionKind::NoOp)
    }

    /// Looks up the action for a resource.
    #[must_use]
    pub fn action(&self, resource_id: &str) -> Option<&PlanAction> {
        self.actions.iter().find(|a| a.resource_id == resource_id)
    }

    /// One-line summary of the counts.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete",
            self.count(ActionKind::Create),
            self.count(ActionKind::Update),
            self.count(ActionKind::Replace),
            self.count(ActionKind::Delete),
        )
    }

    /// Checks that the snapshot is the one the plan was computed against.
    ///
    /// A plan made against a never-persisted snapshot matches any other
    /// never-persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::StalePlan` if the serial or lineage moved.
    pub fn check_fresh(&self, state: &StateSnapshot) -> std::result::Result<(), PlanError> {
        let unpersisted = self.state_serial == 0 && state.serial == 0;
        if state.serial == self.state_serial && (unpersisted || state.lineage == self.lineage) {
            return Ok(());
        }
        Err(PlanError::StalePlan {
            planned: self.state_serial,
            current: state.serial,
            lineage: self.lineage.clone(),
        })
    }

    /// Writes the plan to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| PlanError::PlanFile {
            message: format!("Failed to serialize plan: {e}"),
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reads a plan file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a plan.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PlanError::PlanFile {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        let plan = serde_json::from_str(&content).map_err(|e| PlanError::PlanFile {
            message: format!("Invalid plan file {}: {e}", path.display()),
        })?;
        Ok(plan)
    }
}

impl PlanAction {
    /// Creates an action with no diff.
    #[must_use]
    pub fn new(resource_id: &str, kind: ResourceKind, action: ActionKind, reason: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            kind,
            action,
            prerequisites: Vec::new(),
            changes: Vec::new(),
            replace_order: None,
            remote_id: None,
            reason: reason.to_string(),
            desired: BTreeMap::new(),
            dependencies: Vec::new(),
            retain: false,
            purge_after: Vec::new(),
        }
    }

    /// Remote operations making up a phase of the action, in order.
    #[must_use]
    pub fn steps(&self, phase: Phase) -> Vec<Step> {
        match phase {
            Phase::Purge if self.purges_later() => vec![Step::PurgeDeposed],
            Phase::Purge => Vec::new(),
            Phase::Main => match self.action {
                ActionKind::Create => vec![Step::Create],
                ActionKind::Update => vec![Step::Update],
                ActionKind::Replace if !self.purges_later() => {
                    vec![Step::PurgeDeposed, Step::Delete, Step::Create]
                }
                ActionKind::Replace => vec![Step::Create],
                ActionKind::Delete => vec![Step::PurgeDeposed, Step::Delete],
                ActionKind::NoOp => Vec::new(),
            },
        }
    }

    /// Returns true if superseded objects are deleted in a separate phase,
    /// after every action in `purge_after`.
    #[must_use]
    pub fn purges_later(&self) -> bool {
        match self.action {
            ActionKind::Update => true,
            ActionKind::Replace => self.replace_order != Some(ReplaceOrder::DeleteBeforeCreate),
            _ => false,
        }
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionKind::Create => format!("Create {} '{}'", self.kind, self.resource_id),
            ActionKind::Update => format!("Update {} '{}' in place", self.kind, self.resource_id),
            ActionKind::Replace => format!("Replace {} '{}'", self.kind, self.resource_id),
            ActionKind::Delete => format!("Delete {} '{}'", self.kind, self.resource_id),
            ActionKind::NoOp => format!("No change for '{}'", self.resource_id),
        }
    }
}

impl ActionKind {
    /// Symbol used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan: {}", self.summary())?;
        for (i, action) in self.changes().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::PlannedValue;
    use serde_json::json;

    fn plan() -> Plan {
        let state = StateSnapshot::new("site", "dev");
        let mut plan = Plan::new(StackOperation::Apply, "abc", &state);

        let mut create = PlanAction::new("bucket", ResourceKind::Bucket, ActionKind::Create, "new");
        create
            .desired
            .insert(String::from("bucket_name"), PropertyValue::parse(&json!("assets")));
        create.changes.push(PropertyChange {
            name: String::from("bucket_name"),
            old: None,
            new: PlannedValue::Known(json!("assets")),
            requires_replace: false,
        });
        plan.actions.push(create);
        plan.actions.push(PlanAction::new("zone", ResourceKind::HostedZone, ActionKind::NoOp, ""));
        plan
    }

    #[test]
    fn test_replace_steps_follow_order() {
        let mut action = PlanAction::new("b", ResourceKind::Bucket, ActionKind::Replace, "");
        action.replace_order = Some(ReplaceOrder::DeleteBeforeCreate);
        assert!(!action.purges_later());
        assert_eq!(
            action.steps(Phase::Main),
            vec![Step::PurgeDeposed, Step::Delete, Step::Create]
        );
        assert!(action.steps(Phase::Purge).is_empty());

        action.replace_order = Some(ReplaceOrder::CreateBeforeDelete);
        assert!(action.purges_later());
        assert_eq!(action.steps(Phase::Main), vec![Step::Create]);
        assert_eq!(action.steps(Phase::Purge), vec![Step::PurgeDeposed]);
    }

    #[test]
    fn test_update_purges_in_own_phase() {
        let action = PlanAction::new("cert", ResourceKind::Certificate, ActionKind::Update, "");
        assert_eq!(action.steps(Phase::Main), vec![Step::Update]);
        assert_eq!(action.steps(Phase::Purge), vec![Step::PurgeDeposed]);

        let delete = PlanAction::new("cert", ResourceKind::Certificate, ActionKind::Delete, "");
        assert_eq!(delete.steps(Phase::Main), vec![Step::PurgeDeposed, Step::Delete]);
        assert!(delete.steps(Phase::Purge).is_empty());
    }

    #[test]
    fn test_counts_and_summary() {
        let plan = plan();
        assert!(plan.has_changes());
        assert_eq!(plan.action_count(), 2);
        assert_eq!(plan.count(ActionKind::Create), 1);
        assert_eq!(plan.summary(), "1 to create, 0 to update, 0 to replace, 0 to delete");
        assert_eq!(plan.changes().count(), 1);
    }

    #[test]
    fn test_plan_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");

        let plan = plan();
        plan.save(&path).unwrap();
        let loaded = Plan::load(&path).unwrap();

        assert_eq!(loaded.lineage, plan.lineage);
        assert_eq!(loaded.actions.len(), 2);
        assert_eq!(loaded.actions[1].action, ActionKind::NoOp);
        assert_eq!(loaded.actions[0].desired, plan.actions[0].desired);
    }

    #[test]
    fn test_stale_plan_rejected() {
        let mut state = StateSnapshot::new("site", "dev");
        state.bump_serial();
        let plan = Plan::new(StackOperation::Apply, "abc", &state);
        assert!(plan.check_fresh(&state).is_ok());

        state.bump_serial();
        let err = plan.check_fresh(&state).unwrap_err();
        assert!(matches!(err, PlanError::StalePlan { planned: 1, current: 2, .. }));

        let mut other = StateSnapshot::new("site", "dev");
        other.bump_serial();
        assert!(plan.check_fresh(&other).is_err());
    }

    #[test]
    fn test_unpersisted_snapshots_match() {
        let plan = Plan::new(StackOperation::Apply, "abc", &StateSnapshot::new("site", "dev"));
        assert!(plan.check_fresh(&StateSnapshot::new("site", "dev")).is_ok());
    }

    #[test]
    fn test_invalid_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "{").unwrap();
        assert!(Plan::load(&path).is_err());
    }
}
