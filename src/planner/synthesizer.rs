//! Plan synthesis.
//!
//! Walks the graph in dependency order, diffs each declared resource
//! against the previous snapshot and emits one action per logical id.
//! Actions are then ordered over a constraint graph that combines the
//! declared edges with the recorded dependencies of resources on their
//! way out.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::catalog::{Catalog, ResourceKind};
use crate::error::{PlanError, Result};
use crate::graph::{Reference, ResourceGraph, ResourceRegistry, ResourceSpec, kahn_order};
use crate::state::{ResourceState, StackOperation, StateSnapshot};

use super::diff::{DiffEngine, PlannedValue};
use super::plan::{ActionKind, Plan, PlanAction};

/// Builds change plans.
#[derive(Debug, Clone)]
pub struct PlanSynthesizer<'a> {
    catalog: &'a Catalog,
    config_hash: String,
}

/// External name claimed by a resource being created or replaced.
struct Claim<'g> {
    id: &'g str,
    kind: ResourceKind,
    name: Value,
}

impl<'a> PlanSynthesizer<'a> {
    /// Creates a synthesizer using the kind catalog.
    #[must_use]
    pub const fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            config_hash: String::new(),
        }
    }

    /// Sets the stack file hash recorded in plans.
    #[must_use]
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Diffs the declared graph against the previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Ordering` if the actions cannot be ordered.
    pub fn synthesize(&self, graph: &ResourceGraph, previous: &StateSnapshot) -> Result<Plan> {
        self.build(graph, previous, StackOperation::Apply)
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Ordering` if the recorded dependencies are cyclic.
    pub fn synthesize_destroy(&self, previous: &StateSnapshot) -> Result<Plan> {
        let empty = ResourceGraph::from_registry(ResourceRegistry::new(), self.catalog)?;
        self.build(&empty, previous, StackOperation::Destroy)
    }

    fn build(
        &self,
        graph: &ResourceGraph,
        previous: &StateSnapshot,
        operation: StackOperation,
    ) -> Result<Plan> {
        let mut actions: BTreeMap<String, PlanAction> = BTreeMap::new();
        let mut pending_outputs: BTreeSet<&str> = BTreeSet::new();
        let mut claims = Vec::new();

        for id in graph.topological_order() {
            let Some(spec) = graph.spec(id) else {
                continue;
            };

            let desired = resolve_planned(spec, previous, &pending_outputs);
            let action = self.plan_declared(graph, spec, &desired, previous.get(id));

            if matches!(action.action, ActionKind::Create | ActionKind::Replace) {
                pending_outputs.insert(id);
                if let Some(claim) = self.claim(spec, &desired) {
                    claims.push(claim);
                }
            }
            debug!(resource = id, action = %action.action, "Planned declared resource");
            actions.insert(id.to_string(), action);
        }

        for (id, recorded) in &previous.resources {
            if !graph.contains(id) {
                debug!(resource = %id, "Planned delete of undeclared resource");
                actions.insert(id.clone(), plan_orphan(recorded));
            }
        }

        let edges = self.constraints(graph, previous, &actions, &claims);
        schedule_purges(graph, previous, &mut actions);
        let ordered = order(actions, &edges)?;

        let mut plan = Plan::new(operation, &self.config_hash, previous);
        plan.actions = ordered;
        Ok(plan)
    }

    fn plan_declared(
        &self,
        graph: &ResourceGraph,
        spec: &ResourceSpec,
        desired: &BTreeMap<String, PlannedValue>,
        recorded: Option<&ResourceState>,
    ) -> PlanAction {
        let schema = self.catalog.schema(spec.kind);

        let mut action = PlanAction::new(&spec.id, spec.kind, ActionKind::NoOp, "");
        action.dependencies = graph.dependencies_of(&spec.id).map(str::to_string).collect();
        action.retain = spec.retain;

        let Some(recorded) = recorded else {
            action.action = ActionKind::Create;
            action.reason = String::from("not yet provisioned");
            action.changes = DiffEngine::creation(desired);
            action.desired.clone_from(&spec.properties);
            return action;
        };

        action.remote_id = Some(recorded.remote_id.clone());
        let unchanged =
            known_values(desired).is_some_and(|values| recorded.matches_properties(&values));
        let changes = if unchanged {
            Vec::new()
        } else {
            DiffEngine::new(schema).compute_diff(desired, &recorded.properties)
        };

        if recorded.kind != spec.kind {
            action.action = ActionKind::Replace;
            action.reason = format!("kind changed from {} to {}", recorded.kind, spec.kind);
        } else if let Some(blocking) = changes.iter().find(|c| c.requires_replace) {
            action.action = ActionKind::Replace;
            action.reason = format!("'{}' cannot be changed in place", blocking.name);
        } else if !changes.is_empty() {
            let names: Vec<&str> = changes.iter().map(|c| c.name.as_str()).collect();
            action.action = ActionKind::Update;
            action.reason = format!("changed: {}", names.join(", "));
        } else if !recorded.deposed.is_empty() {
            action.action = ActionKind::Update;
            action.reason = format!("{} deposed object(s) to delete", recorded.deposed.len());
        } else if recorded.retain != spec.retain {
            action.action = ActionKind::Update;
            action.reason = String::from("removal_policy changed");
        } else {
            return action;
        }

        if action.action == ActionKind::Replace {
            action.replace_order = Some(schema.replace_order);
        }
        action.changes = changes;
        action.desired.clone_from(&spec.properties);
        action
    }

    fn claim<'g>(
        &self,
        spec: &'g ResourceSpec,
        desired: &BTreeMap<String, PlannedValue>,
    ) -> Option<Claim<'g>> {
        let property = self.catalog.schema(spec.kind).unique_name?;
        let name = desired.get(property)?.known()?.clone();
        Some(Claim {
            id: &spec.id,
            kind: spec.kind,
            name,
        })
    }

    /// Collects `(before, after)` ordering constraints.
    fn constraints(
        &self,
        graph: &ResourceGraph,
        previous: &StateSnapshot,
        actions: &BTreeMap<String, PlanAction>,
        claims: &[Claim<'_>],
    ) -> BTreeSet<(String, String)> {
        let is_orphan = |id: &str| {
            actions
                .get(id)
                .is_some_and(|a| a.action == ActionKind::Delete)
        };

        let mut edges: BTreeSet<(String, String)> = graph
            .edges()
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect();
        let mut soft = Vec::new();

        for (id, recorded) in &previous.resources {
            let orphan = is_orphan(id);
            for dependency in &recorded.dependencies {
                if is_orphan(dependency) {
                    // Dependents go first: an orphan before its orphan
                    // dependency, a kept resource before the orphan it used.
                    edges.insert((id.clone(), dependency.clone()));
                } else if orphan && graph.contains(dependency) {
                    soft.push((id.clone(), dependency.clone()));
                }
            }

            if orphan
                && let Some(property) = self.catalog.schema(recorded.kind).unique_name
                && let Some(name) = recorded.property(property)
            {
                for claim in claims {
                    if claim.kind == recorded.kind && claim.name == *name {
                        soft.push((id.clone(), claim.id.to_string()));
                    }
                }
            }
        }

        for (before, after) in soft {
            if reaches(&edges, &after, &before) {
                debug!(%before, %after, "Skipped ordering hint that would close a cycle");
            } else {
                edges.insert((before, after));
            }
        }

        edges
    }
}

/// Resolves declared properties against outputs known before the apply.
fn resolve_planned(
    spec: &ResourceSpec,
    previous: &StateSnapshot,
    pending_outputs: &BTreeSet<&str>,
) -> BTreeMap<String, PlannedValue> {
    let lookup = |reference: &Reference| {
        if pending_outputs.contains(reference.resource.as_str()) {
            return None;
        }
        previous
            .output(&reference.resource, &reference.output)
            .cloned()
    };

    spec.properties
        .iter()
        .map(|(name, value)| {
            let planned = value
                .resolve(&lookup)
                .map_or(PlannedValue::Unknown, PlannedValue::Known);
            (name.clone(), planned)
        })
        .collect()
}

/// Returns the planned properties if every one of them is known.
fn known_values(desired: &BTreeMap<String, PlannedValue>) -> Option<BTreeMap<String, Value>> {
    desired
        .iter()
        .map(|(name, value)| value.known().map(|v| (name.clone(), v.clone())))
        .collect()
}

fn plan_orphan(recorded: &ResourceState) -> PlanAction {
    let reason = if recorded.is_retained() {
        "removed from stack file, kept remotely (removal_policy: retain)"
    } else {
        "removed from stack file"
    };

    let mut action = PlanAction::new(&recorded.id, recorded.kind, ActionKind::Delete, reason);
    action.remote_id = Some(recorded.remote_id.clone());
    action.retain = recorded.retain;
    action.changes = DiffEngine::removal(&recorded.properties);
    action
}

/// Fills `purge_after` of actions that delete superseded objects in their
/// own phase: every declared or recorded dependent must be done with the
/// old object first.
fn schedule_purges(
    graph: &ResourceGraph,
    previous: &StateSnapshot,
    actions: &mut BTreeMap<String, PlanAction>,
) {
    let mut waits: BTreeSet<(String, String)> = BTreeSet::new();
    let purging: Vec<String> = actions
        .values()
        .filter(|a| a.purges_later())
        .map(|a| a.resource_id.clone())
        .collect();

    for id in purging {
        let mut dependents: BTreeSet<&str> = graph.dependents_of(&id).collect();
        dependents.extend(
            previous
                .resources
                .values()
                .filter(|r| r.dependencies.contains(&id))
                .map(|r| r.id.as_str()),
        );

        let mut after = Vec::new();
        for dependent in dependents {
            if dependent == id || !actions.contains_key(dependent) {
                continue;
            }
            if reaches(&waits, &id, dependent) {
                debug!(resource = %id, dependent, "Skipped purge wait that would close a cycle");
                continue;
            }
            waits.insert((dependent.to_string(), id.clone()));
            after.push(dependent.to_string());
        }

        if let Some(action) = actions.get_mut(&id) {
            action.purge_after = after;
        }
    }
}

/// Returns true if `to` is reachable from `from`.
fn reaches(edges: &BTreeSet<(String, String)>, from: &str, to: &str) -> bool {
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (before, after) in edges {
        successors.entry(before.as_str()).or_default().push(after.as_str());
    }

    let mut seen = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        for next in successors.get(node).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    false
}

/// Orders actions with deletes last among ready ones, then by id, and
/// fills in prerequisites. Only constraint edges move a delete forward.
fn order(
    mut actions: BTreeMap<String, PlanAction>,
    edges: &BTreeSet<(String, String)>,
) -> std::result::Result<Vec<PlanAction>, PlanError> {
    let key = |id: &str| {
        let rank = u8::from(actions.get(id).is_some_and(|a| a.action == ActionKind::Delete));
        (rank, id.to_string())
    };

    let nodes: BTreeSet<(u8, String)> = actions.keys().map(|id| key(id)).collect();
    let keyed: BTreeSet<((u8, String), (u8, String))> =
        edges.iter().map(|(a, b)| (key(a), key(b))).collect();

    let sequence: Vec<String> = kahn_order(&nodes, &keyed)
        .into_iter()
        .map(|(_, id)| id)
        .collect();

    if sequence.len() != nodes.len() {
        let placed: BTreeSet<&String> = sequence.iter().collect();
        let stuck: Vec<&str> = actions
            .keys()
            .filter(|id| !placed.contains(id))
            .map(String::as_str)
            .collect();
        return Err(PlanError::Ordering {
            message: format!("conflicting constraints between {}", stuck.join(", ")),
        });
    }

    let position: BTreeMap<&str, usize> = sequence
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let mut prerequisites: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (before, after) in edges {
        if position.contains_key(before.as_str()) {
            prerequisites
                .entry(after.as_str())
                .or_default()
                .push(before.as_str());
        }
    }

    let mut ordered = Vec::with_capacity(sequence.len());
    for id in &sequence {
        if let Some(mut action) = actions.remove(id) {
            let mut before = prerequisites.remove(id.as_str()).unwrap_or_default();
            before.sort_by_key(|p| position.get(p).copied().unwrap_or_default());
            action.prerequisites = before.into_iter().map(str::to_string).collect();
            ordered.push(action);
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PropertySchema, ReplaceOrder};
    use crate::planner::plan::{Phase, Step};
    use crate::state::DeposedObject;
    use serde_json::json;

    fn graph(catalog: &Catalog, specs: Vec<ResourceSpec>) -> ResourceGraph {
        let mut registry = ResourceRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        ResourceGraph::from_registry(registry, catalog).unwrap()
    }

    fn bucket(id: &str, name: &str) -> ResourceSpec {
        ResourceSpec::new(id, ResourceKind::Bucket).with_property("bucket_name", json!(name))
    }

    fn record(
        state: &mut StateSnapshot,
        id: &str,
        kind: ResourceKind,
        properties: &[(&str, Value)],
        dependencies: &[&str],
    ) {
        let properties = properties
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        let outputs = Catalog::builtin()
            .schema(kind)
            .outputs
            .iter()
            .map(|o| ((*o).to_string(), json!(format!("{id}.{o}"))))
            .collect();
        let mut resource = ResourceState::new(id, kind, &format!("r-{id}"), properties, outputs);
        resource.dependencies = dependencies.iter().map(|d| (*d).to_string()).collect();
        state.set_resource(resource);
    }

    fn summary(plan: &Plan) -> Vec<(ActionKind, &str)> {
        plan.actions
            .iter()
            .map(|a| (a.action, a.resource_id.as_str()))
            .collect()
    }

    #[test]
    fn test_single_bucket_against_empty_state() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("a", "site-a")]);
        let plan = PlanSynthesizer::new(&catalog)
            .synthesize(&graph, &StateSnapshot::new("site", "dev"))
            .unwrap();

        assert_eq!(summary(&plan), vec![(ActionKind::Create, "a")]);
        assert_eq!(plan.actions[0].changes.len(), 1);
        assert!(plan.actions[0].prerequisites.is_empty());
    }

    #[test]
    fn test_reference_orders_creates() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                ResourceSpec::new("b", ResourceKind::Distribution)
                    .with_property("origin_domain_name", json!("${a.regional_domain_name}")),
                bucket("a", "site-a"),
            ],
        );
        let plan = PlanSynthesizer::new(&catalog)
            .synthesize(&graph, &StateSnapshot::new("site", "dev"))
            .unwrap();

        assert_eq!(
            summary(&plan),
            vec![(ActionKind::Create, "a"), (ActionKind::Create, "b")]
        );
        let b = plan.action("b").unwrap();
        assert_eq!(b.prerequisites, vec![String::from("a")]);
        assert_eq!(b.dependencies, vec![String::from("a")]);
        assert_eq!(b.changes[0].new, PlannedValue::Unknown);
    }

    #[test]
    fn test_unchanged_resources_are_noop() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                bucket("a", "site-a"),
                ResourceSpec::new("b", ResourceKind::Distribution)
                    .with_property("origin_domain_name", json!("${a.regional_domain_name}")),
            ],
        );

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "a", ResourceKind::Bucket, &[("bucket_name", json!("site-a"))], &[]);
        record(
            &mut state,
            "b",
            ResourceKind::Distribution,
            &[("origin_domain_name", json!("a.regional_domain_name"))],
            &["a"],
        );

        let synthesizer = PlanSynthesizer::new(&catalog);
        let plan = synthesizer.synthesize(&graph, &state).unwrap();
        assert!(!plan.has_changes());
        assert!(plan.actions.iter().all(|a| a.action == ActionKind::NoOp));

        let again = synthesizer.synthesize(&graph, &state).unwrap();
        assert_eq!(again.actions, plan.actions);
    }

    #[test]
    fn test_updatable_change_updates_in_place() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![bucket("a", "site-a").with_property("versioned", json!(true))],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(
            &mut state,
            "a",
            ResourceKind::Bucket,
            &[("bucket_name", json!("site-a")), ("versioned", json!(false))],
            &[],
        );

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(summary(&plan), vec![(ActionKind::Update, "a")]);
        assert_eq!(plan.actions[0].remote_id.as_deref(), Some("r-a"));
        assert_eq!(plan.actions[0].steps(Phase::Main), vec![Step::Update]);
    }

    #[test]
    fn test_stale_properties_hash_falls_back_to_diff() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("a", "site-a"), bucket("b", "site-b")]);
        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "a", ResourceKind::Bucket, &[("bucket_name", json!("site-a"))], &[]);
        record(&mut state, "b", ResourceKind::Bucket, &[("bucket_name", json!("old-b"))], &[]);
        for resource in state.resources.values_mut() {
            resource.properties_hash = String::from("stale");
        }

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![(ActionKind::NoOp, "a"), (ActionKind::Replace, "b")]
        );
    }

    #[test]
    fn test_non_updatable_change_replaces() {
        let mut schema = Catalog::builtin().schema(ResourceKind::Bucket).clone();
        schema.properties.retain(|p| p.name != "versioned");
        schema.properties.push(PropertySchema {
            name: "versioned",
            required: false,
            updatable: false,
        });
        let catalog = Catalog::builtin().with_schema(schema);

        let graph = graph(
            &catalog,
            vec![bucket("a", "site-a").with_property("versioned", json!(true))],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(
            &mut state,
            "a",
            ResourceKind::Bucket,
            &[("bucket_name", json!("site-a")), ("versioned", json!(false))],
            &[],
        );

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(summary(&plan), vec![(ActionKind::Replace, "a")]);

        let action = &plan.actions[0];
        assert_eq!(action.replace_order, Some(ReplaceOrder::DeleteBeforeCreate));
        assert_eq!(
            action.steps(Phase::Main),
            vec![Step::PurgeDeposed, Step::Delete, Step::Create]
        );
        assert!(action.reason.contains("versioned"));
    }

    #[test]
    fn test_certificate_replacement_creates_first() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                ResourceSpec::new("cert", ResourceKind::Certificate)
                    .with_property("domain_name", json!("www.example.com")),
            ],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(
            &mut state,
            "cert",
            ResourceKind::Certificate,
            &[("domain_name", json!("example.com"))],
            &[],
        );

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        let action = &plan.actions[0];
        assert_eq!(action.action, ActionKind::Replace);
        assert_eq!(action.steps(Phase::Main), vec![Step::Create]);
        assert_eq!(action.steps(Phase::Purge), vec![Step::PurgeDeposed]);
        assert!(action.purge_after.is_empty());
    }

    #[test]
    fn test_replaced_certificate_purged_after_dependents() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                ResourceSpec::new("cert", ResourceKind::Certificate)
                    .with_property("domain_name", json!("b.example.com")),
                ResourceSpec::new("cdn", ResourceKind::Distribution)
                    .with_property("origin_domain_name", json!("origin.example.com"))
                    .with_property("certificate_arn", json!("${cert.arn}")),
            ],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(
            &mut state,
            "cert",
            ResourceKind::Certificate,
            &[("domain_name", json!("a.example.com"))],
            &[],
        );
        record(
            &mut state,
            "cdn",
            ResourceKind::Distribution,
            &[
                ("origin_domain_name", json!("origin.example.com")),
                ("certificate_arn", json!("cert.arn")),
            ],
            &["cert"],
        );

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![(ActionKind::Replace, "cert"), (ActionKind::Update, "cdn")]
        );
        assert_eq!(plan.action("cert").unwrap().purge_after, vec![String::from("cdn")]);
        assert!(plan.action("cdn").unwrap().purge_after.is_empty());
    }

    #[test]
    fn test_kind_change_replaces() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                ResourceSpec::new("origin", ResourceKind::OriginAccessControl)
                    .with_property("name", json!("oac")),
            ],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "origin", ResourceKind::Bucket, &[("bucket_name", json!("o"))], &[]);

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(summary(&plan), vec![(ActionKind::Replace, "origin")]);
        assert!(plan.actions[0].reason.contains("kind changed"));
    }

    #[test]
    fn test_removed_resources_deleted_dependents_first() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("assets", "site-assets")]);

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "assets", ResourceKind::Bucket, &[("bucket_name", json!("site-assets"))], &[]);
        record(&mut state, "alias", ResourceKind::DnsRecord, &[("record_name", json!("www"))], &["zone"]);
        record(&mut state, "zone", ResourceKind::HostedZone, &[("domain_name", json!("example.com"))], &[]);

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![
                (ActionKind::NoOp, "assets"),
                (ActionKind::Delete, "alias"),
                (ActionKind::Delete, "zone"),
            ]
        );
        assert_eq!(plan.count(ActionKind::Delete), 2);
        assert_eq!(plan.action("zone").unwrap().prerequisites, vec![String::from("alias")]);
    }

    #[test]
    fn test_kept_resource_moves_off_orphan_first() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                bucket("new_bucket", "site-v2"),
                ResourceSpec::new("cdn", ResourceKind::Distribution).with_property(
                    "origin_domain_name",
                    json!("${new_bucket.regional_domain_name}"),
                ),
            ],
        );

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "old_bucket", ResourceKind::Bucket, &[("bucket_name", json!("site-v1"))], &[]);
        record(
            &mut state,
            "cdn",
            ResourceKind::Distribution,
            &[("origin_domain_name", json!("old_bucket.regional_domain_name"))],
            &["old_bucket"],
        );

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![
                (ActionKind::Create, "new_bucket"),
                (ActionKind::Update, "cdn"),
                (ActionKind::Delete, "old_bucket"),
            ]
        );
    }

    #[test]
    fn test_unrelated_create_precedes_delete() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("new_site", "b2")]);

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "old_site", ResourceKind::Bucket, &[("bucket_name", json!("b1"))], &[]);

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![(ActionKind::Create, "new_site"), (ActionKind::Delete, "old_site")]
        );
        assert!(plan.action("old_site").unwrap().prerequisites.is_empty());
    }

    #[test]
    fn test_retain_change_is_recorded() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![bucket("a", "site-a").with_property("removal_policy", json!("retain"))],
        );
        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "a", ResourceKind::Bucket, &[("bucket_name", json!("site-a"))], &[]);

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        let action = &plan.actions[0];
        assert_eq!(action.action, ActionKind::Update);
        assert!(action.retain);
        assert!(action.changes.is_empty());
        assert!(!action.desired.contains_key("removal_policy"));
    }

    #[test]
    fn test_unique_name_released_before_create() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("site_bucket", "assets")]);

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "legacy", ResourceKind::Bucket, &[("bucket_name", json!("assets"))], &[]);

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(
            summary(&plan),
            vec![(ActionKind::Delete, "legacy"), (ActionKind::Create, "site_bucket")]
        );
        assert_eq!(
            plan.action("site_bucket").unwrap().prerequisites,
            vec![String::from("legacy")]
        );
    }

    #[test]
    fn test_deposed_objects_force_update() {
        let catalog = Catalog::builtin();
        let graph = graph(&catalog, vec![bucket("a", "site-a")]);

        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "a", ResourceKind::Bucket, &[("bucket_name", json!("site-a"))], &[]);
        if let Some(resource) = state.get_mut("a") {
            resource.deposed.push(DeposedObject {
                remote_id: String::from("r-old"),
                kind: ResourceKind::Bucket,
                retain: false,
            });
        }

        let plan = PlanSynthesizer::new(&catalog).synthesize(&graph, &state).unwrap();
        assert_eq!(summary(&plan), vec![(ActionKind::Update, "a")]);
        assert!(plan.actions[0].changes.is_empty());
    }

    #[test]
    fn test_destroy_plan_reverses_dependencies() {
        let catalog = Catalog::builtin();
        let mut state = StateSnapshot::new("site", "dev");
        record(&mut state, "bucket", ResourceKind::Bucket, &[("bucket_name", json!("b"))], &[]);
        record(&mut state, "cdn", ResourceKind::Distribution, &[], &["bucket", "cert"]);
        record(&mut state, "cert", ResourceKind::Certificate, &[], &[]);
        record(&mut state, "alias", ResourceKind::DnsRecord, &[], &["cdn"]);

        let plan = PlanSynthesizer::new(&catalog)
            .with_config_hash("h")
            .synthesize_destroy(&state)
            .unwrap();

        assert_eq!(plan.operation, StackOperation::Destroy);
        assert_eq!(plan.config_hash, "h");
        assert_eq!(
            summary(&plan),
            vec![
                (ActionKind::Delete, "alias"),
                (ActionKind::Delete, "cdn"),
                (ActionKind::Delete, "bucket"),
                (ActionKind::Delete, "cert"),
            ]
        );
    }

    #[test]
    fn test_declared_dependency_precedes_dependent() {
        let catalog = Catalog::builtin();
        let graph = graph(
            &catalog,
            vec![
                ResourceSpec::new("zone", ResourceKind::HostedZone)
                    .with_property("domain_name", json!("example.com")),
                ResourceSpec::new("cert", ResourceKind::Certificate)
                    .with_property("domain_name", json!("example.com"))
                    .with_property("validation_zone_id", json!("${zone.zone_id}")),
                ResourceSpec::new("alias", ResourceKind::DnsRecord)
                    .with_property("zone_id", json!("${zone.zone_id}"))
                    .with_property("record_name", json!("example.com"))
                    .with_property("record_type", json!("A"))
                    .depends_on("cert"),
            ],
        );
        let plan = PlanSynthesizer::new(&catalog)
            .synthesize(&graph, &StateSnapshot::new("site", "dev"))
            .unwrap();

        let position = |id: &str| plan.actions.iter().position(|a| a.resource_id == id).unwrap();
        for edge in graph.edges() {
            assert!(position(&edge.from) < position(&edge.to), "{edge:?}");
        }
        assert_eq!(
            plan.action("alias").unwrap().prerequisites,
            vec![String::from("zone"), String::from("cert")]
        );
    }
}
