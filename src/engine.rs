//! Engine driving a stack through plan, apply, destroy and refresh.
//!
//! The engine owns nothing remote: it borrows the stack file, the state
//! store and the provisioner, builds the declaration graph on demand and
//! holds the state lock for the whole of every run that writes state.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ResourceKind};
use crate::config::{ConfigHasher, StackConfig};
use crate::error::{ProviderError, Result};
use crate::graph::{PropertyValue, ReferenceResolver, ResourceGraph, ResourceRegistry};
use crate::planner::{ActionKind, Plan, PlanExecutor, PlanSynthesizer, evaluate_outputs};
use crate::provider::{Properties, Provisioner};
use crate::state::{
    HistoryEntry, LOCK_RENEW_SECS, LockInfo, StackOperation, StateSnapshot, StateStore,
    generate_holder_id,
};

/// Drives a stack against a state store and a provisioner.
pub struct Engine<'a> {
    /// Stack file.
    config: &'a StackConfig,
    /// Snapshot storage.
    store: &'a dyn StateStore,
    /// Remote API.
    provisioner: &'a dyn Provisioner,
    /// Kind schemas.
    catalog: Catalog,
    /// Lock holder id.
    holder: String,
    /// Interval between lock renewals while a run holds the lock.
    lock_renewal: Duration,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Result of an apply or destroy run.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Type of run.
    pub operation: StackOperation,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated in place.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources left alone.
    pub unchanged: usize,
    /// Serial of the persisted snapshot.
    pub serial: u64,
    /// Stack outputs after the run.
    pub outputs: BTreeMap<String, Value>,
}

/// A recorded resource whose remote properties moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDrift {
    /// Logical id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Properties that differ from the recorded ones.
    pub changed: Vec<String>,
}

/// Report of a drift refresh.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    /// Number of recorded resources read back.
    pub checked: usize,
    /// Resources whose properties changed remotely.
    pub drifted: Vec<ResourceDrift>,
    /// Resources that no longer exist remotely.
    pub vanished: Vec<String>,
}

/// A node of the declaration graph, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    /// Logical id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Direct dependencies.
    pub dependencies: Vec<String>,
}

impl<'a> Engine<'a> {
    /// Creates an engine with the built-in catalog.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        store: &'a dyn StateStore,
        provisioner: &'a dyn Provisioner,
    ) -> Self {
        Self {
            config,
            store,
            provisioner,
            catalog: Catalog::builtin(),
            holder: generate_holder_id(),
            lock_renewal: Duration::from_secs(LOCK_RENEW_SECS),
            hasher: ConfigHasher::new(),
        }
    }

    /// Replaces the kind catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the id recorded in state locks.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Sets how often a held lock is renewed.
    #[must_use]
    pub fn with_lock_renewal(mut self, every: Duration) -> Self {
        self.lock_renewal = every.max(Duration::from_millis(1));
        self
    }

    /// Returns the kind catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Builds the declaration graph from the stack file.
    ///
    /// # Errors
    ///
    /// See [`build_graph`].
    pub fn load_graph(&self) -> Result<ResourceGraph> {
        build_graph(self.config, &self.catalog)
    }

    /// Returns the graph nodes in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built.
    pub fn graph_view(&self) -> Result<Vec<GraphNode>> {
        Ok(graph_nodes(&self.load_graph()?))
    }

    /// Loads the snapshot, or an empty one for a stack never applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the state backend fails.
    pub async fn load_state(&self) -> Result<StateSnapshot> {
        Ok(self.store.load().await?.unwrap_or_else(|| {
            StateSnapshot::new(&self.config.project.name, &self.config.project.environment)
        }))
    }

    /// Computes the plan that converges the stack.
    ///
    /// With `refresh`, recorded resources are read back first and any
    /// drift found is persisted before planning.
    ///
    /// # Errors
    ///
    /// Returns graph, state or provider errors.
    pub async fn plan(&self, refresh: bool) -> Result<Plan> {
        let graph = self.load_graph()?;
        if refresh {
            let report = self.refresh_state().await?;
            if report.has_drift() {
                info!(
                    drifted = report.drifted.len(),
                    vanished = report.vanished.len(),
                    "Planning against refreshed state"
                );
            }
        }

        let snapshot = self.load_state().await?;
        self.synthesizer().synthesize(&graph, &snapshot)
    }

    /// Computes the plan that deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns state or ordering errors.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let snapshot = self.load_state().await?;
        self.synthesizer().synthesize_destroy(&snapshot)
    }

    /// Applies a plan, computing a fresh one if none is given.
    ///
    /// A saved plan is rejected if the snapshot moved since it was made.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockedByOther` if someone else holds the lock,
    /// `PlanError::StalePlan` for an outdated plan, and the execution error
    /// with the partial snapshot if an action fails.
    pub async fn apply(
        &self,
        plan: Option<Plan>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyReport> {
        let lock = self.lock(StackOperation::Apply).await?;
        let result = self.hold(&lock, self.apply_locked(plan, cancel)).await;
        self.unlock(&lock).await;
        result
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::apply`].
    pub async fn destroy(&self, cancel: Option<watch::Receiver<bool>>) -> Result<ApplyReport> {
        let lock = self.lock(StackOperation::Destroy).await?;
        let result = self.hold(&lock, self.destroy_locked(cancel)).await;
        self.unlock(&lock).await;
        result
    }

    /// Reads back every recorded resource and reports drift without
    /// touching stored state.
    ///
    /// # Errors
    ///
    /// Returns state or provider errors.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let mut snapshot = self.load_state().await?;
        self.refresh(&mut snapshot).await
    }

    /// Refreshes the stored snapshot under the state lock.
    ///
    /// The snapshot is only written back when drift was found.
    ///
    /// # Errors
    ///
    /// Returns lock, state or provider errors.
    pub async fn refresh_state(&self) -> Result<DriftReport> {
        let lock = self.lock(StackOperation::Refresh).await?;
        let result = self.hold(&lock, self.refresh_locked()).await;
        self.unlock(&lock).await;
        result
    }

    /// Reads back every resource in `snapshot` and brings it in line with
    /// what exists remotely.
    ///
    /// Vanished resources are dropped so the next plan recreates them.
    /// Changed properties replace the recorded ones; properties the kind
    /// schema does not know are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first provider error.
    pub async fn refresh(&self, snapshot: &mut StateSnapshot) -> Result<DriftReport> {
        let mut report = DriftReport {
            checked: snapshot.resources.len(),
            ..DriftReport::default()
        };

        let recorded: Vec<(String, ResourceKind, String)> = snapshot
            .resources
            .values()
            .map(|r| (r.id.clone(), r.kind, r.remote_id.clone()))
            .collect();

        for (id, kind, remote_id) in recorded {
            let Some(remote) = self.read(kind, &remote_id).await? else {
                warn!(resource = %id, %remote_id, "Resource no longer exists remotely");
                snapshot.remove_resource(&id);
                report.vanished.push(id);
                continue;
            };

            let Some(resource) = snapshot.get_mut(&id) else {
                continue;
            };
            let schema = self.catalog.schema(kind);
            let mut properties = resource.properties.clone();
            let mut changed = Vec::new();

            let names: Vec<String> = resource
                .properties
                .keys()
                .chain(remote.keys())
                .filter(|name| schema.property(name).is_some())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            for name in names {
                let current = remote.get(&name);
                if resource.properties.get(&name) == current {
                    continue;
                }
                match current {
                    Some(value) => properties.insert(name.clone(), value.clone()),
                    None => properties.remove(&name),
                };
                changed.push(name);
            }

            if !changed.is_empty() {
                debug!(resource = %id, changed = ?changed, "Drift detected");
                resource.set_properties(properties);
                report.drifted.push(ResourceDrift { id, kind, changed });
            }
        }

        info!(
            checked = report.checked,
            drifted = report.drifted.len(),
            vanished = report.vanished.len(),
            "Refresh complete"
        );
        Ok(report)
    }

    /// Returns the stack outputs recorded by the last apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the state backend fails.
    pub async fn outputs(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.load_state().await?.outputs)
    }

    async fn apply_locked(
        &self,
        plan: Option<Plan>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyReport> {
        let mut snapshot = self.load_state().await?;
        let outputs = declared_outputs(self.config);

        let plan = match plan {
            Some(plan) => {
                plan.check_fresh(&snapshot)?;
                if snapshot.serial == 0 {
                    snapshot.lineage.clone_from(&plan.lineage);
                }
                if plan.config_hash != self.config_hash() {
                    warn!("Stack file changed since the plan was saved, applying the saved plan");
                }
                plan
            }
            None => {
                let graph = self.load_graph()?;
                self.synthesizer().synthesize(&graph, &snapshot)?
            }
        };

        if !plan.has_changes() && evaluate_outputs(&outputs, &snapshot) == snapshot.outputs {
            info!("No changes required, stack is converged");
            return Ok(ApplyReport::from_plan(&plan, &snapshot));
        }

        let outputs = match plan.operation {
            StackOperation::Destroy => BTreeMap::new(),
            _ => outputs,
        };
        self.execute(&plan, snapshot, outputs, cancel).await
    }

    async fn destroy_locked(&self, cancel: Option<watch::Receiver<bool>>) -> Result<ApplyReport> {
        let snapshot = self.load_state().await?;
        let plan = self.synthesizer().synthesize_destroy(&snapshot)?;
        self.execute(&plan, snapshot, BTreeMap::new(), cancel).await
    }

    async fn refresh_locked(&self) -> Result<DriftReport> {
        let mut snapshot = self.load_state().await?;
        let report = self.refresh(&mut snapshot).await?;
        if report.has_drift() {
            let config_hash = snapshot.config_hash.clone();
            snapshot.add_history(HistoryEntry::new(
                StackOperation::Refresh,
                &config_hash,
                report.affected(),
            ));
            snapshot.bump_serial();
            self.store.save(&snapshot).await?;
        }
        Ok(report)
    }

    async fn execute(
        &self,
        plan: &Plan,
        snapshot: StateSnapshot,
        outputs: BTreeMap<String, PropertyValue>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyReport> {
        let mut executor = PlanExecutor::new(self.provisioner, self.store, &self.catalog)
            .with_execution(self.config.execution)
            .with_outputs(outputs);
        if let Some(cancel) = cancel {
            executor = executor.with_cancellation(cancel);
        }

        let snapshot = executor.apply(plan, snapshot).await?;
        Ok(ApplyReport::from_plan(plan, &snapshot))
    }

    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Properties>> {
        let secs = self.config.execution.operation_timeout_secs;
        let read = self.provisioner.read(kind, remote_id);
        match tokio::time::timeout(Duration::from_secs(secs), read).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProviderError::Timeout {
                operation: format!("read {kind} {remote_id}"),
                secs,
            }
            .into()),
        }
    }

    async fn lock(&self, operation: StackOperation) -> Result<LockInfo> {
        let lock = self
            .store
            .acquire_lock(&self.holder, &operation.to_string())
            .await?;
        debug!(lock_id = %lock.lock_id, %operation, "Acquired state lock");
        Ok(lock)
    }

    /// Drives `work` to completion, renewing `lock` every `lock_renewal`.
    async fn hold<T>(&self, lock: &LockInfo, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::pin!(work);
        let start = tokio::time::Instant::now() + self.lock_renewal;
        let mut renew = tokio::time::interval_at(start, self.lock_renewal);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = renew.tick() => match self.store.renew_lock(&lock.lock_id).await {
                    Ok(renewed) => {
                        debug!(lock_id = %renewed.lock_id, expires_at = %renewed.expires_at, "Renewed state lock");
                    }
                    Err(e) => warn!(error = %e, lock_id = %lock.lock_id, "Failed to renew state lock"),
                },
            }
        }
    }

    async fn unlock(&self, lock: &LockInfo) {
        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!(error = %e, lock_id = %lock.lock_id, "Failed to release state lock");
        }
    }

    fn synthesizer(&self) -> PlanSynthesizer<'_> {
        PlanSynthesizer::new(&self.catalog).with_config_hash(self.config_hash())
    }

    fn config_hash(&self) -> String {
        self.hasher.hash_config(self.config)
    }
}

/// Builds the declaration graph of a stack file.
///
/// # Errors
///
/// Returns an error for unknown kinds, duplicate ids, unresolved
/// references (including those of stack outputs) and cycles.
pub fn build_graph(config: &StackConfig, catalog: &Catalog) -> Result<ResourceGraph> {
    let registry = ResourceRegistry::from_config(config)?;
    ReferenceResolver::new(catalog).check_outputs(&registry, &declared_outputs(config))?;
    let graph = ResourceGraph::from_registry(registry, catalog)?;
    debug!(resources = graph.len(), edges = graph.edges().len(), "Built resource graph");
    Ok(graph)
}

/// Lists the nodes of a graph in dependency order.
#[must_use]
pub fn graph_nodes(graph: &ResourceGraph) -> Vec<GraphNode> {
    graph
        .topological_order()
        .into_iter()
        .filter_map(|id| {
            let spec = graph.spec(id)?;
            Some(GraphNode {
                id: id.to_string(),
                kind: spec.kind,
                dependencies: graph.dependencies_of(id).map(str::to_string).collect(),
            })
        })
        .collect()
}

fn declared_outputs(config: &StackConfig) -> BTreeMap<String, PropertyValue> {
    config
        .outputs
        .iter()
        .map(|(name, output)| (name.clone(), PropertyValue::parse(&output.value)))
        .collect()
}

impl ApplyReport {
    fn from_plan(plan: &Plan, snapshot: &StateSnapshot) -> Self {
        Self {
            operation: plan.operation,
            created: plan.count(ActionKind::Create),
            updated: plan.count(ActionKind::Update),
            replaced: plan.count(ActionKind::Replace),
            deleted: plan.count(ActionKind::Delete),
            unchanged: plan.count(ActionKind::NoOp),
            serial: snapshot.serial,
            outputs: snapshot.outputs.clone(),
        }
    }

    /// Returns true if any resource was touched.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.created + self.updated + self.replaced + self.deleted > 0
    }
}

impl DriftReport {
    /// Returns true if anything moved remotely.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty() || !self.vanished.is_empty()
    }

    /// Logical ids of every drifted or vanished resource.
    #[must_use]
    pub fn affected(&self) -> Vec<String> {
        self.drifted
            .iter()
            .map(|d| d.id.clone())
            .chain(self.vanished.iter().cloned())
            .collect()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(f, "No drift detected in {} resources", self.checked);
        }
        writeln!(f, "Drift detected:")?;
        for drift in &self.drifted {
            writeln!(f, "  ~ {} ({}): {}", drift.id, drift.kind, drift.changed.join(", "))?;
        }
        for id in &self.vanished {
            writeln!(f, "  - {id}: no longer exists")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} complete:", capitalize(&self.operation.to_string()))?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        write!(f, "  Unchanged: {}", self.unchanged)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
