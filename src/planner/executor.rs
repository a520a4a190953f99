//! Plan executor.
//!
//! Launches actions in plan order once their prerequisites are done, with
//! at most `parallelism` remote operations in flight. Objects superseded by
//! a replacement are deleted in a separate phase, once every dependent is
//! done with them. Every confirmed
//! remote operation is committed to the snapshot and persisted before the
//! next one is recorded, so an interrupted apply leaves a consistent
//! partial snapshot behind. The first failure stops new launches; there is
//! no rollback.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, ResourceKind};
use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, ProviderError};
use crate::graph::{PropertyValue, Reference};
use crate::provider::{Properties, Provisioner};
use crate::state::{HistoryEntry, ResourceState, StateSnapshot, StateStore};

use super::diff::update_payload;
use super::plan::{ActionKind, Phase, Plan, PlanAction, Step};

/// Applies plans through a provisioner.
pub struct PlanExecutor<'a> {
    provisioner: &'a dyn Provisioner,
    store: &'a dyn StateStore,
    catalog: &'a Catalog,
    execution: ExecutionConfig,
    outputs: BTreeMap<String, PropertyValue>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Why an action stopped.
#[derive(Debug)]
enum Failure {
    Action {
        resource_id: String,
        action: ActionKind,
        cause: ProviderError,
    },
    Unresolvable {
        resource_id: String,
        message: String,
    },
    Persist {
        resource_id: String,
        action: ActionKind,
        message: String,
    },
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor with default execution settings.
    #[must_use]
    pub fn new(
        provisioner: &'a dyn Provisioner,
        store: &'a dyn StateStore,
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            provisioner,
            store,
            catalog,
            execution: ExecutionConfig::default(),
            outputs: BTreeMap::new(),
            cancel: None,
        }
    }

    /// Sets parallelism, timeouts and retries.
    #[must_use]
    pub const fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Sets the stack outputs evaluated after the last action.
    #[must_use]
    pub fn with_outputs(mut self, outputs: BTreeMap<String, PropertyValue>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Stops launching actions once the receiver reads `true`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Applies a plan on top of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutionError` carrying the partial snapshot if an
    /// action fails, state cannot be persisted, or the run is cancelled.
    pub async fn apply(
        &self,
        plan: &Plan,
        snapshot: StateSnapshot,
    ) -> Result<StateSnapshot, ExecutionError> {
        let total = plan.changes().count();
        info!(actions = total, operation = %plan.operation, "Applying plan");

        let state = Mutex::new(snapshot);
        // Main phase finished; dependents may start.
        let mut done: BTreeSet<&str> = BTreeSet::new();
        // Every phase finished.
        let mut finished: BTreeSet<&str> = BTreeSet::new();

        {
            let mut snapshot = state.lock().await;
            for action in plan.actions.iter().filter(|a| a.action == ActionKind::NoOp) {
                if let Some(resource) = snapshot.get_mut(&action.resource_id) {
                    resource.dependencies.clone_from(&action.dependencies);
                }
                done.insert(action.resource_id.as_str());
                finished.insert(action.resource_id.as_str());
            }
        }

        let mut pending: VecDeque<(&PlanAction, Phase)> =
            plan.changes().map(|a| (a, Phase::Main)).collect();
        let mut in_flight = FuturesUnordered::new();
        let parallelism = self.execution.parallelism.max(1);
        let mut failure: Option<Failure> = None;
        let mut cancelled = false;
        let mut completed = 0;

        loop {
            if failure.is_none() && !cancelled && !pending.is_empty() {
                if self.is_cancelled() {
                    warn!(completed, total, "Cancellation requested, waiting for in-flight actions");
                    cancelled = true;
                } else {
                    let mut i = 0;
                    while in_flight.len() < parallelism && i < pending.len() {
                        let (action, phase) = pending[i];
                        let ready = match phase {
                            Phase::Main => action
                                .prerequisites
                                .iter()
                                .all(|p| done.contains(p.as_str())),
                            Phase::Purge => action
                                .purge_after
                                .iter()
                                .all(|p| finished.contains(p.as_str())),
                        };
                        if ready && pending.remove(i).is_some() {
                            in_flight.push(self.run(action, phase, &state));
                        } else {
                            i += 1;
                        }
                    }
                }
            }

            let Some((action, phase, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(()) if phase == Phase::Main && action.purges_later() => {
                    done.insert(action.resource_id.as_str());
                    pending.push_back((action, Phase::Purge));
                }
                Ok(()) => {
                    completed += 1;
                    done.insert(action.resource_id.as_str());
                    finished.insert(action.resource_id.as_str());
                }
                Err(cause) => {
                    error!(resource = %action.resource_id, action = %action.action, "{cause}");
                    failure.get_or_insert(cause);
                }
            }
        }
        drop(in_flight);

        let mut snapshot = state.into_inner();

        if let Some(failure) = failure {
            self.record_failure(plan, &mut snapshot, &failure.to_string()).await;
            return Err(failure.into_error(snapshot));
        }

        if cancelled {
            self.record_failure(plan, &mut snapshot, "cancelled").await;
            return Err(ExecutionError::Cancelled {
                completed,
                total,
                snapshot,
            });
        }

        if let Some((stuck, _)) = pending.front() {
            let failure = Failure::Unresolvable {
                resource_id: stuck.resource_id.clone(),
                message: String::from("prerequisites never completed"),
            };
            self.record_failure(plan, &mut snapshot, &failure.to_string()).await;
            return Err(failure.into_error(snapshot));
        }

        self.finish(plan, snapshot).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn run<'p>(
        &self,
        action: &'p PlanAction,
        phase: Phase,
        state: &Mutex<StateSnapshot>,
    ) -> (&'p PlanAction, Phase, Result<(), Failure>) {
        match phase {
            Phase::Main => {
                info!(resource = %action.resource_id, action = %action.action, "{}", action.description());
            }
            Phase::Purge => debug!(resource = %action.resource_id, "Purging superseded objects"),
        }

        for step in action.steps(phase) {
            let result = match step {
                Step::Create => self.create(action, state).await,
                Step::Update => self.update(action, state).await,
                Step::Delete => self.delete(action, state).await,
                Step::PurgeDeposed => self.purge_deposed(action, state).await,
            };
            if let Err(failure) = result {
                return (action, phase, Err(failure));
            }
        }

        (action, phase, Ok(()))
    }

    async fn create(&self, action: &PlanAction, state: &Mutex<StateSnapshot>) -> Result<(), Failure> {
        let properties = Self::resolve(action, state).await?;

        let created = self
            .call(action.kind, "create", || {
                self.provisioner
                    .create(action.kind, &action.resource_id, &properties)
            })
            .await
            .map_err(|cause| Failure::action(action, cause))?;

        info!(resource = %action.resource_id, remote_id = %created.remote_id, "Created");

        let mut snapshot = state.lock().await;
        let mut resource = ResourceState::new(
            &action.resource_id,
            action.kind,
            &created.remote_id,
            properties,
            created.outputs,
        );
        resource.dependencies.clone_from(&action.dependencies);
        resource.retain = action.retain;
        if let Some(previous) = snapshot.get(&action.resource_id) {
            resource.deposed.clone_from(&previous.deposed);
            resource.deposed.push(previous.to_deposed());
        }
        snapshot.set_resource(resource);

        self.persist(&mut snapshot, action).await
    }

    async fn update(&self, action: &PlanAction, state: &Mutex<StateSnapshot>) -> Result<(), Failure> {
        let properties = Self::resolve(action, state).await?;

        let (remote_id, payload) = {
            let snapshot = state.lock().await;
            let Some(recorded) = snapshot.get(&action.resource_id) else {
                return Err(Failure::Unresolvable {
                    resource_id: action.resource_id.clone(),
                    message: String::from("no recorded object to update"),
                });
            };
            (
                recorded.remote_id.clone(),
                update_payload(&properties, &recorded.properties),
            )
        };

        let outputs = if payload.is_empty() {
            debug!(resource = %action.resource_id, "No property changes to send");
            BTreeMap::new()
        } else {
            self.call(action.kind, "update", || {
                self.provisioner.update(action.kind, &remote_id, &payload)
            })
            .await
            .map_err(|cause| Failure::action(action, cause))?
        };

        let mut snapshot = state.lock().await;
        if let Some(resource) = snapshot.get_mut(&action.resource_id) {
            resource.set_properties(properties);
            resource.merge_outputs(outputs);
            resource.dependencies.clone_from(&action.dependencies);
            resource.retain = action.retain;
        }

        self.persist(&mut snapshot, action).await
    }

    async fn delete(&self, action: &PlanAction, state: &Mutex<StateSnapshot>) -> Result<(), Failure> {
        let recorded = state.lock().await.get(&action.resource_id).cloned();
        let Some(recorded) = recorded else {
            debug!(resource = %action.resource_id, "Nothing recorded to delete");
            return Ok(());
        };

        if recorded.is_retained() {
            warn!(
                resource = %action.resource_id,
                remote_id = %recorded.remote_id,
                "removal_policy is retain, forgetting without deleting"
            );
        } else {
            self.delete_remote(action, recorded.kind, &recorded.remote_id)
                .await?;
        }

        let mut snapshot = state.lock().await;
        snapshot.remove_resource(&action.resource_id);

        self.persist(&mut snapshot, action).await
    }

    async fn purge_deposed(
        &self,
        action: &PlanAction,
        state: &Mutex<StateSnapshot>,
    ) -> Result<(), Failure> {
        let deposed = state
            .lock()
            .await
            .get(&action.resource_id)
            .map(|r| r.deposed.clone())
            .unwrap_or_default();

        for object in deposed {
            if object.retain {
                warn!(
                    resource = %action.resource_id,
                    remote_id = %object.remote_id,
                    "removal_policy is retain, leaving replaced object in place"
                );
            } else {
                self.delete_remote(action, object.kind, &object.remote_id)
                    .await?;
            }

            let mut snapshot = state.lock().await;
            if let Some(resource) = snapshot.get_mut(&action.resource_id) {
                resource.deposed.retain(|d| d.remote_id != object.remote_id);
            }
            self.persist(&mut snapshot, action).await?;
        }

        Ok(())
    }

    async fn delete_remote(
        &self,
        action: &PlanAction,
        kind: ResourceKind,
        remote_id: &str,
    ) -> Result<(), Failure> {
        match self
            .call(kind, "delete", || self.provisioner.delete(kind, remote_id))
            .await
        {
            Ok(()) => {
                info!(resource = %action.resource_id, remote_id, "Deleted");
                Ok(())
            }
            Err(ProviderError::NotFound { .. }) => {
                info!(resource = %action.resource_id, remote_id, "Already deleted");
                Ok(())
            }
            Err(cause) => Err(Failure::action(action, cause)),
        }
    }

    /// Resolves declared properties against the live snapshot.
    async fn resolve(
        action: &PlanAction,
        state: &Mutex<StateSnapshot>,
    ) -> Result<Properties, Failure> {
        let snapshot = state.lock().await;
        let lookup = |r: &Reference| snapshot.output(&r.resource, &r.output).cloned();

        action
            .desired
            .iter()
            .map(|(name, value)| {
                value
                    .resolve(&lookup)
                    .map(|resolved| (name.clone(), resolved))
                    .ok_or_else(|| Failure::Unresolvable {
                        resource_id: action.resource_id.clone(),
                        message: format!("'{name}' references an output with no recorded value"),
                    })
            })
            .collect()
    }

    /// Runs one remote call under the operation timeout, retrying transient
    /// failures for idempotent kinds.
    async fn call<T, F, Fut>(
        &self,
        kind: ResourceKind,
        operation: &'static str,
        f: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let secs = self.execution.operation_timeout_secs;
        let attempts = if self.catalog.schema(kind).idempotent {
            self.execution.max_retries.saturating_add(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(Duration::from_secs(secs), f())
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Timeout {
                        operation: operation.to_string(),
                        secs,
                    })
                });

            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self
                        .execution
                        .retry_delay_ms
                        .saturating_mul(u64::from(attempt));
                    warn!(%kind, operation, attempt, error = %e, "Transient failure, retrying in {delay}ms");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn persist(&self, snapshot: &mut StateSnapshot, action: &PlanAction) -> Result<(), Failure> {
        snapshot.bump_serial();
        self.store
            .save(snapshot)
            .await
            .map_err(|e| Failure::Persist {
                resource_id: action.resource_id.clone(),
                action: action.action,
                message: e.to_string(),
            })
    }

    async fn finish(
        &self,
        plan: &Plan,
        mut snapshot: StateSnapshot,
    ) -> Result<StateSnapshot, ExecutionError> {
        snapshot.outputs = evaluate_outputs(&self.outputs, &snapshot);
        snapshot.config_hash.clone_from(&plan.config_hash);
        snapshot.add_history(HistoryEntry::new(
            plan.operation,
            &plan.config_hash,
            changed_ids(plan),
        ));
        snapshot.bump_serial();

        if let Err(e) = self.store.save(&snapshot).await {
            return Err(ExecutionError::FinalizeFailed {
                message: e.to_string(),
                snapshot,
            });
        }

        info!(serial = snapshot.serial, "{}", plan.summary());
        Ok(snapshot)
    }

    async fn record_failure(&self, plan: &Plan, snapshot: &mut StateSnapshot, message: &str) {
        snapshot.add_history(HistoryEntry::failed(
            plan.operation,
            &plan.config_hash,
            changed_ids(plan),
            message,
        ));
        snapshot.bump_serial();
        if let Err(e) = self.store.save(snapshot).await {
            error!(error = %e, "Failed to record the failed run in state");
        }
    }
}

/// Evaluates stack outputs against a snapshot.
///
/// Outputs whose references have no recorded value are left out.
#[must_use]
pub fn evaluate_outputs(
    outputs: &BTreeMap<String, PropertyValue>,
    snapshot: &StateSnapshot,
) -> BTreeMap<String, Value> {
    let lookup = |r: &Reference| snapshot.output(&r.resource, &r.output).cloned();

    outputs
        .iter()
        .filter_map(|(name, value)| {
            let resolved = value.resolve(&lookup);
            if resolved.is_none() {
                warn!(output = %name, "Output references a value that is not recorded");
            }
            resolved.map(|v| (name.clone(), v))
        })
        .collect()
}

fn changed_ids(plan: &Plan) -> Vec<String> {
    plan.changes().map(|a| a.resource_id.clone()).collect()
}

impl Failure {
    fn action(action: &PlanAction, cause: ProviderError) -> Self {
        Self::Action {
            resource_id: action.resource_id.clone(),
            action: action.action,
            cause,
        }
    }

    fn into_error(self, snapshot: StateSnapshot) -> ExecutionError {
        match self {
            Self::Action {
                resource_id,
                action,
                cause,
            } => ExecutionError::ActionFailed {
                resource_id,
                action,
                cause,
                snapshot,
            },
            Self::Unresolvable {
                resource_id,
                message,
            } => ExecutionError::Unresolvable {
                resource_id,
                message,
                snapshot,
            },
            Self::Persist {
                resource_id,
                action,
                message,
            } => ExecutionError::PersistFailed {
                resource_id,
                action,
                message,
                snapshot,
            },
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action {
                resource_id,
                action,
                cause,
            } => write!(f, "{action} of '{resource_id}' failed: {cause}"),
            Self::Unresolvable {
                resource_id,
                message,
            } => write!(f, "cannot resolve properties of '{resource_id}': {message}"),
            Self::Persist {
                resource_id,
                action,
                message,
            } => write!(f, "failed to persist state after {action} of '{resource_id}': {message}"),
        }
    }
}
