//! Change planning and execution.
//!
//! This module diffs the declared graph against the recorded snapshot,
//! orders the resulting actions and applies them through a provisioner.

mod diff;
mod executor;
mod plan;
mod synthesizer;

pub use diff::{DiffEngine, PlannedValue, PropertyChange, update_payload};
pub use executor::{PlanExecutor, evaluate_outputs};
pub use plan::{ActionKind, Phase, Plan, PlanAction, Step};
pub use synthesizer::PlanSynthesizer;
