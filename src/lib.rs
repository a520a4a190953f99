// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests assert with unwrap and panic freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # stackplan
//!
//! A declarative engine that plans and applies changes to a stack of
//! interdependent cloud resources, such as a static website behind a CDN.
//!
//! ## Overview
//!
//! A stack file declares resources by logical id. Properties may reference
//! outputs of other resources with `${id.output}`; those references decide
//! the order in which resources are created, changed and removed.
//!
//! - Build a dependency graph from the declarations and reject cycles
//! - Diff it against the recorded state snapshot into an ordered plan
//! - Apply the plan through a provisioning API, committing state after
//!   every confirmed remote operation
//!
//! ## Pipeline
//!
//! 1. **Registry**: declarations keyed by logical id
//! 2. **Resolver**: references turned into dependency edges
//! 3. **Graph**: explicit hints merged, cycles rejected
//! 4. **Synthesizer**: create / update / replace / delete / no-op per resource
//! 5. **Executor**: actions launched once their prerequisites are done
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing and validation
//! - [`catalog`]: Resource kind schemas
//! - [`graph`]: Registry, reference resolution and graph building
//! - [`planner`]: Plan synthesis and execution
//! - [`provider`]: Provisioning API backends
//! - [`state`]: State storage backends (local, S3)
//! - [`engine`]: Plan, apply, destroy and drift refresh
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: static-site
//!
//! resources:
//!   assets:
//!     kind: bucket
//!     properties:
//!       bucket_name: example-com-site-assets
//!       removal_policy: retain
//!   cdn:
//!     kind: distribution
//!     properties:
//!       origin_domain_name: ${assets.regional_domain_name}
//!
//! outputs:
//!   DistributionDomainName:
//!     value: ${cdn.domain_name}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use catalog::{Catalog, KindSchema, ResourceKind};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use engine::{ApplyReport, DriftReport, Engine};
pub use error::{Result, StackError};
pub use graph::{ResourceGraph, ResourceRegistry, ResourceSpec};
pub use planner::{Plan, PlanAction, PlanExecutor, PlanSynthesizer};
pub use provider::{HttpProvisioner, MemoryProvisioner, Provisioner};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
