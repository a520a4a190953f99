//! Declaration graph.
//!
//! This module takes the declared resources through three build-time
//! stages, none of which touch remote state:
//!
//! - [`ResourceRegistry`] holds the specs and rejects duplicate ids
//! - [`ReferenceResolver`] turns `${id.output}` references into edges
//! - [`GraphBuilder`] merges explicit hints and rejects cycles

mod builder;
mod registry;
mod resolver;
mod value;

pub use builder::{GraphBuilder, ResourceGraph, kahn_order};
pub use registry::{ResourceRegistry, ResourceSpec};
pub use resolver::{DependencyEdge, ReferenceResolver};
pub use value::{PropertyValue, Reference, TemplatePart};
