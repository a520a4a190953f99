//! Resource kind catalog.
//!
//! Resource kinds are plain data: a schema per kind describing allowed
//! properties, which of them can change in place, the outputs a kind
//! produces, and how a replacement is sequenced. Behaviour is looked up by
//! kind tag through [`Catalog`], never through per-kind types.

mod kinds;

pub use kinds::{Catalog, KindSchema, PropertySchema, REMOVAL_POLICY, ReplaceOrder, ResourceKind};
