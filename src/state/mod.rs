//! State management.
//!
//! Persists the [`StateSnapshot`] between runs and guards it with a lock.
//! Two backends are provided: a local JSON file and an S3 object.

mod local;
mod lock;
#[cfg(test)]
mod memory;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_RENEW_SECS, LockInfo, generate_holder_id};
#[cfg(test)]
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    DeposedObject, HistoryEntry, ResourceState, STATE_VERSION, StackOperation, StateSnapshot,
};
