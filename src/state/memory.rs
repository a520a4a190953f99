//! In-memory state store for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateSnapshot;

/// Keeps every saved snapshot so tests can inspect intermediate commits.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    saves: Mutex<Vec<StateSnapshot>>,
    lock: Mutex<Option<LockInfo>>,
    renewals: Mutex<usize>,
    fail_saves: bool,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose saves always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// Every snapshot saved so far, oldest first.
    pub fn saves(&self) -> Vec<StateSnapshot> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of successful lock renewals.
    pub fn renewals(&self) -> usize {
        self.renewals.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        Ok(self.saves.lock().ok().and_then(|s| s.last().cloned()))
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        if self.fail_saves {
            return Err(StateError::storage("disk full").into());
        }
        if let Ok(mut saves) = self.saves.lock() {
            saves.push(state.clone());
        }
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if let Ok(mut saves) = self.saves.lock() {
            saves.clear();
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.saves.lock().is_ok_and(|s| !s.is_empty()))
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let mut lock = self
            .lock
            .lock()
            .map_err(|e| StateError::LockFailed { message: e.to_string() })?;
        if let Some(existing) = lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into());
        }
        let info = LockInfo::new(holder, operation);
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut lock = self
            .lock
            .lock()
            .map_err(|e| StateError::LockFailed { message: e.to_string() })?;
        let Some(held) = lock.as_mut().filter(|l| l.lock_id == lock_id) else {
            return Err(StateError::LockFailed {
                message: format!("lock {lock_id} is no longer held"),
            }
            .into());
        };
        held.refresh();
        let renewed = held.clone();
        drop(lock);

        if let Ok(mut renewals) = self.renewals.lock() {
            *renewals += 1;
        }
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Ok(mut lock) = self.lock.lock() {
            if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
                *lock = None;
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Ok(mut lock) = self.lock.lock() {
            *lock = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().ok().and_then(|l| l.clone()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
