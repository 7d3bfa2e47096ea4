//! Per-VM-name mutual exclusion.
//!
//! Two lifecycle operations on the same name must not interleave their
//! resolve → mutate → record sequences. Operations on different names run
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async mutexes, one per VM name currently in use.
#[derive(Debug, Clone, Default)]
pub struct VmLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl VmLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`. Released when the guard drops.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            // Drop slots nobody holds or waits on.
            slots.retain(|key, slot| key == name || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(name.to_owned()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of names with a live slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
