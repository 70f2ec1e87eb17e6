use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// How a store serializes operations on the same object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum LockMode {
    /// No serialization. Concurrent writers to one object race on the
    /// substrate.
    None,
    /// A striped mutex table keyed by resolved location, held across each
    /// read-validate-write sequence.
    PerKey { stripes: usize },
}

impl Default for LockMode {
    fn default() -> Self {
        Self::PerKey { stripes: 64 }
    }
}

/// Striped per-key lock table.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new(mode: LockMode) -> Self {
        let count = match mode {
            LockMode::None => 0,
            LockMode::PerKey { stripes } => stripes.max(1),
        };
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn mode(&self) -> LockMode {
        match self.stripes.len() {
            0 => LockMode::None,
            stripes => LockMode::PerKey { stripes },
        }
    }

    /// Lock the stripe owning `key`. Returns `None` when locking is off.
    ///
    /// The guarded value is `()`, so a poisoned stripe carries no broken
    /// state and is simply reacquired.
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> Option<MutexGuard<'_, ()>> {
        if self.stripes.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        Some(self.stripes[index].lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLocks")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}
