//! Duplicate-request rejection.
//!
//! A key derived from an RPC's stable fields is held in this registry for
//! the duration of the operation; a second request with the same key is
//! refused instead of racing the first.

use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};

/// Thread-safe set of in-flight operation keys.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key. Returns `false` when an operation with this key is
    /// already executing.
    pub fn insert(&self, key: &str) -> bool {
        self.keys.lock().insert(key.to_string())
    }

    /// Removes a key, making the operation admissible again.
    pub fn delete(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    /// Registers a key and returns a guard that releases it on drop, so the
    /// key is freed on every exit path including panics.
    pub fn acquire(&self, key: &str) -> Option<InFlightGuard> {
        if self.insert(key) {
            Some(InFlightGuard {
                registry: self.clone(),
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlight,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.delete(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_are_rejected() {
        let registry = InFlight::new();
        assert!(registry.insert("vol-1"));
        assert!(!registry.insert("vol-1"));
        registry.delete("vol-1");
        assert!(registry.insert("vol-1"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let registry = InFlight::new();
        {
            let _guard = registry.acquire("vol-1").unwrap();
            assert!(registry.acquire("vol-1").is_none());
        }
        assert!(registry.acquire("vol-1").is_some());
    }
}
