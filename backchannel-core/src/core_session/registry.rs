//! Session registry
//!
//! Process-wide set of account names with a live authenticated connection.
//! `add` is the atomic commit point for authentication: callers race freely
//! across the hash/verify suspension points and only the winner of `add`
//! binds the name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Cheaply cloneable handle to the shared set.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name. Returns `false` when the name already has a live session.
    pub fn add(&self, name: &str) -> bool {
        self.lock().insert(name.to_string())
    }

    /// Release a name. Returns `false` when the name was not bound.
    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // a poisoned lock only means a panic elsewhere; the set itself is
        // still coherent
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rejects_duplicates() {
        let registry = SessionRegistry::new();
        assert!(registry.add("alice"));
        assert!(!registry.add("alice"));
        assert!(registry.add("bob"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_a_no_op_when_absent() {
        let registry = SessionRegistry::new();
        assert!(!registry.remove("alice"));

        assert!(registry.add("alice"));
        assert!(registry.remove("alice"));
        assert!(!registry.contains("alice"));
        // name is free again
        assert!(registry.add("alice"));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = SessionRegistry::new();
        let other = registry.clone();
        registry.add("alice");
        assert!(other.contains("alice"));
    }
}
