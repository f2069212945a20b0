use std::sync::Arc;

use parking_lot::RwLock;

use crate::trainer::ModelSet;

/// Holds the committed model set. Readers clone the `Arc` and keep using that snapshot
/// for the rest of their request; a retrain replaces the whole set in one write.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    current: RwLock<Option<Arc<ModelSet>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<ModelSet>> {
        self.current.read().clone()
    }

    /// Returns the set that was replaced, if any.
    pub fn replace(&self, set: ModelSet) -> Option<Arc<ModelSet>> {
        let next = Arc::new(set);
        let mut guard = self.current.write();
        guard.replace(next)
    }

    pub fn clear(&self) -> Option<Arc<ModelSet>> {
        self.current.write().take()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let registry = ModelRegistry::new();
        assert!(registry.snapshot().is_none());

        let mut first = ModelSet::empty();
        first.training_rows = 1;
        registry.replace(first);
        let held = registry.snapshot().expect("committed");

        let mut second = ModelSet::empty();
        second.training_rows = 2;
        let old = registry.replace(second).expect("previous set");

        assert_eq!(held.training_rows, 1);
        assert!(Arc::ptr_eq(&held, &old));
        assert_eq!(registry.snapshot().map(|s| s.training_rows), Some(2));
    }
}
