use std::collections::HashMap;

use parking_lot::RwLock;

/// String-keyed registry behind a reader/writer lock
#[derive(Debug)]
pub(crate) struct Registry<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V: Clone> Registry<V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Registry {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Inserts unless the key is taken; returns whether it was inserted
    pub(crate) fn insert_new(&self, key: &str, value: V) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), value);
        true
    }

    /// Returns the existing value or inserts the one built by `make`, in one
    /// critical section. The flag tells whether `make` ran.
    pub(crate) fn find_or_insert_with(&self, key: &str, make: impl FnOnce() -> V) -> (V, bool) {
        if let Some(value) = self.get(key) {
            return (value, false);
        }
        let mut entries = self.entries.write();
        if let Some(value) = entries.get(key) {
            return (value.clone(), false);
        }
        let value = make();
        entries.insert(key.to_string(), value.clone());
        (value, true)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<V> {
        self.entries.write().remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn values(&self) -> Vec<V> {
        self.entries.read().values().cloned().collect()
    }

    /// Empties the registry, handing back what it held
    pub(crate) fn drain(&self) -> Vec<V> {
        self.entries.write().drain().map(|(_, value)| value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_find_or_insert_runs_once() {
        let registry: Registry<Arc<u32>> = Registry::with_capacity(4);
        let (first, created) = registry.find_or_insert_with("k", || Arc::new(1));
        assert!(created);
        let (second, created) = registry.find_or_insert_with("k", || Arc::new(2));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_new_and_drain() {
        let registry = Registry::with_capacity(4);
        assert!(registry.insert_new("a", 1));
        assert!(!registry.insert_new("a", 2));
        assert_eq!(registry.get("a"), Some(1));
        assert!(registry.insert_new("b", 3));
        assert_eq!(registry.remove("b"), Some(3));
        assert!(registry.contains("a"));
        assert_eq!(registry.values(), vec![1]);
        assert_eq!(registry.drain(), vec![1]);
        assert_eq!(registry.len(), 0);
    }
}
