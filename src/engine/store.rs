// src/engine/store.rs

//! The run-wide shared key/value store.
//!
//! Owned by the orchestrator. Each attempt gets a copy when it is launched
//! and its writes are merged back once the worker exits.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

/// One write recorded by a task.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Set { key: String, value: Value },
    Remove { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(values)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply the writes from one attempt, in order.
    pub fn merge(&self, writes: &[StoreWrite]) {
        if writes.is_empty() {
            return;
        }
        let mut map = self.lock();
        for write in writes {
            match write {
                StoreWrite::Set { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                StoreWrite::Remove { key } => {
                    map.remove(key);
                }
            }
        }
    }

    /// Overlay restored values on top of the current contents.
    pub fn extend(&self, values: BTreeMap<String, Value>) {
        self.lock().extend(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_applies_writes_in_order() {
        let store = SharedStore::new();
        store.merge(&[
            StoreWrite::Set {
                key: "a".into(),
                value: Value::from(1),
            },
            StoreWrite::Set {
                key: "b".into(),
                value: Value::from(2),
            },
            StoreWrite::Remove { key: "a".into() },
        ]);

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(Value::from(2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = SharedStore::from_map(BTreeMap::from([("k".to_string(), Value::from("v"))]));
        let snap = store.snapshot();
        store.merge(&[StoreWrite::Remove { key: "k".into() }]);

        assert_eq!(snap.get("k"), Some(&Value::from("v")));
        assert!(store.is_empty());
    }
}
