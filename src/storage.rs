//! Durable client-local key/value storage.
//! Timer snapshots live here under namespaced keys; the engine treats every
//! call as best-effort and keeps its in-memory state authoritative.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Key/value backend for timer snapshots
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove_item(&self, key: &str) -> Result<(), String>;
    /// All keys starting with `prefix`, in key order
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, String>;
}

/// In-process storage (tests, or when no database could be opened)
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_items(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, String> {
        self.items
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))
    }

    pub fn len(&self) -> usize {
        self.lock_items().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.lock_items()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.lock_items()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.lock_items()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        Ok(self
            .lock_items()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
