// Registry Module
// Type-keyed strategy lookup, populated once at boot and read-only afterwards

use crate::error::{EngineError, EngineResult};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Mutable registration phase of a registry
pub struct RegistryBuilder<V: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Arc<V>>,
}

impl<V: ?Sized> RegistryBuilder<V> {
    /// `kind` names the registry in error messages ("adviser", "facilitator", ...)
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register `value` under `key`; a key can only be registered once
    pub fn register(&mut self, key: impl Into<String>, value: Arc<V>) -> EngineResult<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(EngineError::DuplicateRegistration {
                kind: self.kind,
                key,
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Freeze into an immutable registry
    pub fn build(self) -> Registry<V> {
        Registry {
            kind: self.kind,
            entries: Arc::new(self.entries),
        }
    }
}

/// Immutable, cheaply clonable type registry
pub struct Registry<V: ?Sized> {
    kind: &'static str,
    entries: Arc<HashMap<String, Arc<V>>>,
}

impl<V: ?Sized> Registry<V> {
    /// Look up the strategy registered under `key`
    pub fn obtain(&self, key: &str) -> EngineResult<Arc<V>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::unregistered(self.kind, key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl<V: ?Sized> Clone for Registry<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V: ?Sized> fmt::Debug for Registry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .finish()
    }
}
