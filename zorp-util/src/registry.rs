//! A typed registry keyed by name, used to look up concrete stream-layer
//! factories, codec factories, and other pluggable pieces by a short
//! string name (as used in configuration and log tags) without the caller
//! needing to depend on every concrete implementation.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

/// A name -> value map where each value also carries its static type, so a
/// caller that knows the expected type gets a checked downcast instead of
/// an `Any` it has to trust.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.entries.write().insert(
            name.into(),
            Entry {
                type_id: TypeId::of::<T>(),
                value: Arc::new(value),
            },
        );
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    /// Looks up `name` and downcasts it to `T`. Returns `None` both when
    /// the name is absent and when it is present under a different type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entries = self.entries.read();
        let entry = entries.get(name)?;
        if entry.type_id != TypeId::of::<T>() {
            return None;
        }
        entry.value.clone().downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get_round_trips() {
        let reg = Registry::new();
        reg.register("line", 42usize);
        assert_eq!(*reg.get::<usize>("line").unwrap(), 42);
    }

    #[test]
    fn get_with_wrong_type_is_none() {
        let reg = Registry::new();
        reg.register("line", 42usize);
        assert!(reg.get::<String>("line").is_none());
    }

    #[test]
    fn unregister_removes_entry() {
        let reg = Registry::new();
        reg.register("x", 1u8);
        assert!(reg.unregister("x"));
        assert!(reg.get::<u8>("x").is_none());
    }
}
