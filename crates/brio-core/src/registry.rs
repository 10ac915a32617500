//! The runtime name-table collaborator.
//!
//! Generated artifacts never dispatch by name at execution time. During
//! artifact initialization they resolve each function, class, and constant
//! name to a small integer exactly once, cache it into a unit-local field,
//! and dispatch by index from then on. The tables behind those integers are
//! owned by the embedding runtime; this module only defines the interface
//! the generated init code talks to, plus an in-memory implementation for
//! tests and simple embeddings.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Live name-to-id tables of the embedding runtime.
///
/// Ids are allocated on first query and stable for the lifetime of the
/// registry. Each artifact queries each name exactly once, during init.
pub trait RuntimeRegistry: Send + Sync {
    fn function_id(&self, name: &str) -> u32;
    fn class_id(&self, name: &str) -> u32;
    fn constant_id(&self, name: &str) -> u32;

    fn function_count(&self) -> usize;
    fn class_count(&self) -> usize;
    fn constant_count(&self) -> usize;
}

/// HashMap-backed registry for tests and embeddings without a full runtime.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    functions: HashMap<String, u32>,
    classes: HashMap<String, u32>,
    constants: HashMap<String, u32>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn intern(table: &mut HashMap<String, u32>, kind: &str, name: &str) -> u32 {
    if let Some(&id) = table.get(name) {
        return id;
    }
    let id = table.len() as u32;
    debug!(kind, name, id, "allocated runtime id");
    table.insert(name.to_string(), id);
    id
}

impl RuntimeRegistry for InMemoryRegistry {
    fn function_id(&self, name: &str) -> u32 {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        intern(&mut tables.functions, "function", name)
    }

    fn class_id(&self, name: &str) -> u32 {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        intern(&mut tables.classes, "class", name)
    }

    fn constant_id(&self, name: &str) -> u32 {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        intern(&mut tables.constants, "constant", name)
    }

    fn function_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).functions.len()
    }

    fn class_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).classes.len()
    }

    fn constant_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).constants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        let registry = InMemoryRegistry::new();
        let a = registry.function_id("strlen");
        let b = registry.function_id("substr");
        assert_ne!(a, b);
        assert_eq!(registry.function_id("strlen"), a);
        assert_eq!(registry.function_count(), 2);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let registry = InMemoryRegistry::new();
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = registry.tables.lock().unwrap();
                panic!("poison the tables");
            })
            .join()
        });
        // A panic while the lock was held must not wedge the registry.
        assert_eq!(registry.function_id("strlen"), 0);
        assert_eq!(registry.function_count(), 1);
    }

    #[test]
    fn test_tables_are_independent() {
        let registry = InMemoryRegistry::new();
        let f = registry.function_id("date");
        let c = registry.class_id("date");
        // Same name, separate tables; both start from zero.
        assert_eq!(f, 0);
        assert_eq!(c, 0);
        assert_eq!(registry.constant_count(), 0);
    }
}
