//! Registry of local functions exposed to the remote side.
//!
//! Entries are created when the codec packs a function value (or a caller
//! registers one explicitly) and live until deregistered or until the
//! channel closes. Remote invoke requests referencing a missing id are
//! silent no-ops: the remote side cannot distinguish "removed" from
//! "never invoked".

use std::collections::HashMap;
use std::sync::Mutex;

use crate::nonce;
use crate::value::Callback;

pub(crate) struct CallbackRegistry {
    locals: Mutex<HashMap<String, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            locals: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a handler under a fresh id and returns the id.
    pub fn register(&self, handler: Callback) -> String {
        let mut locals = self.locals.lock().unwrap();
        let id = nonce::allocate(&locals);
        locals.insert(id.clone(), handler);
        id
    }

    pub fn get(&self, id: &str) -> Option<Callback> {
        self.locals.lock().unwrap().get(id).cloned()
    }

    /// Removes a handler. Returns false when the id was not registered.
    pub fn remove(&self, id: &str) -> bool {
        self.locals.lock().unwrap().remove(id).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locals.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn noop() -> Callback {
        Arc::new(|_| Box::pin(async { Vec::new() }))
    }

    #[test]
    fn register_get_remove_cycle() {
        let registry = CallbackRegistry::new();
        let id = registry.register(noop());
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id));
        assert!(registry.get(&id).is_none());
        assert!(!registry.remove(&id));
    }

    #[test]
    fn registered_ids_are_distinct() {
        let registry = CallbackRegistry::new();
        let a = registry.register(noop());
        let b = registry.register(noop());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
