//! Handler registry for dispatching updates by address path.
//!
//! # Example
//!
//! ```
//! use cps_client::control::{ControlUpdate, TakeChanged};
//! use cps_client::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("/takes/added", |update: ControlUpdate| {
//!     println!("new take: {:?}", update);
//! });
//!
//! let delivered = registry.dispatch(ControlUpdate::TakeAdded(TakeChanged { name: "t".into() }));
//! assert!(delivered);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::control::ControlUpdate;

/// Callback invoked for updates on one address path.
///
/// Runs on the messenger's receive task, so it must not block.
pub trait UpdateHandler: Send + Sync + 'static {
    fn call(&self, update: ControlUpdate);
}

impl<F> UpdateHandler for F
where
    F: Fn(ControlUpdate) + Send + Sync + 'static,
{
    fn call(&self, update: ControlUpdate) {
        self(update)
    }
}

/// Callback invoked once when the messenger loses its connection.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Registry mapping address paths to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn UpdateHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `address_path`.
    pub fn register<H: UpdateHandler>(&mut self, address_path: impl Into<String>, handler: H) {
        self.handlers.insert(address_path.into(), Arc::new(handler));
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&mut self, address_path: &str) -> bool {
        self.handlers.remove(address_path).is_some()
    }

    pub fn get(&self, address_path: &str) -> Option<Arc<dyn UpdateHandler>> {
        self.handlers.get(address_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler registered for the update's path.
    ///
    /// Returns false when no handler is registered.
    pub fn dispatch(&self, update: ControlUpdate) -> bool {
        match self.get(update.address_path()) {
            Some(handler) => {
                handler.call(update);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{RecordingStatus, TakeChanged};
    use std::sync::Mutex;

    #[test]
    fn test_register_and_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut registry = HandlerRegistry::new();
        registry.register("/takes/added", move |update: ControlUpdate| {
            sink.lock().unwrap().push(update);
        });

        let update = ControlUpdate::TakeAdded(TakeChanged { name: "t1".into() });
        assert!(registry.dispatch(update.clone()));
        assert_eq!(*seen.lock().unwrap(), vec![update]);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let registry = HandlerRegistry::new();
        let update = ControlUpdate::RecordingStatus(RecordingStatus { is_recording: true });
        assert!(!registry.dispatch(update));
    }

    #[test]
    fn test_unregister() {
        let mut registry = HandlerRegistry::new();
        registry.register("/battery", |_: ControlUpdate| {});
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("/battery"));
        assert!(!registry.unregister("/battery"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let hits = Arc::new(Mutex::new((0, 0)));
        let (a, b) = (hits.clone(), hits.clone());

        let mut registry = HandlerRegistry::new();
        registry.register("/session/stopped", move |_: ControlUpdate| a.lock().unwrap().0 += 1);
        registry.register("/session/stopped", move |_: ControlUpdate| b.lock().unwrap().1 += 1);

        registry.dispatch(ControlUpdate::SessionStopped);
        assert_eq!(*hits.lock().unwrap(), (0, 1));
    }
}
