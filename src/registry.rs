//! Handler registry built once at startup and immutable thereafter.

use std::collections::HashSet;
use std::sync::Arc;

use crate::handler::Handler;
use crate::{Result, UplinkError};

/// The set of registered handlers, keyed by unique id.
///
/// Construction validates uniqueness eagerly — a duplicate id is a
/// programming error caught before `start()` is ever called. Iteration is
/// always in registration order so the peer sees stable re-registration
/// sequencing across reconnects.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Build a registry from the application's handler list.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::DuplicateHandler` when two handlers share an
    /// id; no handlers are registered in that case.
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for handler in &handlers {
            if !seen.insert(handler.id().to_owned()) {
                return Err(UplinkError::DuplicateHandler(format!(
                    "handler id '{}' registered twice",
                    handler.id()
                )));
            }
        }

        Ok(Self {
            handlers: Arc::new(handlers),
        })
    }

    /// Look up a handler by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.id() == id)
    }

    /// Iterate handlers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
