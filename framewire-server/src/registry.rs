//! Message handler registry.
//!
//! Maps message ids to ordered lists of handler callbacks. Registration
//! order is invocation order; a handler that panics is contained at the
//! dispatch boundary so the remaining handlers and the reactor keep running.

use crate::connection::ConnectionHandle;
use framewire_protocol::MessageCodec;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A registered message handler. Receives the sender capability for the
/// originating connection and the decoded message.
pub type Handler<C> =
    Arc<dyn Fn(&ConnectionHandle<C>, &<C as MessageCodec>::Message) + Send + Sync>;

/// Ordered multicast registry: message id to handler list.
pub struct HandlerRegistry<C: MessageCodec> {
    handlers: RwLock<HashMap<u16, Vec<Handler<C>>>>,
}

impl<C: MessageCodec> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Appends a handler to the id's list. Registering the same handler
    /// (same `Arc`) twice is a no-op.
    pub fn register(&self, message_id: u16, handler: Handler<C>) {
        let mut map = self.handlers.write();
        let list = map.entry(message_id).or_default();
        if list.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return;
        }
        list.push(handler);
    }

    /// Removes a handler from the id's list. Removing a handler that was
    /// never registered is a no-op.
    pub fn unregister(&self, message_id: u16, handler: &Handler<C>) {
        let mut map = self.handlers.write();
        if let Some(list) = map.get_mut(&message_id) {
            list.retain(|existing| !Arc::ptr_eq(existing, handler));
            if list.is_empty() {
                map.remove(&message_id);
            }
        }
    }

    /// Returns the number of handlers registered for an id.
    pub fn handler_count(&self, message_id: u16) -> usize {
        self.handlers
            .read()
            .get(&message_id)
            .map_or(0, |list| list.len())
    }

    /// Invokes every handler registered for the id, in registration order.
    /// A panicking handler is logged and the remaining handlers still run.
    pub fn dispatch(
        &self,
        handle: &ConnectionHandle<C>,
        message_id: u16,
        message: &C::Message,
    ) {
        // Snapshot outside the lock so handlers can register/unregister.
        let handlers: Vec<Handler<C>> = match self.handlers.read().get(&message_id) {
            Some(list) => list.clone(),
            None => return,
        };

        for handler in handlers {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler(handle, message)));
            if result.is_err() {
                tracing::error!(
                    "[{}] handler for message id {} panicked, continuing",
                    handle.peer_addr(),
                    message_id
                );
            }
        }
    }
}

impl<C: MessageCodec> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
