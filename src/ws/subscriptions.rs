//! Type-keyed subscriber table and isolated dispatch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::MessageType;

/// Error type handlers may return; it is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a single handler invocation.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A subscriber callback. Identity is the `Arc` allocation: subscribing
/// the same `Handler` twice is a no-op, and unsubscribing needs a clone of it.
pub type Handler = Arc<dyn Fn(&Value) -> HandlerResult + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure taking a typed payload. A `data` that does not decode as
/// `T` is reported as a handler error.
pub fn typed_handler<T, F>(f: F) -> Handler
where
    T: DeserializeOwned,
    F: Fn(T) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(move |data: &Value| {
        let payload = T::deserialize(data)?;
        f(payload)
    })
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// `type → handlers` mapping owned by the channel driver.
#[derive(Default)]
pub struct SubscriptionTable {
    handlers: HashMap<MessageType, Vec<Handler>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Returns `false` if it was already registered.
    pub fn subscribe(&mut self, kind: MessageType, handler: Handler) -> bool {
        let set = self.handlers.entry(kind).or_default();
        if set.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        set.push(handler);
        true
    }

    /// Deregister `handler` for `kind`. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, kind: &MessageType, handler: &Handler) -> bool {
        let Some(set) = self.handlers.get_mut(kind) else {
            return false;
        };
        let before = set.len();
        set.retain(|h| !same_handler(h, handler));
        let removed = set.len() != before;
        if set.is_empty() {
            self.handlers.remove(kind);
        }
        removed
    }

    pub fn handler_count(&self, kind: &MessageType) -> usize {
        self.handlers.get(kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Invoke every handler registered for `kind` with `data`.
    ///
    /// A handler that returns an error or panics is logged; the remaining
    /// handlers still run. Returns the number of handlers that completed
    /// successfully.
    pub fn dispatch(&self, kind: &MessageType, data: &Value) -> usize {
        let Some(set) = self.handlers.get(kind) else {
            tracing::trace!(%kind, "No subscribers for message type");
            return 0;
        };

        let mut delivered = 0;
        for handler in set {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(%kind, error = %e, "Subscriber returned an error");
                }
                Err(_) => {
                    tracing::error!(%kind, "Subscriber panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&MessageType, usize> =
            self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("SubscriptionTable")
            .field("handlers", &counts)
            .finish()
    }
}
