//! Activation Event Channel
//!
//! Subscribers are plain callbacks held in registration order. `send` calls
//! them synchronously on the activating thread; the first failing subscriber
//! stops dispatch and its error reaches the caller of `activate`/`deactivate`.

use crate::error::{Result, TenancyError};
use crate::schema::Schema;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Notification that `schema` became the active schema.
#[derive(Debug, Clone)]
pub struct ActivationEvent {
    /// Always the type name of [`Schema`].
    pub sender: &'static str,
    pub schema: Schema,
}

impl ActivationEvent {
    pub fn new(schema: Schema) -> Self {
        Self {
            sender: std::any::type_name::<Schema>(),
            schema,
        }
    }
}

/// Handle returned by [`ActivationChannel::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&ActivationEvent) -> anyhow::Result<()> + Send + Sync>;

pub struct ActivationChannel {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl ActivationChannel {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber. It runs after every subscriber registered before it.
    pub fn connect<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ActivationEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver an activation of `schema` to every subscriber, in order.
    pub fn send(&self, schema: &Schema) -> Result<()> {
        // Snapshot so handlers may connect/disconnect while being dispatched.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let event = ActivationEvent::new(schema.clone());
        for handler in handlers {
            handler(&event).map_err(|e| TenancyError::Subscriber {
                schema: schema.schema_name().to_string(),
                cause: format!("{:#}", e),
            })?;
        }

        Ok(())
    }
}

impl Default for ActivationChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide channel fired by `activate`/`deactivate`.
pub fn schema_activate() -> &'static ActivationChannel {
    static CHANNEL: OnceLock<ActivationChannel> = OnceLock::new();
    CHANNEL.get_or_init(ActivationChannel::new)
}
