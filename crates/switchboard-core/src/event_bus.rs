//! In-process event channels.
//!
//! The EventBus carries live engine traffic from whatever reads the engine
//! process (a daemon, a test, the replay CLI) to the connection manager.
//! Handlers are registered per channel through [`EventSource::subscribe`]
//! and called synchronously from [`EventBus::emit`] in registration order.
//!
//! # Example
//!
//! ```rust
//! use switchboard_core::event_bus::EventBus;
//! use switchboard_core::transport::EventSource;
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe("claude-output:abc123", Arc::new(|payload| {
//!     println!("got {payload}");
//! }));
//!
//! bus.emit("claude-output:abc123", &serde_json::json!({"type": "assistant"}));
//! sub.unsubscribe();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;

use crate::transport::{EventHandler, EventSource, Subscription};

type ListenerMap = HashMap<String, Vec<(u64, EventHandler)>>;

pub struct EventBus {
    listeners: Arc<Mutex<ListenerMap>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish an event on `channel`.
    ///
    /// Channel handlers run before this returns, outside the listener lock,
    /// so a handler may subscribe or unsubscribe. Returns the number of
    /// channel handlers that were called.
    pub fn emit<T: Serialize>(&self, channel: &str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize event payload: {}", e);
                return 0;
            }
        };

        let handlers: Vec<EventHandler> = match self.listeners.lock() {
            Ok(map) => map
                .get(channel)
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        for handler in &handlers {
            handler(&payload);
        }
        handlers.len()
    }

    /// Number of handlers registered on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .lock()
            .map(|map| map.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Number of handlers across all channels.
    pub fn total_listeners(&self) -> usize {
        self.listeners
            .lock()
            .map(|map| map.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for EventBus {
    fn subscribe(&self, channel: &str, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.listeners.lock() {
            map.entry(channel.to_string()).or_default().push((id, handler));
        }

        let listeners: Weak<Mutex<ListenerMap>> = Arc::downgrade(&self.listeners);
        let key = channel.to_string();
        Subscription::new(channel, move || {
            let Some(listeners) = listeners.upgrade() else {
                return;
            };
            if let Ok(mut map) = listeners.lock() {
                if let Some(handlers) = map.get_mut(&key) {
                    handlers.retain(|(hid, _)| *hid != id);
                    if handlers.is_empty() {
                        map.remove(&key);
                    }
                }
            };
        })
    }
}
