//! Named-channel subscription seam.
//!
//! Live engine traffic arrives on three channels per session
//! (`{prefix}-output:{id}`, `{prefix}-error:{id}`, `{prefix}-complete:{id}`).
//! Whatever delivers those events implements [`EventSource`]; the in-process
//! [`EventBus`](crate::event_bus::EventBus) is one such source.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Callback invoked with each payload published on a channel.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Something that can register handlers on named channels.
pub trait EventSource: Send + Sync {
    /// Register `handler` on `channel`. Events published after this call
    /// returns are delivered to it until the returned handle is released.
    fn subscribe(&self, channel: &str, handler: EventHandler) -> Subscription;
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle for one registered handler.
///
/// [`Subscription::unsubscribe`] may be called any number of times; the
/// underlying deregistration runs once. Dropping the handle does not
/// unsubscribe.
pub struct Subscription {
    channel: String,
    release: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns `true` if this call performed the deregistration.
    pub fn unsubscribe(&self) -> bool {
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match release {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}
