//! Collaborators the streaming core reads from.
//!
//! The core never talks to an engine directly. It asks a [`SessionBackend`]
//! for transcripts and running sessions, and listens on an
//! [`EventSource`](crate::transport::EventSource) for live traffic.

pub mod file;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionDescriptor, SessionRef};

pub use file::FileBackend;

/// Failure reported by a backend.
///
/// Backends do not classify their errors; "not found" is recognized from
/// the message text by the history loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("IO error: {e}"))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("JSON error: {e}"))
    }
}

pub type BackendFuture<'a, T> = BoxFuture<'a, Result<T, BackendError>>;

/// Source of transcripts and running-session lists.
pub trait SessionBackend: Send + Sync {
    /// Raw, engine-native records of a session, in transcript order.
    fn fetch_raw_history<'a>(&'a self, session: &'a SessionRef) -> BackendFuture<'a, Vec<Value>>;

    /// Sessions currently running. Only consulted for engines that support
    /// live discovery.
    fn list_active_sessions(&self) -> BackendFuture<'_, Vec<SessionDescriptor>>;
}
