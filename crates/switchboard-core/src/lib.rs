//! # switchboard-core
//!
//! Session streaming and reconnection for multi-engine agent sessions.
//!
//! This crate is framework-agnostic and can be used by:
//! - the `switchboard` CLI (history dumps, feed replays)
//! - a desktop shell or daemon that owns the engine processes
//!
//! ## Key Concepts
//!
//! - **Engine**: Claude, Codex or Gemini, each with its own event and
//!   transcript formats
//! - **CanonicalMessage**: the engine-agnostic message every consumer reads
//! - **Live connection**: the output/error/complete channel subscriptions
//!   bound to one session id
//! - **Loading token**: the latest load wins; older results are dropped

pub mod backend;
pub mod config;
pub mod connection;
pub mod engines;
pub mod event_bus;
pub mod history;
pub mod logging;
pub mod message;
pub mod orchestrator;
pub mod queue;
pub mod session;
pub mod transport;
pub mod usage;

// Re-export commonly used types
pub use backend::{BackendError, FileBackend, SessionBackend};
pub use config::OrchestratorConfig;
pub use connection::{ConnectionManager, ConnectionPhase, ConnectionUpdate, MessageProcessor};
pub use engines::{ConverterRegistry, Engine};
pub use event_bus::EventBus;
pub use history::{History, HistoryLoader, LoadError};
pub use message::{CanonicalMessage, ContentBlock, MessageType};
pub use orchestrator::{LoadOutcome, StreamOrchestrator, StreamState};
pub use queue::MessageQueue;
pub use session::{SessionDescriptor, SessionRef};
pub use usage::{RateLimitSummary, Usage};
