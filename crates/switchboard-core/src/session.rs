//! Session references handed in by the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engines::Engine;

/// Identifies a session to load or attach to.
///
/// Owned by the caller; the streaming core only reads it to route requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: String,
    pub project_path: String,
    pub project_id: String,
    pub engine: Engine,
}

impl SessionRef {
    pub fn new(
        session_id: impl Into<String>,
        project_path: impl Into<String>,
        project_id: impl Into<String>,
        engine: Engine,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_path: project_path.into(),
            project_id: project_id.into(),
            engine,
        }
    }
}

impl std::fmt::Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.engine, self.session_id)
    }
}

/// A running session as reported by a backend that supports discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionDescriptor {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            project_path: None,
            started_at: None,
        }
    }
}
