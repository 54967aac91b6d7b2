//! Session history loading.
//!
//! Fetches a past transcript through the [`SessionBackend`] and turns it into
//! canonical messages:
//!
//! 1. Records go through a fresh converter for the engine, the same
//!    conversion live traffic gets. The converter's final rate-limit summary
//!    is returned alongside the messages.
//! 2. Records of unknown type are dropped. Each distinct dropped type is
//!    logged once per load.
//! 3. Usage buried in engine metadata is hoisted into `usage`.
//! 4. Slash-command bookkeeping is reclassified (see [`reclassify`]).
//!
//! A backend error that reads like "not found" is reported as
//! [`LoadError::NotFound`]: a brand-new session has no transcript yet.

pub mod reclassify;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backend::SessionBackend;
use crate::engines::{fresh_converter, Engine};
use crate::message::CanonicalMessage;
use crate::session::SessionRef;
use crate::usage::{self, RateLimitSummary};

pub use reclassify::reclassify;

/// Substrings that mark a backend error as "no such session".
pub const DEFAULT_NOT_FOUND_MARKERS: [&str; 4] =
    ["not found", "no such file", "does not exist", "cannot find"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("session not found")]
    NotFound,

    #[error("failed to load session: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub not_found_markers: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            not_found_markers: DEFAULT_NOT_FOUND_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Case-insensitive check of an error message against the markers.
pub fn is_not_found(message: &str, markers: &[String]) -> bool {
    let lowered = message.to_lowercase();
    markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// A normalized transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub messages: Vec<CanonicalMessage>,
    /// Rolling rate limits seen while converting, for engines that report them.
    pub rate_limits: Option<RateLimitSummary>,
}

pub struct HistoryLoader {
    backend: Arc<dyn SessionBackend>,
    config: LoaderConfig,
}

impl HistoryLoader {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self::with_config(backend, LoaderConfig::default())
    }

    pub fn with_config(backend: Arc<dyn SessionBackend>, config: LoaderConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load and normalize the full transcript of `session`.
    pub async fn load(&self, session: &SessionRef) -> Result<History, LoadError> {
        let records = match self.backend.fetch_raw_history(session).await {
            Ok(records) => records,
            Err(e) if is_not_found(&e.message, &self.config.not_found_markers) => {
                log::info!("[{session}] no transcript yet: {e}");
                return Err(LoadError::NotFound);
            }
            Err(e) => {
                log::warn!("[{session}] history fetch failed: {e}");
                return Err(LoadError::Failed(e.message));
            }
        };

        let history = normalize_records(session.engine, records);
        log::debug!("[{session}] loaded {} messages", history.messages.len());
        Ok(history)
    }
}

/// Turn raw engine records into canonical messages, preserving order.
pub fn normalize_records(engine: Engine, records: Vec<Value>) -> History {
    let mut dropped = DroppedTypes::new(engine);
    let mut converter = fresh_converter(engine);
    let mut messages = Vec::with_capacity(records.len());

    for record in &records {
        match converter.convert_value(record) {
            Some(mut msg) => {
                usage::normalize_message(&mut msg);
                messages.push(reclassify(msg));
            }
            None => dropped.note(record_type(record)),
        }
    }

    History {
        messages,
        rate_limits: converter.rate_limits().cloned(),
    }
}

fn record_type(record: &Value) -> &str {
    record
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<untyped>")
}

/// Logs each skipped record type the first time it is seen.
struct DroppedTypes {
    engine: Engine,
    seen: HashSet<String>,
}

impl DroppedTypes {
    fn new(engine: Engine) -> Self {
        Self {
            engine,
            seen: HashSet::new(),
        }
    }

    fn note(&mut self, kind: &str) {
        if self.seen.insert(kind.to_string()) {
            log::debug!("[{}] dropping history records of type {kind}", self.engine);
        }
    }
}
