//! Transcript backend over a directory of files.
//!
//! Layout under `root`:
//!
//! - `{session_id}.jsonl`: one raw record per line (Claude, Codex rollouts)
//! - `{session_id}.json`: a JSON array of records, or an object with a
//!   `messages` array (Gemini saved chats)
//! - `active.json`: array of [`SessionDescriptor`] for running sessions

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{BackendError, BackendFuture, SessionBackend};
use crate::session::{SessionDescriptor, SessionRef};

const ACTIVE_SESSIONS_FILE: &str = "active.json";

#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a session's records synchronously.
    pub fn read_records(&self, session_id: &str) -> Result<Vec<Value>, BackendError> {
        let jsonl_path = self.root.join(format!("{session_id}.jsonl"));
        if jsonl_path.exists() {
            return read_jsonl(&jsonl_path);
        }

        let json_path = self.root.join(format!("{session_id}.json"));
        if json_path.exists() {
            return read_json(&json_path);
        }

        Err(BackendError::new(format!(
            "Session file not found: {session_id}"
        )))
    }

    pub fn read_active(&self) -> Result<Vec<SessionDescriptor>, BackendError> {
        let path = self.root.join(ACTIVE_SESSIONS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<Value>, BackendError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("{}:{}: skipping unreadable line: {e}", path.display(), index + 1),
        }
    }

    Ok(records)
}

fn read_json(path: &Path) -> Result<Vec<Value>, BackendError> {
    let contents = fs::read_to_string(path)?;
    match serde_json::from_str(&contents)? {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => match obj.remove("messages") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(BackendError::new(format!(
                "{}: expected a `messages` array",
                path.display()
            ))),
        },
        _ => Err(BackendError::new(format!(
            "{}: expected an array of records",
            path.display()
        ))),
    }
}

impl SessionBackend for FileBackend {
    fn fetch_raw_history<'a>(&'a self, session: &'a SessionRef) -> BackendFuture<'a, Vec<Value>> {
        Box::pin(async move { self.read_records(&session.session_id) })
    }

    fn list_active_sessions(&self) -> BackendFuture<'_, Vec<SessionDescriptor>> {
        Box::pin(async move { self.read_active() })
    }
}
