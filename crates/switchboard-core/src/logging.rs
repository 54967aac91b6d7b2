//! Raw traffic logs.
//!
//! When a log directory is configured, the connection manager appends every
//! payload it receives to `{log_dir}/{session_id}.log`, one timestamped line
//! per event:
//!
//! ```text
//! [2026-02-04T10:15:30.123Z] OUTPUT: {"type":"assistant",...}
//! ```

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Utc;

/// Thread-safe handle to an append-only log file. `None` inside means
/// logging is off.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as ISO 8601 with milliseconds.
fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = utc_timestamp();
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
/// Failures leave logging off rather than erroring.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        let path = dir.join(format!("{}.log", log_id));
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("cannot create log dir {}: {e}", dir.display());
            return None;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| log::warn!("cannot open traffic log for {log_id}: {e}"))
            .ok()
    });
    Arc::new(Mutex::new(file))
}
