use crate::errors::RestoreError;
use crate::types::{LogLevel, Verbosity};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts: u64,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RestoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RestoreError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts: event.ts,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RestoreError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RestoreError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RestoreError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| RestoreError::Io(e.to_string()))
    }
}

struct RunLog {
    logger: JsonlLogger,
    verbosity: Verbosity,
}

static RUN_LOG: Mutex<Option<RunLog>> = Mutex::new(None);

/// Routes every `append_run_log` call of this process to `path`.
pub fn init_run_log(path: impl AsRef<Path>, verbosity: Verbosity) {
    if let Ok(mut guard) = RUN_LOG.lock() {
        *guard = Some(RunLog {
            logger: JsonlLogger::new(path),
            verbosity,
        });
    }
}

pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Ok(guard) = RUN_LOG.lock() else {
        return;
    };
    let Some(run_log) = guard.as_ref() else {
        return;
    };
    let parsed = parse_level(level);

    if parsed >= LogLevel::console_threshold(run_log.verbosity) {
        eprintln!("{}", console_line(parsed, event_type, &payload));
    }
    if parsed >= LogLevel::file_threshold(run_log.verbosity) {
        let event = LogEvent {
            ts: unix_now(),
            level: parsed.as_str(),
            event_type,
            payload,
        };
        // The log file must never take a save or restore run down with it.
        if let Err(error) = run_log.logger.append(&event) {
            eprintln!("i3-restore: failed to write log: {error}");
        }
    }
}

pub fn console_line(level: LogLevel, event_type: &str, payload: &Value) -> String {
    let rendered = match payload {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => format!(" {other}"),
    };
    match level {
        LogLevel::Debug => format!("+ {event_type}{rendered}"),
        _ => format!("{}: {event_type}{rendered}", level.as_str()),
    }
}

fn parse_level(level: &str) -> LogLevel {
    match level {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{console_line, truncate_json, JsonlLogger, LogEvent};
    use crate::types::LogLevel;
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("i3-restore.log");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                ts: 1,
                level: "info",
                event_type: "save.workspace.written",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"save.workspace.written\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = truncate_json(json!("ééééééééééé"), 8);
        assert!(value.as_str().expect("string").ends_with("..."));
    }

    #[test]
    fn console_lines_prefix_debug_with_plus() {
        assert_eq!(
            console_line(LogLevel::Debug, "resolver.terminal", &json!({})),
            "+ resolver.terminal"
        );
        assert_eq!(
            console_line(LogLevel::Error, "save.failed", &json!({"error": "x"})),
            "error: save.failed {\"error\":\"x\"}"
        );
    }
}
