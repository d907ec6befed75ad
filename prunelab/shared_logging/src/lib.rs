#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the pruning lab crates.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity level, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Per-step detail (one line per pruning step).
    Debug,
    /// Phase boundaries and saved artifacts.
    #[default]
    Info,
    /// Recoverable oddities.
    Warn,
    /// Failures that abort an experiment.
    Error,
}

impl LogLevel {
    /// Upper-case label used in the echoed console form.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Module emitting the log.
    pub module: String,
    /// Identifier of the lab invocation that produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Severity.
    pub level: LogLevel,
    /// Event name or short message.
    pub message: String,
    /// Arbitrary JSON payload for metrics/fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            run_id: None,
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Tags the record with a run identifier.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Copies the fields of a JSON object into the metadata map.
    ///
    /// Non-object values are stored under a single `value` key.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("value".into(), other);
            }
        }
        self
    }

    /// Single-line human readable rendering.
    #[must_use]
    pub fn render(&self) -> String {
        let fields = if self.metadata.is_empty() {
            String::new()
        } else {
            format!(" {}", Value::Object(self.metadata.clone()))
        };
        format!(
            "{} {:<5} [{}] {}{}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level.label(),
            self.module,
            self.message,
            fields
        )
    }
}

/// JSON-lines logger with append-only semantics and a severity floor.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    min_level: LogLevel,
    echo: bool,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            min_level: LogLevel::Debug,
            echo: false,
            writer: Mutex::new(file),
        })
    }

    /// Drops records below `level`.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Mirrors every written record to stderr.
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Returns whether a record at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Writes a log record as JSON line.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        if self.echo {
            eprintln!("{}", record.render());
        }
        Ok(())
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("lab.log")).unwrap();
        logger
            .log(&LogRecord::new("prune", LogLevel::Info, "rate_flushed"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"rate_flushed\""));
        assert!(content.contains("\"level\":\"INFO\""));
    }

    #[test]
    fn filters_records_below_min_level() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("lab.log"))
            .unwrap()
            .with_min_level(LogLevel::Info);
        logger
            .log(&LogRecord::new("prune", LogLevel::Debug, "step"))
            .unwrap();
        logger
            .log(&LogRecord::new("prune", LogLevel::Warn, "odd"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("odd"));
    }

    #[test]
    fn metadata_and_run_id_are_serialized() {
        let record = LogRecord::new("trainer", LogLevel::Info, "epoch")
            .with_run_id("run-1")
            .with_metadata(json!({ "epoch": 3, "accuracy": 91.5 }));
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"run_id\":\"run-1\""));
        assert!(line.contains("\"epoch\":3"));
        assert!(record.render().contains("[trainer] epoch"));
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
