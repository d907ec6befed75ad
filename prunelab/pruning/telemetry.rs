use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

/// Builder configuring telemetry for pruning experiments.
pub struct LabTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    echo: bool,
}

impl LabTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            echo: false,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Mirrors records to stderr.
    #[must_use]
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<LabTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(
                JsonLogger::new(path)?
                    .with_min_level(self.min_level)
                    .with_echo(self.echo),
            ),
            None => None,
        };
        Ok(LabTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                run_id: format!("lab-{}", Uuid::new_v4()),
                logger,
            }),
        })
    }
}

/// Telemetry handle shared by the trainer and the pruning driver.
#[derive(Clone)]
pub struct LabTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LabTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabTelemetry")
            .field("module", &self.inner.module)
            .field("run_id", &self.inner.run_id)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    run_id: String,
    logger: Option<JsonLogger>,
}

impl LabTelemetry {
    /// Returns a builder for this telemetry helper.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LabTelemetryBuilder {
        LabTelemetryBuilder::new(module)
    }

    /// Identifier stamped on every record of this handle.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Logs a structured record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message)
                .with_run_id(&self.inner.run_id)
                .with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}

/// Logs through optional telemetry, swallowing sink failures.
pub fn log(telemetry: Option<&LabTelemetry>, level: LogLevel, message: &str, metadata: Value) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_tagged_records() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("lab.log");
        let telemetry = LabTelemetry::builder("prune")
            .log_path(&log_path)
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "checkpoint_saved", json!({ "weights": 512 }))
            .unwrap();
        log(Some(&telemetry), LogLevel::Debug, "prune_step", json!({}));
        let content = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("checkpoint_saved"));
        assert!(content.contains(telemetry.run_id()));
    }

    #[test]
    fn telemetry_without_path_is_silent() {
        let telemetry = LabTelemetry::builder("prune").build().unwrap();
        assert!(telemetry.log(LogLevel::Error, "ignored", json!({})).is_ok());
        assert!(format!("{telemetry:?}").contains("prune"));
    }
}
