use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LabError;

/// One observation of the pruning-rate loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Repetition index.
    pub run: usize,
    /// Test accuracy after the step (and retraining, when enabled).
    pub accuracy: f64,
    /// Pruning rate in percent.
    pub pruning_perc: f64,
    /// Live weights after the step.
    pub number_of_weights: usize,
    /// Strategy name.
    pub pruning_method: String,
    /// Wall-clock seconds spent on the step.
    pub time: f64,
    /// Test accuracy gained by retraining.
    pub retrain_change: f64,
    /// Retraining epochs performed.
    pub retrain_epochs: usize,
}

/// Test accuracy after one epoch of training a pruned model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch index; `-1` is the accuracy before training.
    pub epoch: i64,
    /// Test accuracy.
    pub test_acc: f64,
}

/// Insertion-ordered rows collected in memory and written in bulk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable<R> {
    created_at: DateTime<Utc>,
    rows: Vec<R>,
}

impl<R> Default for MetricsTable<R> {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            rows: Vec::new(),
        }
    }
}

impl<R> MetricsTable<R> {
    /// Empty table stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push(&mut self, row: R) {
        self.rows.push(row);
    }

    /// Rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no row was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Aggregate of all rows recorded at one pruning rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    /// Rows at this rate.
    pub steps: usize,
    /// Distinct runs at this rate.
    pub runs: usize,
    /// Best accuracy seen.
    pub best_accuracy: f64,
    /// Smallest weight count seen.
    pub min_weights: usize,
    /// Mean retraining epochs per step.
    pub mean_retrain_epochs: f64,
}

impl MetricsTable<ExperimentRecord> {
    /// Per-rate aggregates, keyed by the rate's display form in first-seen order.
    #[must_use]
    pub fn summary_by_rate(&self) -> IndexMap<String, RateSummary> {
        let mut grouped: IndexMap<String, Vec<&ExperimentRecord>> = IndexMap::new();
        for row in &self.rows {
            grouped
                .entry(row.pruning_perc.to_string())
                .or_default()
                .push(row);
        }
        grouped
            .into_iter()
            .map(|(rate, rows)| {
                let mut runs: Vec<usize> = rows.iter().map(|row| row.run).collect();
                runs.dedup();
                let summary = RateSummary {
                    steps: rows.len(),
                    runs: runs.len(),
                    best_accuracy: rows
                        .iter()
                        .map(|row| row.accuracy)
                        .fold(f64::NEG_INFINITY, f64::max),
                    min_weights: rows
                        .iter()
                        .map(|row| row.number_of_weights)
                        .min()
                        .unwrap_or_default(),
                    mean_retrain_epochs: rows.iter().map(|row| row.retrain_epochs as f64).sum::<f64>()
                        / rows.len() as f64,
                };
                (rate, summary)
            })
            .collect()
    }
}

/// Destination of whole metric tables.
pub trait MetricsSink {
    /// Writes `table` to `path`, overwriting any earlier version.
    fn write(&self, table: &Value, path: &Path) -> Result<(), LabError>;
}

/// Serialises a table and hands it to `sink`.
pub fn flush<R: Serialize>(
    sink: &dyn MetricsSink,
    table: &MetricsTable<R>,
    path: &Path,
) -> Result<(), LabError> {
    sink.write(&serde_json::to_value(table)?, path)
}

/// Writes tables as pretty JSON files, replacing them atomically.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetricsSink;

impl MetricsSink for JsonMetricsSink {
    fn write(&self, table: &Value, path: &Path) -> Result<(), LabError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

/// Records every write for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    writes: Mutex<Vec<(PathBuf, Value)>>,
}

impl MemoryMetricsSink {
    /// All writes, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<(PathBuf, Value)> {
        self.writes.lock().clone()
    }

    /// Row count of each write, oldest first.
    #[must_use]
    pub fn row_counts(&self) -> Vec<usize> {
        self.writes
            .lock()
            .iter()
            .map(|(_, table)| table["rows"].as_array().map_or(0, Vec::len))
            .collect()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn write(&self, table: &Value, path: &Path) -> Result<(), LabError> {
        self.writes.lock().push((path.to_path_buf(), table.clone()));
        Ok(())
    }
}
