use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::LabError;

/// Training hyperparameters shared by base training and retraining.
///
/// Values are copied into every loop invocation; experiments derive
/// variants with struct-update syntax rather than mutating a shared record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    /// Upper bound on retraining epochs after each pruning step.
    pub num_retrain_epochs: usize,
    /// Upper bound on base-training epochs.
    pub num_epochs: usize,
    /// Initial learning rate.
    pub learning_rate: f64,
    /// Momentum used by the retraining optimiser.
    pub momentum: f32,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            num_retrain_epochs: 2,
            num_epochs: 200,
            learning_rate: 0.01,
            momentum: 0.0,
        }
    }
}

impl Hyperparameters {
    /// Returns a copy with a different retraining budget.
    #[must_use]
    pub const fn with_retrain_epochs(self, num_retrain_epochs: usize) -> Self {
        Self {
            num_retrain_epochs,
            ..self
        }
    }
}

/// Parameters of the synthetic classification dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Feature dimension of every sample.
    pub input_dim: usize,
    /// Number of classes.
    pub classes: usize,
    /// Training samples.
    pub train_samples: usize,
    /// Validation samples.
    pub valid_samples: usize,
    /// Test samples.
    pub test_samples: usize,
    /// Mini-batch size of the training split.
    pub batch_size: usize,
    /// Standard deviation of the per-sample noise around each class prototype.
    pub noise: f32,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            input_dim: 64,
            classes: 10,
            train_samples: 2_000,
            valid_samples: 500,
            test_samples: 500,
            batch_size: 32,
            noise: 0.9,
        }
    }
}

/// Top-level lab configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabConfig {
    /// Root directory holding `model/` and `result/`.
    pub output_root: PathBuf,
    /// Base hyperparameters.
    pub hyperparameters: Hyperparameters,
    /// Layer widths, input first and classes last.
    pub architecture: Vec<usize>,
    /// Synthetic dataset parameters.
    pub dataset: DatasetConfig,
    /// Seed for dataset generation, weight initialisation and random pruning.
    pub seed: u64,
    /// JSON-lines log file; relative paths resolve against `output_root`.
    pub log_file: PathBuf,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./out"),
            hyperparameters: Hyperparameters::default(),
            architecture: vec![64, 32, 10],
            dataset: DatasetConfig::default(),
            seed: 7,
            log_file: PathBuf::from("lab.log.jsonl"),
        }
    }
}

impl LabConfig {
    /// Loads a configuration file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {path:?}"))?;
        let config: Self =
            serde_json::from_str(&contents).with_context(|| format!("parsing config {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the architecture matches the dataset.
    pub fn validate(&self) -> Result<(), LabError> {
        let arch = &self.architecture;
        if arch.len() < 2 || arch.iter().any(|width| *width == 0) {
            return Err(LabError::InvalidArchitecture(arch.clone()));
        }
        if arch[0] != self.dataset.input_dim {
            return Err(LabError::ShapeMismatch {
                expected: self.dataset.input_dim,
                found: arch[0],
            });
        }
        if arch[arch.len() - 1] != self.dataset.classes {
            return Err(LabError::ShapeMismatch {
                expected: self.dataset.classes,
                found: arch[arch.len() - 1],
            });
        }
        Ok(())
    }

    /// Resolved log file location.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        if self.log_file.is_absolute() {
            self.log_file.clone()
        } else {
            self.output_root.join(&self.log_file)
        }
    }
}
