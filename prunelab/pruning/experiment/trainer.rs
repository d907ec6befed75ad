use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::Hyperparameters,
    dataloader::DataSplits,
    engine::Engine,
    error::LabError,
    network::{Loss, Network, Sgd},
    telemetry::{self, LabTelemetry},
};

/// Validation gain below which an epoch counts as a plateau.
pub const PLATEAU_THRESHOLD: f64 = 0.001;
/// Learning rate at or below which a plateau ends training.
pub const MIN_LEARNING_RATE: f64 = 0.0001;
/// Factor applied to the learning rate on a plateau.
pub const LR_DECAY: f64 = 0.1;
/// Momentum of the base-training optimiser.
pub const BASE_MOMENTUM: f32 = 0.5;

/// Summary of a base-training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Epochs run.
    pub epochs: usize,
    /// Accuracy on the test split after training.
    pub test_accuracy: f64,
    /// Learning rate in use when training stopped.
    pub final_learning_rate: f64,
    /// True when training stopped on a plateau rather than the epoch cap.
    pub converged: bool,
}

/// Trains `model` from scratch with plateau-driven learning-rate decay.
pub fn train_until_plateau(
    engine: &mut dyn Engine,
    model: &mut Network,
    splits: &DataSplits,
    loss: Loss,
    hyper: Hyperparameters,
    telemetry: Option<&LabTelemetry>,
) -> Result<TrainingOutcome, LabError> {
    let mut lr = hyper.learning_rate;
    let mut optimizer = Sgd::new(lr as f32, BASE_MOMENTUM);
    let mut prev_acc = 0.0;
    let mut epoch = 0;
    let mut converged = false;

    while !converged && epoch < hyper.num_epochs {
        engine.train(&splits.train, model, &mut optimizer, loss)?;
        let new_acc = engine.test(&splits.valid, model)?;

        if new_acc - prev_acc < PLATEAU_THRESHOLD {
            if lr > MIN_LEARNING_RATE {
                lr *= LR_DECAY;
                optimizer = Sgd::new(lr as f32, BASE_MOMENTUM);
            } else {
                converged = true;
            }
        }
        telemetry::log(
            telemetry,
            LogLevel::Debug,
            "base_epoch",
            json!({ "epoch": epoch, "valid_acc": new_acc, "learning_rate": lr }),
        );

        epoch += 1;
        prev_acc = new_acc;
    }

    Ok(TrainingOutcome {
        epochs: epoch,
        test_accuracy: engine.test(&splits.test, model)?,
        final_learning_rate: lr,
        converged,
    })
}
