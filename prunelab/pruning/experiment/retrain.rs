use serde::{Deserialize, Serialize};

use crate::{
    config::Hyperparameters,
    dataloader::DataSplits,
    engine::Engine,
    error::LabError,
    network::{Loss, Network, Sgd},
};

/// Validation gain below which variable retraining stops.
pub const VARIABLE_RETRAIN_THRESHOLD: f64 = 0.0001;

/// Result of retraining one pruned model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrainOutcome {
    /// Test accuracy after retraining.
    pub final_accuracy: f64,
    /// Test accuracy gained relative to the freshly pruned model.
    pub retrain_change: f64,
    /// Epochs actually run.
    pub retrain_epochs: usize,
}

/// Retrains `model` for at least one and at most `num_retrain_epochs` epochs.
///
/// With `variable` set, stops as soon as an epoch improves validation
/// accuracy by less than [`VARIABLE_RETRAIN_THRESHOLD`].
pub fn retrain(
    engine: &mut dyn Engine,
    model: &mut Network,
    optimizer: &mut Sgd,
    splits: &DataSplits,
    loss: Loss,
    hyper: Hyperparameters,
    variable: bool,
) -> Result<RetrainOutcome, LabError> {
    let untrained_test_acc = engine.test(&splits.test, model)?;
    let mut prev_acc = engine.test(&splits.valid, model)?;
    let mut retrain_epoch = 1;
    loop {
        engine.train(&splits.train, model, optimizer, loss)?;
        let new_acc = engine.test(&splits.valid, model)?;
        let plateaued = variable && new_acc - prev_acc < VARIABLE_RETRAIN_THRESHOLD;
        if plateaued || retrain_epoch >= hyper.num_retrain_epochs {
            break;
        }
        retrain_epoch += 1;
        prev_acc = new_acc;
    }
    let final_accuracy = engine.test(&splits.test, model)?;
    Ok(RetrainOutcome {
        final_accuracy,
        retrain_change: final_accuracy - untrained_test_acc,
        retrain_epochs: retrain_epoch,
    })
}

/// Outcome for strategies that skip retraining: accuracy measured as is.
pub fn without_retraining(
    engine: &mut dyn Engine,
    model: &Network,
    splits: &DataSplits,
) -> Result<RetrainOutcome, LabError> {
    Ok(RetrainOutcome {
        final_accuracy: engine.test(&splits.test, model)?,
        retrain_change: 0.0,
        retrain_epochs: 0,
    })
}
