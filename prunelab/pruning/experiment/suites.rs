use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{PruneRequest, PruneSummary, PruningLab};
use crate::{config::Hyperparameters, strategy::PruneMethod};

/// Strategies compared across independently trained base models.
pub const MAGNITUDE_SUITE: [PruneMethod; 4] = [
    PruneMethod::RandomPruning,
    PruneMethod::MagnitudeClassDistributed,
    PruneMethod::MagnitudeClassUniform,
    PruneMethod::MagnitudeClassBlinded,
];

/// Retraining budget of the variable arm of experiment 2.
pub const VARIABLE_RETRAIN_EPOCHS: usize = 10;
/// Retraining budget of the fixed arm of experiment 2.
pub const FIXED_RETRAIN_EPOCHS: usize = 2;

/// Repetition counts of the named suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Base models `model0` .. visited by experiment 1.
    pub models: usize,
    /// Runs per rate.
    pub runs: usize,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self { models: 4, runs: 25 }
    }
}

/// Every magnitude strategy on every base model at the default rates,
/// followed by optimal brain damage on `model0`. Checkpoints are kept for
/// `model0` only.
pub fn experiment1(
    lab: &mut PruningLab,
    suite: SuiteConfig,
    hyper: Hyperparameters,
) -> Result<Vec<PruneSummary>> {
    let mut summaries = Vec::new();
    for idx in 0..suite.models {
        for method in MAGNITUDE_SUITE {
            let request = PruneRequest {
                filename: format!("model{idx}"),
                runs: suite.runs,
                save: idx == 0,
                ..PruneRequest::new(method)
            };
            summaries.push(lab.prune_network(&request, hyper)?);
        }
    }
    let request = PruneRequest {
        filename: "model0".into(),
        runs: suite.runs,
        save: true,
        ..PruneRequest::new(PruneMethod::OptimalBrainDamage)
    };
    summaries.push(lab.prune_network(&request, hyper)?);
    Ok(summaries)
}

/// Variable against fixed retraining for every strategy at a 50% rate.
pub fn experiment2(
    lab: &mut PruningLab,
    suite: SuiteConfig,
    hyper: Hyperparameters,
) -> Result<Vec<PruneSummary>> {
    let mut summaries = Vec::new();
    for method in PruneMethod::ALL {
        for (variable, epochs) in [
            (true, VARIABLE_RETRAIN_EPOCHS),
            (false, FIXED_RETRAIN_EPOCHS),
        ] {
            let request = PruneRequest {
                pruning_rates: vec![50.0],
                runs: suite.runs,
                variable_retraining: variable,
                save: true,
                ..PruneRequest::new(method)
            };
            summaries.push(lab.prune_network(&request, hyper.with_retrain_epochs(epochs))?);
        }
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        experiment::testing::{FixedProvider, ScriptedEngine},
        metrics::{ExperimentRecord, MemoryMetricsSink},
        network::Network,
        store::{ArtifactLayout, MemoryModelStore, ModelStore},
    };

    fn lab(models: &[&str]) -> (PruningLab, Arc<MemoryMetricsSink>) {
        let store = Arc::new(MemoryModelStore::default());
        let sink = Arc::new(MemoryMetricsSink::default());
        let lab = PruningLab::from_parts(
            ArtifactLayout::new("/suite"),
            vec![4, 250, 3],
            11,
            Box::new(FixedProvider),
            Box::new(ScriptedEngine::new(&[], &[])),
            store.clone(),
            sink.clone(),
        )
        .unwrap();
        for name in models {
            let model = Network::new(&[4, 250, 3], 11).unwrap();
            store.save(&model, &lab.layout().base_model(name)).unwrap();
        }
        (lab, sink)
    }

    const ONE_RUN: SuiteConfig = SuiteConfig { models: 2, runs: 1 };

    #[test]
    fn experiment1_covers_every_model_and_strategy() {
        let (mut lab, _) = lab(&["model0", "model1"]);
        let summaries = experiment1(&mut lab, ONE_RUN, Hyperparameters::default()).unwrap();
        assert_eq!(summaries.len(), 9);
        assert_eq!(
            summaries.last().unwrap().stem,
            "optimal_brain_damage-var=false-model0"
        );
        for summary in &summaries {
            if summary.stem.ends_with("model1") {
                assert!(summary.checkpoints.is_empty(), "{}", summary.stem);
            } else {
                assert!(!summary.checkpoints.is_empty(), "{}", summary.stem);
            }
        }
    }

    #[test]
    fn experiment2_compares_retraining_modes() {
        let (mut lab, sink) = lab(&["model"]);
        let summaries = experiment2(&mut lab, ONE_RUN, Hyperparameters::default()).unwrap();
        assert_eq!(summaries.len(), 10);
        for (path, table) in sink.writes() {
            let rows: Vec<ExperimentRecord> =
                serde_json::from_value(table["rows"].clone()).unwrap();
            let expected = if path.to_string_lossy().contains("var=true") {
                1
            } else {
                FIXED_RETRAIN_EPOCHS
            };
            assert!(rows.iter().all(|row| row.retrain_epochs == expected));
            assert!(rows.iter().all(|row| (row.pruning_perc - 50.0).abs() < f64::EPSILON));
        }
    }
}
