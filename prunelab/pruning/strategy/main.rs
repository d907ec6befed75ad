//! Pruning strategies: capability flags plus a single `prune` mutation.

/// Saliency scoring rules.
pub mod saliency;

use std::{fmt, str::FromStr};

use rand::{rngs::SmallRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    dataloader::Dataset,
    error::LabError,
    network::{Loss, Network},
};
use saliency::Candidate;

/// Built-in pruning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneMethod {
    /// Removes randomly chosen live connections.
    RandomPruning,
    /// Global magnitude ranking after normalising by each layer's spread.
    MagnitudeClassDistributed,
    /// Removes the same share of every layer by magnitude.
    MagnitudeClassUniform,
    /// Global magnitude ranking ignoring layer boundaries.
    MagnitudeClassBlinded,
    /// Loss-curvature saliency; needs a bound validation set and loss.
    OptimalBrainDamage,
}

impl PruneMethod {
    /// Every built-in strategy, in experiment order.
    pub const ALL: [Self; 5] = [
        Self::RandomPruning,
        Self::MagnitudeClassDistributed,
        Self::MagnitudeClassUniform,
        Self::MagnitudeClassBlinded,
        Self::OptimalBrainDamage,
    ];

    /// Name used in result file names and metric rows.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RandomPruning => "random_pruning",
            Self::MagnitudeClassDistributed => "magnitude_class_distributed",
            Self::MagnitudeClassUniform => "magnitude_class_uniform",
            Self::MagnitudeClassBlinded => "magnitude_class_blinded",
            Self::OptimalBrainDamage => "optimal_brain_damage",
        }
    }

    /// Whether saliency needs a validation set and loss function.
    #[must_use]
    pub const fn requires_loss(self) -> bool {
        matches!(self, Self::OptimalBrainDamage)
    }

    /// Validation batch size bound for loss-aware pruning; `None` is one full batch.
    #[must_use]
    pub const fn loss_batch(self) -> Option<usize> {
        match self {
            Self::OptimalBrainDamage => None,
            _ => Some(100),
        }
    }
}

impl fmt::Display for PruneMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PruneMethod {
    type Err = LabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random" | "random_pruning" => Ok(Self::RandomPruning),
            "distributed" | "magnitude_class_distributed" => Ok(Self::MagnitudeClassDistributed),
            "uniform" | "magnitude_class_uniform" => Ok(Self::MagnitudeClassUniform),
            "blinded" | "magnitude_class_blinded" => Ok(Self::MagnitudeClassBlinded),
            "obd" | "optimal_brain_damage" => Ok(Self::OptimalBrainDamage),
            _ => Err(LabError::UnknownStrategy(value.to_string())),
        }
    }
}

/// Checks that a pruning rate lies in `(0, 100]`.
pub fn validate_rate(rate: f64) -> Result<(), LabError> {
    if rate.is_finite() && rate > 0.0 && rate <= 100.0 {
        Ok(())
    } else {
        Err(LabError::InvalidRate(rate))
    }
}

/// Connections removed from `alive` at `rate` percent; at least one while any remain.
#[must_use]
pub fn removal_count(alive: usize, rate: f64) -> usize {
    if alive == 0 || rate <= 0.0 {
        return 0;
    }
    let target = (alive as f64 * rate / 100.0).round() as usize;
    target.clamp(1, alive)
}

/// A strategy instance with the state its saliency rule needs.
#[derive(Debug, Clone)]
pub struct PruneStrategy {
    method: PruneMethod,
    retraining: bool,
    valid_dataset: Option<Dataset>,
    criterion: Option<Loss>,
    rng: SmallRng,
}

impl PruneStrategy {
    /// Creates a strategy that requires retraining after each step.
    #[must_use]
    pub fn new(method: PruneMethod, seed: u64) -> Self {
        Self {
            method,
            retraining: true,
            valid_dataset: None,
            criterion: None,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Disables retraining between pruning steps.
    #[must_use]
    pub fn without_retraining(mut self) -> Self {
        self.retraining = false;
        self
    }

    /// Strategy tag.
    #[must_use]
    pub const fn method(&self) -> PruneMethod {
        self.method
    }

    /// Whether `bind_loss` must be called before `prune`.
    #[must_use]
    pub const fn requires_loss(&self) -> bool {
        self.method.requires_loss()
    }

    /// Whether the pruning loop retrains after each step.
    #[must_use]
    pub const fn requires_retraining(&self) -> bool {
        self.retraining
    }

    /// Binds the validation set and loss used by loss-aware saliency.
    pub fn bind_loss(&mut self, valid_dataset: Dataset, criterion: Loss) {
        self.valid_dataset = Some(valid_dataset);
        self.criterion = Some(criterion);
    }

    /// Removes `rate` percent of the live connections; returns how many went.
    pub fn prune(&mut self, model: &mut Network, rate: f64) -> Result<usize, LabError> {
        validate_rate(rate)?;
        let count = removal_count(model.weight_count(), rate);
        let selected = match self.method {
            PruneMethod::RandomPruning => {
                saliency::lowest(saliency::random(model, &mut self.rng), count)
            }
            PruneMethod::MagnitudeClassBlinded => {
                saliency::lowest(saliency::magnitude(model), count)
            }
            PruneMethod::MagnitudeClassDistributed => {
                saliency::lowest(saliency::layer_normalized_magnitude(model), count)
            }
            PruneMethod::MagnitudeClassUniform => per_layer_lowest(model, rate),
            PruneMethod::OptimalBrainDamage => {
                let (Some(valid), Some(loss)) = (self.valid_dataset.as_ref(), self.criterion)
                else {
                    return Err(LabError::MissingLossBinding {
                        method: self.method.name(),
                    });
                };
                saliency::lowest(saliency::brain_damage(model, valid, loss)?, count)
            }
        };
        Ok(selected
            .into_iter()
            .filter(|candidate| model.prune_weight(candidate.layer, candidate.flat))
            .count())
    }
}

fn per_layer_lowest(model: &Network, rate: f64) -> Vec<Candidate> {
    let scores = saliency::magnitude(model);
    let mut selected = Vec::new();
    for (idx, layer) in model.layers().iter().enumerate() {
        let in_layer: Vec<Candidate> = scores
            .iter()
            .copied()
            .filter(|candidate| candidate.layer == idx)
            .collect();
        selected.extend(saliency::lowest(in_layer, removal_count(layer.alive(), rate)));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn network() -> Network {
        Network::new(&[20, 30, 10], 3).unwrap()
    }

    fn bound(method: PruneMethod) -> PruneStrategy {
        let mut strategy = PruneStrategy::new(method, 1);
        let inputs = Array2::from_shape_fn((8, 20), |(row, col)| ((row * col) % 5) as f32 / 5.0);
        let valid = Dataset::new("valid", inputs, vec![0, 1, 2, 3, 4, 5, 6, 7], None).unwrap();
        strategy.bind_loss(valid, Loss::CrossEntropy);
        strategy
    }

    #[test]
    fn removal_count_rounds_and_floors_at_one() {
        assert_eq!(removal_count(1000, 50.0), 500);
        assert_eq!(removal_count(3, 10.0), 1);
        assert_eq!(removal_count(7, 100.0), 7);
        assert_eq!(removal_count(0, 50.0), 0);
    }

    #[test]
    fn every_strategy_strictly_shrinks_the_network() {
        for method in PruneMethod::ALL {
            let mut model = network();
            let mut strategy = bound(method);
            let before = model.weight_count();
            let removed = strategy.prune(&mut model, 25.0).unwrap();
            assert!(model.weight_count() < before, "{method}");
            assert_eq!(before - model.weight_count(), removed, "{method}");
            assert_eq!(removed, removal_count(before, 25.0), "{method}");
        }
    }

    #[test]
    fn uniform_strategy_prunes_each_layer_equally() {
        let mut model = network();
        bound(PruneMethod::MagnitudeClassUniform)
            .prune(&mut model, 50.0)
            .unwrap();
        assert_eq!(model.layers()[0].alive(), 300);
        assert_eq!(model.layers()[1].alive(), 150);
    }

    #[test]
    fn blinded_strategy_removes_smallest_magnitudes() {
        let mut model = network();
        let smallest = saliency::lowest(saliency::magnitude(&model), 1)[0];
        PruneStrategy::new(PruneMethod::MagnitudeClassBlinded, 1)
            .prune(&mut model, 0.1)
            .unwrap();
        assert!(!model.layers()[smallest.layer]
            .alive_positions()
            .contains(&smallest.flat));
    }

    #[test]
    fn loss_aware_strategy_needs_binding() {
        let mut strategy = PruneStrategy::new(PruneMethod::OptimalBrainDamage, 1);
        assert!(strategy.requires_loss());
        let mut model = network();
        assert!(matches!(
            strategy.prune(&mut model, 10.0),
            Err(LabError::MissingLossBinding { .. })
        ));
        assert_eq!(model.weight_count(), model.capacity());
    }

    #[test]
    fn invalid_rates_are_rejected() {
        let mut strategy = PruneStrategy::new(PruneMethod::RandomPruning, 1);
        let mut model = network();
        for rate in [0.0, -5.0, 100.5, f64::NAN] {
            assert!(strategy.prune(&mut model, rate).is_err());
        }
    }

    #[test]
    fn names_round_trip_through_parsing() {
        for method in PruneMethod::ALL {
            assert_eq!(method.name().parse::<PruneMethod>().unwrap(), method);
        }
        assert_eq!("OBD".parse::<PruneMethod>().unwrap(), PruneMethod::OptimalBrainDamage);
        assert!("lobs".parse::<PruneMethod>().is_err());
    }

    #[test]
    fn retraining_flag_is_configurable() {
        let strategy = PruneStrategy::new(PruneMethod::RandomPruning, 1);
        assert!(strategy.requires_retraining());
        assert!(!strategy.without_retraining().requires_retraining());
    }
}
