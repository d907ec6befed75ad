use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};

use crate::{
    dataloader::Dataset,
    error::LabError,
    network::{Loss, Network, Sgd},
};

/// One-epoch training and accuracy evaluation.
pub trait Engine {
    /// Runs one pass over `dataset`, updating `model` through `optimizer`.
    fn train(
        &mut self,
        dataset: &Dataset,
        model: &mut Network,
        optimizer: &mut Sgd,
        loss: Loss,
    ) -> Result<(), LabError>;

    /// Percentage of `dataset` samples classified correctly, in `[0, 100]`.
    fn test(&mut self, dataset: &Dataset, model: &Network) -> Result<f64, LabError>;
}

/// Mini-batch SGD engine visiting batches in a shuffled order every epoch.
#[derive(Debug, Clone)]
pub struct SgdEngine {
    rng: SmallRng,
}

impl SgdEngine {
    /// Creates an engine whose batch order is driven by `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Engine for SgdEngine {
    fn train(
        &mut self,
        dataset: &Dataset,
        model: &mut Network,
        optimizer: &mut Sgd,
        loss: Loss,
    ) -> Result<(), LabError> {
        if dataset.is_empty() {
            return Err(LabError::EmptyDataset(dataset.name()));
        }
        let mut order: Vec<usize> = (0..dataset.batch_count()).collect();
        order.shuffle(&mut self.rng);
        for index in order {
            if let Some(batch) = dataset.batch(index) {
                let (_, grads) = model.gradients(&batch.inputs, &batch.labels, loss)?;
                optimizer.step(model, &grads);
            }
        }
        Ok(())
    }

    fn test(&mut self, dataset: &Dataset, model: &Network) -> Result<f64, LabError> {
        if dataset.is_empty() {
            return Err(LabError::EmptyDataset(dataset.name()));
        }
        let mut correct = 0_usize;
        for batch in dataset.batches() {
            let predicted = model.predict(&batch.inputs)?;
            correct += predicted
                .iter()
                .zip(&batch.labels)
                .filter(|(guess, label)| guess == label)
                .count();
        }
        Ok(100.0 * correct as f64 / dataset.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DatasetConfig,
        dataloader::{DatasetProvider, SyntheticProvider},
    };

    #[test]
    fn training_lifts_accuracy_above_chance() {
        let config = DatasetConfig {
            input_dim: 8,
            classes: 3,
            train_samples: 300,
            valid_samples: 60,
            test_samples: 90,
            batch_size: 16,
            noise: 0.3,
        };
        let provider = SyntheticProvider::new(config, 9);
        let (train, _) = provider.train_valid_dataset(Some(20)).unwrap();
        let test = provider.test_dataset().unwrap();
        let mut model = Network::new(&[8, 16, 3], 9).unwrap();
        let mut engine = SgdEngine::new(9);
        let mut optimizer = Sgd::new(0.1, 0.5);
        for _ in 0..10 {
            engine
                .train(&train, &mut model, &mut optimizer, Loss::CrossEntropy)
                .unwrap();
        }
        let accuracy = engine.test(&test, &model).unwrap();
        assert!(accuracy > 70.0, "accuracy {accuracy}");
        assert!(accuracy <= 100.0);
    }
}
