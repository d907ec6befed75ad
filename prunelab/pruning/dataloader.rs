use ndarray::{s, Array2};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{config::DatasetConfig, error::LabError};

/// Mini-batch view materialised for a training or evaluation step.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Row-major inputs.
    pub inputs: Array2<f32>,
    /// Class label per row.
    pub labels: Vec<usize>,
}

/// Labelled samples plus the batch size they are served in.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: &'static str,
    inputs: Array2<f32>,
    labels: Vec<usize>,
    batch_size: usize,
}

impl Dataset {
    /// Creates a dataset; a `batch_size` of `None` serves everything as one batch.
    pub fn new(
        name: &'static str,
        inputs: Array2<f32>,
        labels: Vec<usize>,
        batch_size: Option<usize>,
    ) -> Result<Self, LabError> {
        if inputs.nrows() != labels.len() {
            return Err(LabError::ShapeMismatch {
                expected: inputs.nrows(),
                found: labels.len(),
            });
        }
        let batch_size = batch_size.unwrap_or(labels.len()).max(1);
        Ok(Self {
            name,
            inputs,
            labels,
            batch_size,
        })
    }

    /// Split name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true when the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of batches served per pass.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Materialises batch `index` (zero based); the last batch may be short.
    #[must_use]
    pub fn batch(&self, index: usize) -> Option<Batch> {
        let start = index.checked_mul(self.batch_size)?;
        if start >= self.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.len());
        Some(Batch {
            inputs: self.inputs.slice(s![start..end, ..]).to_owned(),
            labels: self.labels[start..end].to_vec(),
        })
    }

    /// Iterates over all batches in order.
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (0..self.batch_count()).filter_map(move |index| self.batch(index))
    }

    /// Same samples served with a different batch size.
    #[must_use]
    pub fn rebatched(&self, batch_size: Option<usize>) -> Self {
        Self {
            batch_size: batch_size.unwrap_or(self.len()).max(1),
            ..self.clone()
        }
    }
}

/// Source of the train, validation and test splits.
pub trait DatasetProvider {
    /// Held-out test split.
    fn test_dataset(&self) -> Result<Dataset, LabError>;

    /// Training split plus a validation split served in `valid_batch` sized
    /// batches (`None` meaning a single batch).
    fn train_valid_dataset(
        &self,
        valid_batch: Option<usize>,
    ) -> Result<(Dataset, Dataset), LabError>;
}

/// The three splits every loop reads from.
#[derive(Debug, Clone)]
pub struct DataSplits {
    /// Training split.
    pub train: Dataset,
    /// Validation split driving stopping decisions.
    pub valid: Dataset,
    /// Held-out split for reported accuracy.
    pub test: Dataset,
}

impl DataSplits {
    /// Loads all splits, serving validation in batches of `valid_batch`.
    pub fn load(
        provider: &dyn DatasetProvider,
        valid_batch: Option<usize>,
    ) -> Result<Self, LabError> {
        let test = provider.test_dataset()?;
        let (train, valid) = provider.train_valid_dataset(valid_batch)?;
        Ok(Self { train, valid, test })
    }
}

/// Seeded Gaussian-prototype classification data.
///
/// Every class owns a random prototype vector; samples are the prototype
/// plus isotropic noise. Splits draw from independent streams of the same
/// seed so repeated calls return identical data.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    config: DatasetConfig,
    seed: u64,
    prototypes: Array2<f32>,
}

impl SyntheticProvider {
    /// Builds the provider and its class prototypes.
    #[must_use]
    pub fn new(config: DatasetConfig, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let prototypes = Array2::from_shape_fn((config.classes, config.input_dim), |_| {
            rng.gen_range(-1.0..1.0)
        });
        Self {
            config,
            seed,
            prototypes,
        }
    }

    fn sample(
        &self,
        name: &'static str,
        count: usize,
        stream: u64,
        batch_size: Option<usize>,
    ) -> Result<Dataset, LabError> {
        if count == 0 || self.config.classes == 0 {
            return Err(LabError::EmptyDataset(name));
        }
        let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(stream));
        let dim = self.config.input_dim;
        let mut inputs = Array2::zeros((count, dim));
        let mut labels = Vec::with_capacity(count);
        for row in 0..count {
            let label = rng.gen_range(0..self.config.classes);
            for col in 0..dim {
                inputs[[row, col]] =
                    self.prototypes[[label, col]] + self.config.noise * gaussian(&mut rng);
            }
            labels.push(label);
        }
        Dataset::new(name, inputs, labels, batch_size)
    }
}

impl DatasetProvider for SyntheticProvider {
    fn test_dataset(&self) -> Result<Dataset, LabError> {
        self.sample("test", self.config.test_samples, 3, Some(self.config.batch_size))
    }

    fn train_valid_dataset(
        &self,
        valid_batch: Option<usize>,
    ) -> Result<(Dataset, Dataset), LabError> {
        let train = self.sample(
            "train",
            self.config.train_samples,
            1,
            Some(self.config.batch_size),
        )?;
        let valid = self.sample("valid", self.config.valid_samples, 2, valid_batch)?;
        Ok((train, valid))
    }
}

/// Box-Muller standard normal draw.
fn gaussian(rng: &mut SmallRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DatasetConfig {
        DatasetConfig {
            input_dim: 4,
            classes: 3,
            train_samples: 50,
            valid_samples: 20,
            test_samples: 10,
            batch_size: 8,
            noise: 0.1,
        }
    }

    #[test]
    fn batches_cover_every_sample() {
        let inputs = Array2::zeros((5, 2));
        let dataset = Dataset::new("train", inputs, vec![0; 5], Some(2)).unwrap();
        let sizes: Vec<usize> = dataset.batches().map(|batch| batch.labels.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(dataset.batch(3).is_none());
    }

    #[test]
    fn missing_batch_size_means_single_batch() {
        let dataset = Dataset::new("valid", Array2::zeros((7, 2)), vec![1; 7], None).unwrap();
        assert_eq!(dataset.batch_count(), 1);
        assert_eq!(dataset.rebatched(Some(3)).batch_count(), 3);
    }

    #[test]
    fn label_count_must_match_rows() {
        assert!(Dataset::new("train", Array2::zeros((3, 2)), vec![0; 2], None).is_err());
    }

    #[test]
    fn provider_is_deterministic() {
        let provider = SyntheticProvider::new(small_config(), 5);
        let first = provider.test_dataset().unwrap();
        let second = provider.test_dataset().unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first.batch(0).unwrap().labels, second.batch(0).unwrap().labels);
    }

    #[test]
    fn validation_batch_follows_request() {
        let provider = SyntheticProvider::new(small_config(), 5);
        let (train, valid) = provider.train_valid_dataset(None).unwrap();
        assert_eq!(train.len(), 50);
        assert_eq!(valid.batch_count(), 1);
        let (_, valid) = provider.train_valid_dataset(Some(5)).unwrap();
        assert_eq!(valid.batch_count(), 4);
    }

    #[test]
    fn empty_split_is_an_error() {
        let config = DatasetConfig {
            test_samples: 0,
            ..small_config()
        };
        let provider = SyntheticProvider::new(config, 1);
        assert!(matches!(
            provider.test_dataset(),
            Err(LabError::EmptyDataset("test"))
        ));
    }
}
