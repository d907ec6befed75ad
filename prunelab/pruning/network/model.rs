use ndarray::{Array1, Array2, Axis};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::loss::Loss;
use crate::error::LabError;

/// Fully connected layer whose pruned connections are fixed at zero by a mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    mask: Array2<f32>,
}

impl DenseLayer {
    fn new(inputs: usize, outputs: usize, rng: &mut SmallRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        let weights = Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-limit..limit));
        Self {
            weights,
            bias: Array1::zeros(outputs),
            mask: Array2::ones((inputs, outputs)),
        }
    }

    /// Weight matrix laid out `(inputs, outputs)`.
    #[must_use]
    pub const fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Keep-mask; `1.0` for live connections and `0.0` for pruned ones.
    #[must_use]
    pub const fn mask(&self) -> &Array2<f32> {
        &self.mask
    }

    /// Number of connections still alive.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.mask.iter().filter(|keep| **keep > 0.0).count()
    }

    /// Number of connections the layer was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.weights.len()
    }

    /// Row-major positions of live connections.
    #[must_use]
    pub fn alive_positions(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep > 0.0)
            .map(|(flat, _)| flat)
            .collect()
    }

    /// Weight at a row-major position.
    #[must_use]
    pub fn weight_at(&self, flat: usize) -> f32 {
        let cols = self.weights.ncols();
        self.weights[[flat / cols, flat % cols]]
    }

    fn prune_at(&mut self, flat: usize) -> bool {
        let cols = self.weights.ncols();
        let index = [flat / cols, flat % cols];
        let was_alive = self.mask[index] > 0.0;
        self.mask[index] = 0.0;
        self.weights[index] = 0.0;
        was_alive
    }

    fn descend(&mut self, weight_step: &Array2<f32>, bias_step: &Array1<f32>) {
        self.weights = (&self.weights - weight_step) * &self.mask;
        self.bias = &self.bias - bias_step;
    }
}

/// Per-layer gradients produced by back-propagation.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Weight gradients, already masked.
    pub weights: Vec<Array2<f32>>,
    /// Bias gradients.
    pub biases: Vec<Array1<f32>>,
}

/// Multilayer perceptron with ReLU hidden layers and linear logits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    id: Uuid,
    architecture: Vec<usize>,
    layers: Vec<DenseLayer>,
}

impl Network {
    /// Creates a network with seeded Glorot-uniform weights.
    pub fn new(architecture: &[usize], seed: u64) -> Result<Self, LabError> {
        check_architecture(architecture)?;
        let mut rng = SmallRng::seed_from_u64(seed);
        let layers = architecture
            .windows(2)
            .map(|pair| DenseLayer::new(pair[0], pair[1], &mut rng))
            .collect();
        Ok(Self {
            id: Uuid::new_v4(),
            architecture: architecture.to_vec(),
            layers,
        })
    }

    /// Checks that the layers agree with the architecture, as required after
    /// deserialising a stored network.
    pub fn validate(&self) -> Result<(), LabError> {
        check_architecture(&self.architecture)?;
        let consistent = self.layers.len() + 1 == self.architecture.len()
            && self
                .layers
                .iter()
                .zip(self.architecture.windows(2))
                .all(|(layer, pair)| {
                    let shape = (pair[0], pair[1]);
                    layer.weights.dim() == shape
                        && layer.mask.dim() == shape
                        && layer.bias.len() == pair[1]
                });
        if consistent {
            Ok(())
        } else {
            Err(LabError::InvalidArchitecture(self.architecture.clone()))
        }
    }

    /// Identifier assigned at construction; survives save/load.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Layer widths, input first.
    #[must_use]
    pub fn architecture(&self) -> &[usize] {
        &self.architecture
    }

    /// Read access to the layers.
    #[must_use]
    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Number of live connection weights (biases are not counted).
    #[must_use]
    pub fn weight_count(&self) -> usize {
        self.layers.iter().map(DenseLayer::alive).sum()
    }

    /// Connection weights of the unpruned network.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layers.iter().map(DenseLayer::capacity).sum()
    }

    /// Output logits for a batch of row-major inputs.
    pub fn logits(&self, input: &Array2<f32>) -> Result<Array2<f32>, LabError> {
        self.check_input(input)?;
        let mut activations = self.forward_cached(input);
        Ok(activations.pop().unwrap_or_else(|| input.clone()))
    }

    /// Predicted class per input row.
    pub fn predict(&self, input: &Array2<f32>) -> Result<Vec<usize>, LabError> {
        let logits = self.logits(input)?;
        Ok(logits
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (idx, value)| {
                        if *value > best.1 {
                            (idx, *value)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    /// Back-propagates `loss` over one batch.
    pub fn gradients(
        &self,
        input: &Array2<f32>,
        labels: &[usize],
        loss: Loss,
    ) -> Result<(f32, Gradients), LabError> {
        self.check_input(input)?;
        let activations = self.forward_cached(input);
        let logits = &activations[activations.len() - 1];
        let (value, mut delta) = loss.evaluate(logits, labels)?;

        let mut weights = Vec::with_capacity(self.layers.len());
        let mut biases = Vec::with_capacity(self.layers.len());
        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            weights.push(activations[idx].t().dot(&delta) * &layer.mask);
            biases.push(delta.sum_axis(Axis(0)));
            if idx > 0 {
                let upstream = delta.dot(&layer.weights.t());
                let active = activations[idx].mapv(|a| if a > 0.0 { 1.0 } else { 0.0 });
                delta = upstream * &active;
            }
        }
        weights.reverse();
        biases.reverse();
        Ok((value, Gradients { weights, biases }))
    }

    /// Removes the connection at a row-major position; returns whether it was alive.
    pub fn prune_weight(&mut self, layer: usize, flat: usize) -> bool {
        self.layers
            .get_mut(layer)
            .map_or(false, |target| target.prune_at(flat))
    }

    pub(crate) fn descend(&mut self, layer: usize, weight_step: &Array2<f32>, bias_step: &Array1<f32>) {
        if let Some(target) = self.layers.get_mut(layer) {
            target.descend(weight_step, bias_step);
        }
    }

    fn check_input(&self, input: &Array2<f32>) -> Result<(), LabError> {
        let expected = self.architecture[0];
        if input.ncols() == expected {
            Ok(())
        } else {
            Err(LabError::ShapeMismatch {
                expected,
                found: input.ncols(),
            })
        }
    }

    fn forward_cached(&self, input: &Array2<f32>) -> Vec<Array2<f32>> {
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = activations[idx].dot(&layer.weights) + &layer.bias;
            activations.push(if idx == last {
                z
            } else {
                z.mapv(|v| v.max(0.0))
            });
        }
        activations
    }
}

fn check_architecture(architecture: &[usize]) -> Result<(), LabError> {
    if architecture.len() < 2 || architecture.iter().any(|width| *width == 0) {
        Err(LabError::InvalidArchitecture(architecture.to_vec()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> (Array2<f32>, Vec<usize>) {
        let input = Array2::from_shape_fn((6, 4), |(row, col)| ((row + col) % 3) as f32 - 1.0);
        let labels = vec![0, 1, 2, 0, 1, 2];
        (input, labels)
    }

    #[test]
    fn weight_count_covers_every_connection() {
        let network = Network::new(&[4, 5, 3], 1).unwrap();
        assert_eq!(network.weight_count(), 4 * 5 + 5 * 3);
        assert_eq!(network.capacity(), network.weight_count());
    }

    #[test]
    fn rejects_degenerate_architectures() {
        assert!(Network::new(&[4], 1).is_err());
        assert!(Network::new(&[4, 0, 2], 1).is_err());
    }

    #[test]
    fn pruning_zeroes_weight_and_lowers_count() {
        let mut network = Network::new(&[4, 5, 3], 1).unwrap();
        assert!(network.prune_weight(0, 7));
        assert!(!network.prune_weight(0, 7));
        assert_eq!(network.weight_count(), 34);
        assert!(network.layers()[0].weight_at(7).abs() < f32::EPSILON);
        assert!(!network.layers()[0].alive_positions().contains(&7));
    }

    #[test]
    fn pruned_weights_stay_zero_after_updates() {
        let mut network = Network::new(&[4, 5, 3], 2).unwrap();
        network.prune_weight(0, 0);
        let (input, labels) = batch();
        let (_, grads) = network.gradients(&input, &labels, Loss::CrossEntropy).unwrap();
        assert!(grads.weights[0][[0, 0]].abs() < f32::EPSILON);
        let step = Array2::from_elem((4, 5), 0.5);
        network.descend(0, &step, &Array1::zeros(5));
        assert!(network.layers()[0].weight_at(0).abs() < f32::EPSILON);
        assert_eq!(network.weight_count(), 34);
    }

    #[test]
    fn gradient_descent_reduces_loss() {
        let mut network = Network::new(&[4, 8, 3], 3).unwrap();
        let (input, labels) = batch();
        let (before, _) = network.gradients(&input, &labels, Loss::CrossEntropy).unwrap();
        for _ in 0..50 {
            let (_, grads) = network.gradients(&input, &labels, Loss::CrossEntropy).unwrap();
            for (idx, (dw, db)) in grads.weights.iter().zip(&grads.biases).enumerate() {
                network.descend(idx, &(dw * 0.1), &(db * 0.1));
            }
        }
        let (after, _) = network.gradients(&input, &labels, Loss::CrossEntropy).unwrap();
        assert!(after < before);
    }

    #[test]
    fn validation_catches_layers_disagreeing_with_architecture() {
        let mut network = Network::new(&[4, 5, 3], 1).unwrap();
        assert!(network.validate().is_ok());
        network.layers.pop();
        assert!(matches!(
            network.validate(),
            Err(LabError::InvalidArchitecture(_))
        ));
        network.architecture.clear();
        assert!(network.validate().is_err());
    }

    #[test]
    fn input_width_is_checked() {
        let network = Network::new(&[4, 3], 1).unwrap();
        let input = Array2::zeros((2, 5));
        assert!(matches!(
            network.predict(&input),
            Err(LabError::ShapeMismatch { expected: 4, found: 5 })
        ));
    }
}
