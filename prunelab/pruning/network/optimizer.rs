use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::model::{Gradients, Network};

/// Learning rate and momentum of an SGD optimiser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SgdConfig {
    /// Step size.
    pub learning_rate: f32,
    /// Velocity decay; zero gives plain SGD.
    pub momentum: f32,
}

/// Stochastic gradient descent with optional momentum.
///
/// Velocity buffers are created lazily on the first step, so a fresh
/// optimiser always starts from rest.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    velocity: Vec<(Array2<f32>, Array1<f32>)>,
}

impl Sgd {
    /// Creates an optimiser with empty velocity.
    #[must_use]
    pub const fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            config: SgdConfig {
                learning_rate,
                momentum,
            },
            velocity: Vec::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> SgdConfig {
        self.config
    }

    /// Applies one update to `network`.
    pub fn step(&mut self, network: &mut Network, grads: &Gradients) {
        if self.velocity.len() != grads.weights.len() {
            self.velocity = grads
                .weights
                .iter()
                .zip(&grads.biases)
                .map(|(w, b)| (Array2::zeros(w.raw_dim()), Array1::zeros(b.raw_dim())))
                .collect();
        }
        let SgdConfig {
            learning_rate,
            momentum,
        } = self.config;
        for (idx, (weight_velocity, bias_velocity)) in self.velocity.iter_mut().enumerate() {
            *weight_velocity = &*weight_velocity * momentum + &grads.weights[idx];
            *bias_velocity = &*bias_velocity * momentum + &grads.biases[idx];
            network.descend(
                idx,
                &(&*weight_velocity * learning_rate),
                &(&*bias_velocity * learning_rate),
            );
        }
    }
}
