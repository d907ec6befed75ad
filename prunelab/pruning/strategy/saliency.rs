use rand::{rngs::SmallRng, Rng};

use crate::{
    dataloader::Dataset,
    error::LabError,
    network::{Loss, Network},
};

/// Live connection scored for removal; lower scores are pruned first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Layer index.
    pub layer: usize,
    /// Row-major position inside the layer.
    pub flat: usize,
    /// Saliency score.
    pub score: f64,
}

fn scored(network: &Network, mut score: impl FnMut(usize, usize, f32) -> f64) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(network.weight_count());
    for (layer_idx, layer) in network.layers().iter().enumerate() {
        for flat in layer.alive_positions() {
            candidates.push(Candidate {
                layer: layer_idx,
                flat,
                score: score(layer_idx, flat, layer.weight_at(flat)),
            });
        }
    }
    candidates
}

/// Uniformly random scores.
pub fn random(network: &Network, rng: &mut SmallRng) -> Vec<Candidate> {
    scored(network, |_, _, _| rng.gen::<f64>())
}

/// Absolute weight value.
#[must_use]
pub fn magnitude(network: &Network) -> Vec<Candidate> {
    scored(network, |_, _, weight| f64::from(weight.abs()))
}

/// Absolute weight value divided by the standard deviation of its layer's
/// live weights, so layers with wide weight distributions are not favoured.
#[must_use]
pub fn layer_normalized_magnitude(network: &Network) -> Vec<Candidate> {
    let spreads: Vec<f64> = network
        .layers()
        .iter()
        .map(|layer| {
            let live: Vec<f64> = layer
                .alive_positions()
                .into_iter()
                .map(|flat| f64::from(layer.weight_at(flat)))
                .collect();
            if live.len() < 2 {
                return 1.0;
            }
            let mean = live.iter().sum::<f64>() / live.len() as f64;
            let variance =
                live.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / live.len() as f64;
            let std = variance.sqrt();
            if std > f64::EPSILON {
                std
            } else {
                1.0
            }
        })
        .collect();
    scored(network, |layer, _, weight| {
        f64::from(weight.abs()) / spreads[layer]
    })
}

/// Optimal-brain-damage saliency `0.5 * h * w^2`, with the diagonal
/// curvature `h` approximated by the mean squared gradient over the
/// validation batches.
pub fn brain_damage(
    network: &Network,
    valid: &Dataset,
    loss: Loss,
) -> Result<Vec<Candidate>, LabError> {
    if valid.is_empty() {
        return Err(LabError::EmptyDataset(valid.name()));
    }
    let mut curvature: Vec<_> = network
        .layers()
        .iter()
        .map(|layer| layer.weights().mapv(|_| 0.0_f32))
        .collect();
    let mut batches = 0_usize;
    for batch in valid.batches() {
        let (_, grads) = network.gradients(&batch.inputs, &batch.labels, loss)?;
        for (acc, grad) in curvature.iter_mut().zip(&grads.weights) {
            *acc += &grad.mapv(|g| g * g);
        }
        batches += 1;
    }
    let scale = batches.max(1) as f32;
    Ok(scored(network, |layer, flat, weight| {
        let cols = curvature[layer].ncols();
        let h = curvature[layer][[flat / cols, flat % cols]] / scale;
        0.5 * f64::from(h) * f64::from(weight).powi(2)
    }))
}

/// The `count` lowest-scored candidates, ties kept in network order.
#[must_use]
pub fn lowest(mut candidates: Vec<Candidate>, count: usize) -> Vec<Candidate> {
    if count < candidates.len() {
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score));
        candidates.truncate(count);
    }
    candidates
}
