use serde::{Deserialize, Serialize};

/// Initial `smallest_model` bound; any model below it may be saved.
pub const INITIAL_SMALLEST_MODEL: usize = 30_000;

/// Largest accuracy drop (in percentage points) a saved small model may have.
pub const MAX_ACCURACY_DROP: f64 = 1.0;

/// Inputs of one checkpoint decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointCandidate {
    /// Test accuracy of the unpruned base model.
    pub original_accuracy: f64,
    /// Test accuracy after the pruning step.
    pub final_accuracy: f64,
    /// Weight count of the unpruned base model.
    pub original_weight_count: usize,
    /// Weight count after the pruning step.
    pub weight_count: usize,
}

/// Which selection rule admitted a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    /// New smallest model within the accuracy budget.
    WeightBudget,
    /// New most accurate model at 50% compression or better.
    Compression,
    /// Both rules held.
    Both,
}

/// Running best-trackers of one pruning invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTracker {
    enabled: bool,
    best_acc: f64,
    smallest_model: usize,
}

impl CheckpointTracker {
    /// Fresh trackers; nothing is ever saved when `enabled` is false.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            best_acc: 0.0,
            smallest_model: INITIAL_SMALLEST_MODEL,
        }
    }

    /// Highest accuracy among saved models.
    #[must_use]
    pub const fn best_acc(&self) -> f64 {
        self.best_acc
    }

    /// Smallest weight count among saved models.
    #[must_use]
    pub const fn smallest_model(&self) -> usize {
        self.smallest_model
    }

    /// Pure decision; does not touch the trackers.
    #[must_use]
    pub fn evaluate(&self, candidate: &CheckpointCandidate) -> Option<SaveReason> {
        if !self.enabled {
            return None;
        }
        let weight_budget = candidate.original_accuracy - candidate.final_accuracy
            < MAX_ACCURACY_DROP
            && candidate.weight_count < self.smallest_model;
        let compression = candidate.weight_count as f64
            <= candidate.original_weight_count as f64 / 2.0
            && candidate.final_accuracy > self.best_acc;
        match (weight_budget, compression) {
            (true, true) => Some(SaveReason::Both),
            (true, false) => Some(SaveReason::WeightBudget),
            (false, true) => Some(SaveReason::Compression),
            (false, false) => None,
        }
    }

    /// Decides and, on a save, advances the trackers.
    pub fn consider(&mut self, candidate: &CheckpointCandidate) -> Option<SaveReason> {
        let reason = self.evaluate(candidate)?;
        self.best_acc = self.best_acc.max(candidate.final_accuracy);
        self.smallest_model = self.smallest_model.min(candidate.weight_count);
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(final_accuracy: f64, weight_count: usize) -> CheckpointCandidate {
        CheckpointCandidate {
            original_accuracy: 90.0,
            final_accuracy,
            original_weight_count: 1_000,
            weight_count,
        }
    }

    fn tracker(best_acc: f64, smallest_model: usize) -> CheckpointTracker {
        CheckpointTracker {
            enabled: true,
            best_acc,
            smallest_model,
        }
    }

    #[test]
    fn weight_budget_rule_saves_smaller_model() {
        let mut tracker = tracker(95.0, 600);
        let reason = tracker.consider(&candidate(89.5, 550));
        assert_eq!(reason, Some(SaveReason::WeightBudget));
        assert_eq!(tracker.smallest_model(), 550);
        assert!((tracker.best_acc() - 95.0).abs() < f64::EPSILON);
    }

    #[test]
    fn accuracy_drop_of_one_point_is_rejected() {
        let tracker = tracker(95.0, 600);
        assert_eq!(tracker.evaluate(&candidate(89.0, 550)), None);
    }

    #[test]
    fn compression_rule_needs_half_size_and_better_accuracy() {
        let mut tracker = tracker(80.0, 100);
        assert_eq!(tracker.evaluate(&candidate(85.0, 501)), None);
        assert_eq!(
            tracker.consider(&candidate(85.0, 500)),
            Some(SaveReason::Compression)
        );
        assert!((tracker.best_acc() - 85.0).abs() < f64::EPSILON);
        assert_eq!(tracker.smallest_model(), 100);
        assert_eq!(tracker.evaluate(&candidate(84.0, 400)), None);
    }

    #[test]
    fn both_rules_can_fire_together() {
        let mut tracker = CheckpointTracker::new(true);
        assert_eq!(
            tracker.consider(&candidate(89.9, 450)),
            Some(SaveReason::Both)
        );
        assert_eq!(tracker.smallest_model(), 450);
        assert!((tracker.best_acc() - 89.9).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_tracker_never_saves_or_moves() {
        let mut tracker = CheckpointTracker::new(false);
        assert_eq!(tracker.consider(&candidate(90.0, 10)), None);
        assert_eq!(tracker, CheckpointTracker::new(false));
    }

    #[test]
    fn decisions_are_deterministic() {
        let tracker = tracker(70.0, 800);
        let input = candidate(89.2, 640);
        let first = tracker.evaluate(&input);
        for _ in 0..10 {
            assert_eq!(tracker.evaluate(&input), first);
        }
    }
}
