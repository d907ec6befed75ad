//! Masked dense classifier used as the pruning subject.

/// Loss functions.
pub mod loss;
/// Network definition and back-propagation.
pub mod model;
/// Optimisers.
pub mod optimizer;

pub use loss::Loss;
pub use model::{DenseLayer, Gradients, Network};
pub use optimizer::{Sgd, SgdConfig};
