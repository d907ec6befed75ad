use thiserror::Error;

/// Errors raised by the pruning lab core and its reference collaborators.
#[derive(Debug, Error)]
pub enum LabError {
    /// Pruning rate outside `(0, 100]`.
    #[error("pruning rate {0} is outside (0, 100]")]
    InvalidRate(f64),
    /// Loss-aware strategy used before a validation set and loss were bound.
    #[error("strategy {method} needs a validation dataset and loss before pruning")]
    MissingLossBinding {
        /// Strategy name.
        method: &'static str,
    },
    /// Evaluation or training requested on a dataset without samples.
    #[error("dataset {0} contains no samples")]
    EmptyDataset(&'static str),
    /// Input or label dimensions disagree with the network.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Expected size.
        expected: usize,
        /// Observed size.
        found: usize,
    },
    /// Architecture needs at least an input and an output layer of nonzero width.
    #[error("invalid architecture {0:?}")]
    InvalidArchitecture(Vec<usize>),
    /// Unknown strategy name on the command line or in a config file.
    #[error("unknown pruning strategy {0:?}")]
    UnknownStrategy(String),
    /// No artifact stored under the requested path.
    #[error("no model stored at {0}")]
    MissingArtifact(String),
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        assert_eq!(
            LabError::InvalidRate(0.0).to_string(),
            "pruning rate 0 is outside (0, 100]"
        );
        let err = LabError::MissingLossBinding {
            method: "optimal_brain_damage",
        };
        assert!(err.to_string().contains("optimal_brain_damage"));
    }
}
