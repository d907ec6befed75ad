#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, rust_2018_idioms)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Prunelab: iterative weight-pruning experiments on dense classifiers.
//!
//! A base network is trained, then repeatedly pruned at a fixed rate until it
//! falls to the weight floor, retraining after every step. Each step is
//! recorded in a metric table and promising models are checkpointed.

/// Error type shared across the lab.
#[path = "../error.rs"]
pub mod error;

/// Lab configuration and hyperparameters.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Datasets, batching and data providers.
#[path = "../dataloader.rs"]
pub mod dataloader;

/// Masked dense networks, loss and optimiser.
#[path = "../network/main.rs"]
pub mod network;

/// Training and evaluation engines.
#[path = "../engine.rs"]
pub mod engine;

/// Pruning strategies.
#[path = "../strategy/main.rs"]
pub mod strategy;

/// Artifact layout and model persistence.
#[path = "../store.rs"]
pub mod store;

/// Metric rows, tables and sinks.
#[path = "../metrics.rs"]
pub mod metrics;

/// Experiment driver and suites.
#[path = "../experiment/main.rs"]
pub mod experiment;

pub use config::{DatasetConfig, Hyperparameters, LabConfig};
pub use dataloader::{DataSplits, Dataset, DatasetProvider, SyntheticProvider};
pub use engine::{Engine, SgdEngine};
pub use error::LabError;
pub use experiment::{
    checkpoint::{CheckpointTracker, SaveReason},
    suites::{experiment1, experiment2, SuiteConfig},
    PruneRequest, PruneSummary, PruningLab, ScratchSummary,
};
pub use metrics::{EpochRecord, ExperimentRecord, MetricsSink, MetricsTable};
pub use network::{Loss, Network, Sgd};
pub use store::{ArtifactLayout, ModelStore};
pub use strategy::{PruneMethod, PruneStrategy};
pub use telemetry::{LabTelemetry, LabTelemetryBuilder};
