//! Prune → evaluate → retrain → checkpoint → record control loop.

/// Checkpoint selection policy.
pub mod checkpoint;
/// Retraining sub-loop.
pub mod retrain;
/// Named experiment suites.
pub mod suites;
/// Base-model training loop.
pub mod trainer;

#[cfg(test)]
pub(crate) mod testing;

use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    config::{Hyperparameters, LabConfig},
    dataloader::{DataSplits, DatasetProvider, SyntheticProvider},
    engine::{Engine, SgdEngine},
    error::LabError,
    metrics::{
        self, EpochRecord, ExperimentRecord, JsonMetricsSink, MetricsSink, MetricsTable,
        RateSummary,
    },
    network::{Loss, Network, Sgd},
    store::{ArtifactLayout, JsonModelStore, ModelStore},
    strategy::{validate_rate, PruneMethod, PruneStrategy},
    telemetry::{self, LabTelemetry},
};
use checkpoint::{CheckpointCandidate, CheckpointTracker};
use trainer::TrainingOutcome;

/// Pruning continues while the model holds more live weights than this.
pub const WEIGHT_FLOOR: usize = 500;

/// Rates used when a request names none.
pub const DEFAULT_RATES: [f64; 5] = [70.0, 60.0, 50.0, 40.0, 25.0];

/// Validation batch size of the splits used for training and retraining.
pub const VALID_BATCH: usize = 100;

/// One `prune_network` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneRequest {
    /// Strategy to prune with.
    pub method: PruneMethod,
    /// Rates in percent, visited in order.
    pub pruning_rates: Vec<f64>,
    /// Base model name under `model/`.
    pub filename: String,
    /// Repetitions per rate, each starting from the base model.
    pub runs: usize,
    /// Stop retraining early on a validation plateau.
    pub variable_retraining: bool,
    /// Persist models selected by the checkpoint policy.
    pub save: bool,
    /// Retrain after each pruning step.
    pub retraining: bool,
}

impl PruneRequest {
    /// Default request for `method`: default rates, `model`, one run.
    #[must_use]
    pub fn new(method: PruneMethod) -> Self {
        Self {
            method,
            pruning_rates: DEFAULT_RATES.to_vec(),
            filename: "model".into(),
            runs: 1,
            variable_retraining: false,
            save: false,
            retraining: true,
        }
    }
}

/// What a `prune_network` invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneSummary {
    /// Shared file stem of the invocation's artifacts.
    pub stem: String,
    /// Metric table location.
    pub metrics_path: PathBuf,
    /// Rows recorded.
    pub records: usize,
    /// Checkpoints saved, oldest first.
    pub checkpoints: Vec<PathBuf>,
    /// Final state of the best-trackers.
    pub tracker: CheckpointTracker,
    /// Per-rate aggregates of the recorded rows.
    pub by_rate: IndexMap<String, RateSummary>,
}

/// What `train_sparse_model` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchSummary {
    /// Test accuracy of the loaded pruned model.
    pub pruned_accuracy: f64,
    /// Test accuracy after training.
    pub final_accuracy: f64,
    /// Epochs trained.
    pub epochs: usize,
    /// Metric table location.
    pub metrics_path: PathBuf,
    /// Retrained model location, when saved.
    pub saved: Option<PathBuf>,
}

/// State threaded through every run of one `prune_network` call.
struct PruneSession<'r> {
    request: &'r PruneRequest,
    hyper: Hyperparameters,
    stem: String,
    strategy: PruneStrategy,
    tracker: CheckpointTracker,
    table: MetricsTable<ExperimentRecord>,
    checkpoints: Vec<PathBuf>,
}

/// Experiment driver owning the collaborators and the loaded splits.
pub struct PruningLab {
    layout: ArtifactLayout,
    architecture: Vec<usize>,
    seed: u64,
    loss: Loss,
    provider: Box<dyn DatasetProvider>,
    splits: DataSplits,
    engine: Box<dyn Engine>,
    store: Arc<dyn ModelStore>,
    sink: Arc<dyn MetricsSink>,
    telemetry: Option<LabTelemetry>,
}

impl PruningLab {
    /// Driver wired to the reference collaborators described by `config`.
    pub fn new(config: &LabConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let provider = SyntheticProvider::new(config.dataset.clone(), config.seed);
        let lab = Self::from_parts(
            ArtifactLayout::new(&config.output_root),
            config.architecture.clone(),
            config.seed,
            Box::new(provider),
            Box::new(SgdEngine::new(config.seed)),
            Arc::new(JsonModelStore),
            Arc::new(JsonMetricsSink),
        )?;
        Ok(lab)
    }

    /// Driver over caller-supplied collaborators.
    pub fn from_parts(
        layout: ArtifactLayout,
        architecture: Vec<usize>,
        seed: u64,
        provider: Box<dyn DatasetProvider>,
        engine: Box<dyn Engine>,
        store: Arc<dyn ModelStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, LabError> {
        let splits = DataSplits::load(provider.as_ref(), Some(VALID_BATCH))?;
        Ok(Self {
            layout,
            architecture,
            seed,
            loss: Loss::CrossEntropy,
            provider,
            splits,
            engine,
            store,
            sink,
            telemetry: None,
        })
    }

    /// Attaches telemetry for structured logging.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: LabTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Artifact layout.
    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Creates the model and result directories.
    pub fn setup(&self) -> Result<(), LabError> {
        self.layout.setup()
    }

    /// Trains a fresh network and stores it as `model/<filename>`.
    pub fn train_network(
        &mut self,
        filename: &str,
        hyper: Hyperparameters,
    ) -> anyhow::Result<TrainingOutcome> {
        let init_seed = self
            .seed
            .wrapping_add(filename.bytes().map(u64::from).sum::<u64>());
        let mut model = Network::new(&self.architecture, init_seed)?;
        let outcome = trainer::train_until_plateau(
            self.engine.as_mut(),
            &mut model,
            &self.splits,
            self.loss,
            hyper,
            self.telemetry.as_ref(),
        )?;
        let path = self.layout.base_model(filename);
        self.store
            .save(&model, &path)
            .with_context(|| format!("saving base model {path:?}"))?;
        self.log(
            LogLevel::Info,
            "base_model_trained",
            json!({
                "model": filename,
                "epochs": outcome.epochs,
                "accuracy": outcome.test_accuracy,
                "weights": model.weight_count(),
                "architecture": model.architecture(),
            }),
        );
        Ok(outcome)
    }

    /// Trains `model0` .. `model{num - 1}`.
    pub fn train_models(
        &mut self,
        num: usize,
        hyper: Hyperparameters,
    ) -> anyhow::Result<Vec<TrainingOutcome>> {
        (0..num)
            .map(|idx| self.train_network(&format!("model{idx}"), hyper))
            .collect()
    }

    /// Prunes the base model at every requested rate, `runs` times each,
    /// flushing the metric table after each rate.
    pub fn prune_network(
        &mut self,
        request: &PruneRequest,
        hyper: Hyperparameters,
    ) -> anyhow::Result<PruneSummary> {
        for rate in &request.pruning_rates {
            validate_rate(*rate)?;
        }
        let mut strategy = PruneStrategy::new(request.method, self.seed);
        if !request.retraining {
            strategy = strategy.without_retraining();
        }
        if strategy.requires_loss() {
            let (_, valid) = self
                .provider
                .train_valid_dataset(request.method.loss_batch())?;
            strategy.bind_loss(valid, self.loss);
        }

        let stem = ArtifactLayout::result_stem(
            request.method,
            request.variable_retraining,
            &request.filename,
        );
        let metrics_path = self.layout.result_table(&stem);
        let mut session = PruneSession {
            request,
            hyper,
            stem,
            strategy,
            tracker: CheckpointTracker::new(request.save),
            table: MetricsTable::new(),
            checkpoints: Vec::new(),
        };
        self.log(
            LogLevel::Info,
            "prune_network_start",
            json!({
                "strategy": request.method.name(),
                "rates": request.pruning_rates,
                "model": request.filename,
                "runs": request.runs,
                "variable_retraining": request.variable_retraining,
                "num_retrain_epochs": hyper.num_retrain_epochs,
            }),
        );

        let base_path = self.layout.base_model(&request.filename);
        for &rate in &request.pruning_rates {
            for run in 0..request.runs {
                let model = self
                    .store
                    .load(&base_path)
                    .with_context(|| format!("loading base model {base_path:?}"))?;
                self.prune_run(&mut session, rate, run, model)?;
            }
            metrics::flush(self.sink.as_ref(), &session.table, &metrics_path)
                .with_context(|| format!("writing metrics {metrics_path:?}"))?;
            self.log(
                LogLevel::Info,
                "rate_flushed",
                json!({ "stem": session.stem, "rate": rate, "rows": session.table.len() }),
            );
        }

        Ok(PruneSummary {
            stem: session.stem,
            metrics_path,
            records: session.table.len(),
            by_rate: session.table.summary_by_rate(),
            checkpoints: session.checkpoints,
            tracker: session.tracker,
        })
    }

    /// Repeatedly prunes one freshly loaded model until it reaches the floor.
    fn prune_run(
        &mut self,
        session: &mut PruneSession<'_>,
        rate: f64,
        run: usize,
        mut model: Network,
    ) -> anyhow::Result<()> {
        let original_accuracy = self.engine.test(&self.splits.test, &model)?;
        let original_weight_count = model.weight_count();
        let mut optimizer = Sgd::new(session.hyper.learning_rate as f32, session.hyper.momentum);

        while model.weight_count() > WEIGHT_FLOOR {
            let start = Instant::now();
            session.strategy.prune(&mut model, rate)?;

            let outcome = if session.strategy.requires_retraining() {
                retrain::retrain(
                    self.engine.as_mut(),
                    &mut model,
                    &mut optimizer,
                    &self.splits,
                    self.loss,
                    session.hyper,
                    session.request.variable_retraining,
                )?
            } else {
                retrain::without_retraining(self.engine.as_mut(), &model, &self.splits)?
            };

            let weight_count = model.weight_count();
            let candidate = CheckpointCandidate {
                original_accuracy,
                final_accuracy: outcome.final_accuracy,
                original_weight_count,
                weight_count,
            };
            if let Some(reason) = session.tracker.consider(&candidate) {
                let path =
                    self.layout
                        .checkpoint(&session.stem, rate, weight_count, outcome.final_accuracy);
                self.store
                    .save(&model, &path)
                    .with_context(|| format!("saving checkpoint {path:?}"))?;
                self.log(
                    LogLevel::Info,
                    "checkpoint_saved",
                    json!({
                        "path": path,
                        "reason": reason,
                        "weights": weight_count,
                        "accuracy": outcome.final_accuracy,
                    }),
                );
                session.checkpoints.push(path);
            }

            let record = ExperimentRecord {
                run,
                accuracy: outcome.final_accuracy,
                pruning_perc: rate,
                number_of_weights: weight_count,
                pruning_method: session.strategy.method().name().to_string(),
                time: start.elapsed().as_secs_f64(),
                retrain_change: outcome.retrain_change,
                retrain_epochs: outcome.retrain_epochs,
            };
            self.log(
                LogLevel::Debug,
                "prune_step",
                serde_json::to_value(&record).unwrap_or(Value::Null),
            );
            session.table.push(record);
        }
        Ok(())
    }

    /// Retrains a pruned model from `result/<filename>` for `num_epochs`
    /// epochs, recording test accuracy after each.
    pub fn train_sparse_model(
        &mut self,
        filename: &str,
        save: bool,
        hyper: Hyperparameters,
    ) -> anyhow::Result<ScratchSummary> {
        let source = self.layout.result_model(filename);
        let mut model = self
            .store
            .load(&source)
            .with_context(|| format!("loading pruned model {source:?}"))?;
        let pruned_accuracy = self.engine.test(&self.splits.test, &model)?;
        let mut optimizer = Sgd::new(hyper.learning_rate as f32, hyper.momentum);

        let mut table = MetricsTable::new();
        table.push(EpochRecord {
            epoch: -1,
            test_acc: pruned_accuracy,
        });
        for epoch in 0..hyper.num_epochs {
            self.engine
                .train(&self.splits.train, &mut model, &mut optimizer, self.loss)?;
            let test_acc = self.engine.test(&self.splits.test, &model)?;
            table.push(EpochRecord {
                epoch: i64::try_from(epoch)?,
                test_acc,
            });
            self.log(
                LogLevel::Debug,
                "scratch_epoch",
                json!({ "model": filename, "epoch": epoch, "test_acc": test_acc }),
            );
        }
        let final_accuracy = self.engine.test(&self.splits.test, &model)?;

        let scratch = format!("{filename}-scratch");
        let metrics_path = self.layout.result_table(&scratch);
        metrics::flush(self.sink.as_ref(), &table, &metrics_path)?;
        let saved = if save {
            let path = self.layout.result_model(&scratch);
            self.store.save(&model, &path)?;
            Some(path)
        } else {
            None
        };
        self.log(
            LogLevel::Info,
            "scratch_training_complete",
            json!({ "model": filename, "before": pruned_accuracy, "after": final_accuracy }),
        );
        Ok(ScratchSummary {
            pruned_accuracy,
            final_accuracy,
            epochs: hyper.num_epochs,
            metrics_path,
            saved,
        })
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        telemetry::log(self.telemetry.as_ref(), level, message, metadata);
    }
}
