use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use prunelab_pruning::{
    experiment1, experiment2, Hyperparameters, LabConfig, LabTelemetry, PruneMethod,
    PruneRequest, PruningLab, SuiteConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "prn", version, about = "Iterative weight-pruning experiment lab")]
struct Cli {
    /// JSON lab configuration; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the JSON-lines log location.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Records per-step and per-epoch debug events.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Creates the model and result directories.
    Setup,
    /// Trains base models `model0` .. `model{n-1}`.
    Train {
        #[arg(long, default_value_t = 1)]
        models: usize,
        /// Trains a single model under this name instead.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
    },
    /// Prunes one base model with one strategy.
    Prune(PruneArgs),
    /// Retrains a pruned model from the result directory.
    Sparse {
        filename: String,
        #[arg(long)]
        save: bool,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Every magnitude strategy on every base model, then optimal brain damage.
    Experiment1 {
        #[arg(long, default_value_t = 4)]
        models: usize,
        #[arg(long, default_value_t = 25)]
        runs: usize,
    },
    /// Variable against fixed retraining for every strategy.
    Experiment2 {
        #[arg(long, default_value_t = 25)]
        runs: usize,
    },
    /// Lists the available strategies.
    Strategies,
    /// Lists recent invocations from the run ledger.
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

impl Commands {
    const fn label(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Train { .. } => "train",
            Self::Prune(_) => "prune",
            Self::Sparse { .. } => "sparse",
            Self::Experiment1 { .. } => "experiment1",
            Self::Experiment2 { .. } => "experiment2",
            Self::Strategies => "strategies",
            Self::Runs { .. } => "runs",
        }
    }
}

#[derive(Parser, Debug, Clone)]
struct PruneArgs {
    /// Strategy name or alias (random, distributed, uniform, blinded, obd).
    #[arg(long)]
    method: PruneMethod,
    /// Comma-separated rates in percent; defaults to 70,60,50,40,25.
    #[arg(long = "rates", value_delimiter = ',')]
    rates: Vec<f64>,
    #[arg(long, default_value = "model")]
    filename: String,
    #[arg(long, default_value_t = 1)]
    runs: usize,
    /// Stops retraining early on a validation plateau.
    #[arg(long)]
    variable: bool,
    /// Saves checkpoints selected during pruning.
    #[arg(long)]
    save: bool,
    /// Skips retraining between pruning steps.
    #[arg(long)]
    no_retrain: bool,
    #[arg(long)]
    retrain_epochs: Option<usize>,
}

impl PruneArgs {
    fn request(&self) -> PruneRequest {
        let mut request = PruneRequest {
            filename: self.filename.clone(),
            runs: self.runs,
            variable_retraining: self.variable,
            save: self.save,
            retraining: !self.no_retrain,
            ..PruneRequest::new(self.method)
        };
        if !self.rates.is_empty() {
            request.pruning_rates.clone_from(&self.rates);
        }
        request
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct RunLedgerEntry {
    run_id: String,
    command: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
}

impl RunLedgerEntry {
    fn new(command: &str) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            command: command.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: "running".into(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };
    let command = cli.command.clone().unwrap_or(Commands::Experiment2 { runs: 25 });
    let ledger = config.output_root.join("runs.jsonl");

    match command {
        Commands::Strategies => {
            for method in PruneMethod::ALL {
                println!(
                    "{:<28} requires_loss={}",
                    method.name(),
                    method.requires_loss()
                );
            }
            Ok(())
        }
        Commands::Runs { limit } => {
            for entry in read_ledger(&ledger)?.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {}",
                    entry.run_id, entry.command, entry.status, entry.started_at
                );
            }
            Ok(())
        }
        command => {
            let entry = RunLedgerEntry::new(command.label());
            append_ledger(&ledger, &entry)?;
            let outcome = run_lab(&cli, &config, &command);
            let status = if outcome.is_ok() { "completed" } else { "failed" };
            update_status(&ledger, &entry.run_id, status)?;
            outcome
        }
    }
}

fn run_lab(cli: &Cli, config: &LabConfig, command: &Commands) -> Result<()> {
    let telemetry = LabTelemetry::builder("prn")
        .log_path(cli.log.clone().unwrap_or_else(|| config.log_path()))
        .min_level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .echo(cli.verbose)
        .build()?;
    telemetry.log(
        LogLevel::Info,
        "command_started",
        json!({ "command": command.label(), "output_root": config.output_root }),
    )?;

    let mut lab = PruningLab::new(config)?.with_telemetry(telemetry.clone());
    lab.setup()?;
    let hyper = config.hyperparameters;

    match command {
        Commands::Setup => {
            println!("{}", lab.layout().root().display());
        }
        Commands::Train {
            models,
            name,
            epochs,
            learning_rate,
        } => {
            let hyper = Hyperparameters {
                num_epochs: epochs.unwrap_or(hyper.num_epochs),
                learning_rate: learning_rate.unwrap_or(hyper.learning_rate),
                ..hyper
            };
            let outcomes = match name {
                Some(name) => vec![lab.train_network(name, hyper)?],
                None => lab.train_models(*models, hyper)?,
            };
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Commands::Prune(args) => {
            let hyper = args
                .retrain_epochs
                .map_or(hyper, |epochs| hyper.with_retrain_epochs(epochs));
            let summary = lab.prune_network(&args.request(), hyper)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Sparse {
            filename,
            save,
            epochs,
        } => {
            let hyper = Hyperparameters {
                num_epochs: epochs.unwrap_or(hyper.num_epochs),
                ..hyper
            };
            let summary = lab.train_sparse_model(filename, *save, hyper)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Experiment1 { models, runs } => {
            let suite = SuiteConfig {
                models: *models,
                runs: *runs,
            };
            ensure_base_models(&mut lab, (0..suite.models).map(|idx| format!("model{idx}")), hyper)?;
            let summaries = experiment1(&mut lab, suite, hyper)?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Experiment2 { runs } => {
            let suite = SuiteConfig {
                runs: *runs,
                ..SuiteConfig::default()
            };
            ensure_base_models(&mut lab, ["model".to_string()], hyper)?;
            let summaries = experiment2(&mut lab, suite, hyper)?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Strategies | Commands::Runs { .. } => {}
    }

    telemetry.log(
        LogLevel::Info,
        "command_completed",
        json!({ "command": command.label() }),
    )?;
    Ok(())
}

/// Trains any named base model that is not on disk yet.
fn ensure_base_models(
    lab: &mut PruningLab,
    names: impl IntoIterator<Item = String>,
    hyper: Hyperparameters,
) -> Result<()> {
    for name in names {
        if !lab.layout().base_model(&name).exists() {
            lab.train_network(&name, hyper)
                .with_context(|| format!("training base model {name}"))?;
        }
    }
    Ok(())
}

fn append_ledger(path: &Path, entry: &RunLedgerEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening run ledger {path:?}"))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_ledger(path: &Path) -> Result<Vec<RunLedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

fn update_status(path: &Path, run_id: &str, status: &str) -> Result<()> {
    let mut entries = read_ledger(path)?;
    let Some(entry) = entries.iter_mut().find(|entry| entry.run_id == run_id) else {
        return Ok(());
    };
    entry.status = status.to_string();
    entry.finished_at = Some(Utc::now());
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ledger_tracks_status_transitions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let first = RunLedgerEntry::new("prune");
        let second = RunLedgerEntry::new("train");
        append_ledger(&path, &first).unwrap();
        append_ledger(&path, &second).unwrap();
        update_status(&path, &first.run_id, "completed").unwrap();

        let entries = read_ledger(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "completed");
        assert!(entries[0].finished_at.is_some());
        assert_eq!(entries[1].status, "running");
    }

    #[test]
    fn missing_ledger_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_ledger(&dir.path().join("absent.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn prune_arguments_build_a_request() {
        let cli = Cli::try_parse_from([
            "prn", "prune", "--method", "obd", "--rates", "50,25", "--runs", "3", "--save",
            "--no-retrain",
        ])
        .unwrap();
        let Some(Commands::Prune(args)) = cli.command else {
            panic!("expected prune");
        };
        let request = args.request();
        assert_eq!(request.method, PruneMethod::OptimalBrainDamage);
        assert_eq!(request.pruning_rates, vec![50.0, 25.0]);
        assert_eq!(request.runs, 3);
        assert!(request.save && !request.retraining);
        assert_eq!(request.filename, "model");
    }

    #[test]
    fn default_rates_apply_when_none_given() {
        let cli = Cli::try_parse_from(["prn", "prune", "--method", "random"]).unwrap();
        let Some(Commands::Prune(args)) = cli.command else {
            panic!("expected prune");
        };
        assert_eq!(args.request().pruning_rates, vec![70.0, 60.0, 50.0, 40.0, 25.0]);
    }

    #[test]
    fn bare_invocation_has_no_subcommand() {
        let cli = Cli::try_parse_from(["prn"]).unwrap();
        assert!(cli.command.is_none());
    }
}
