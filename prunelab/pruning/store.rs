use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{error::LabError, network::Network, strategy::PruneMethod};

/// Directory layout for models and results under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of trained base models.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    /// Directory of pruned checkpoints and metric tables.
    #[must_use]
    pub fn result_dir(&self) -> PathBuf {
        self.root.join("result")
    }

    /// Creates the root, model and result directories when absent.
    pub fn setup(&self) -> Result<(), LabError> {
        fs::create_dir_all(self.model_dir())?;
        fs::create_dir_all(self.result_dir())?;
        Ok(())
    }

    /// Location of the base model called `filename`.
    #[must_use]
    pub fn base_model(&self, filename: &str) -> PathBuf {
        self.model_dir().join(format!("{filename}.json"))
    }

    /// Location of a model kept in the result directory.
    #[must_use]
    pub fn result_model(&self, filename: &str) -> PathBuf {
        self.result_dir().join(format!("{filename}.json"))
    }

    /// Location of a metric table in the result directory.
    #[must_use]
    pub fn result_table(&self, stem: &str) -> PathBuf {
        self.result_dir().join(format!("{stem}.metrics.json"))
    }

    /// File stem shared by every artifact of one pruning invocation.
    #[must_use]
    pub fn result_stem(method: PruneMethod, variable_retraining: bool, filename: &str) -> String {
        format!("{}-var={variable_retraining}-{filename}", method.name())
    }

    /// Checkpoint location encoding rate, weight count and accuracy.
    #[must_use]
    pub fn checkpoint(&self, stem: &str, rate: f64, weight_count: usize, accuracy: f64) -> PathBuf {
        self.result_dir().join(format!(
            "{stem}-rate{rate}-weight{weight_count}-per{accuracy}.json"
        ))
    }
}

/// Persistence of opaque model blobs.
pub trait ModelStore {
    /// Reads the model stored at `path`.
    fn load(&self, path: &Path) -> Result<Network, LabError>;

    /// Writes `model` to `path`, replacing any previous blob.
    fn save(&self, model: &Network, path: &Path) -> Result<(), LabError>;
}

/// Stores models as JSON documents on the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelStore;

impl ModelStore for JsonModelStore {
    fn load(&self, path: &Path) -> Result<Network, LabError> {
        if !path.exists() {
            return Err(LabError::MissingArtifact(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let model: Network = serde_json::from_str(&contents)?;
        model.validate()?;
        Ok(model)
    }

    fn save(&self, model: &Network, path: &Path) -> Result<(), LabError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(model)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

/// In-memory store keeping saves in insertion order.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: Mutex<IndexMap<PathBuf, Network>>,
}

impl MemoryModelStore {
    /// Paths saved so far, oldest first.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.models.lock().keys().cloned().collect()
    }

    /// Number of stored models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    /// Returns true when nothing was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self, path: &Path) -> Result<Network, LabError> {
        self.models
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| LabError::MissingArtifact(path.display().to_string()))
    }

    fn save(&self, model: &Network, path: &Path) -> Result<(), LabError> {
        self.models.lock().insert(path.to_path_buf(), model.clone());
        Ok(())
    }
}
