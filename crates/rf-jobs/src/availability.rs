//! Model availability
//!
//! One record per optional heavy model. Downloads are handled elsewhere;
//! that collaborator reports through `set_state`/`set_progress`/`set_error`
//! and the orchestrator only reads.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_ml::{models, ModelSpec};

use crate::error::EngineResult;
use crate::stage::StageId;

/// Manifest file name inside the model directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Optional heavy models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Separator,
    Denoiser,
    Restorer,
    Upscaler,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [Self::Separator, Self::Denoiser, Self::Restorer, Self::Upscaler];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Separator => "separator",
            Self::Denoiser => "denoiser",
            Self::Restorer => "restorer",
            Self::Upscaler => "upscaler",
        }
    }

    /// Static model description
    pub fn spec(self) -> ModelSpec {
        match self {
            Self::Separator => models::SEPARATOR,
            Self::Denoiser => models::DENOISER,
            Self::Restorer => models::RESTORER,
            Self::Upscaler => models::UPSCALER,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Ready,
    Downloading,
    Pending,
    Error,
}

/// Availability of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAvailabilityRecord {
    pub id: ModelId,
    pub label: String,
    pub engine: String,
    pub state: ModelState,
    /// Download progress (0 - 100), only while downloading
    pub progress: Option<u8>,
    pub size_mb: u32,
    pub error: Option<String>,
}

impl ModelAvailabilityRecord {
    fn pending(id: ModelId) -> Self {
        let spec = id.spec();
        Self {
            id,
            label: spec.label.to_string(),
            engine: spec.engine.to_string(),
            state: ModelState::Pending,
            progress: None,
            size_mb: spec.size_mb,
            error: None,
        }
    }
}

/// What the orchestrator asks before dispatching a stage
pub trait ModelAvailability: Send + Sync {
    /// State of the model behind `stage`. Stages without a model are `Ready`.
    fn status(&self, stage: StageId) -> ModelState;

    fn is_ready(&self, stage: StageId) -> bool {
        self.status(stage) == ModelState::Ready
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    models: BTreeMap<ModelId, ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    state: ModelState,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    error: Option<String>,
}

/// Concurrency-safe model registry
pub struct ModelRegistry {
    model_dir: PathBuf,
    records: RwLock<BTreeMap<ModelId, ModelAvailabilityRecord>>,
}

impl ModelRegistry {
    /// Registry with every model pending
    pub fn new<P: Into<PathBuf>>(model_dir: P) -> Self {
        Self {
            model_dir: model_dir.into(),
            records: RwLock::new(
                ModelId::ALL
                    .into_iter()
                    .map(|id| (id, ModelAvailabilityRecord::pending(id)))
                    .collect(),
            ),
        }
    }

    /// Model directory
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Expected path of a model file
    pub fn model_path(&self, id: ModelId) -> PathBuf {
        self.model_dir.join(id.spec().file_name)
    }

    /// Mark models present on disk ready; ready models whose file vanished
    /// go back to pending. Downloading and failed records are left alone.
    /// Returns the number of ready models.
    pub fn scan(&self) -> usize {
        let mut records = self.records.write();
        for (id, record) in records.iter_mut() {
            let present = self.model_path(*id).is_file();
            match (present, record.state) {
                (true, _) => {
                    record.state = ModelState::Ready;
                    record.progress = None;
                    record.error = None;
                }
                (false, ModelState::Ready) => record.state = ModelState::Pending,
                (false, _) => {}
            }
        }
        let ready = records.values().filter(|r| r.state == ModelState::Ready).count();
        log::info!(
            "Model scan in {}: {}/{} ready",
            self.model_dir.display(),
            ready,
            records.len()
        );
        ready
    }

    /// Restore state from `manifest.json`. Returns false when there is none.
    pub fn load_manifest(&self) -> EngineResult<bool> {
        let path = self.model_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(false);
        }
        let manifest: Manifest = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let mut records = self.records.write();
        for (id, entry) in manifest.models {
            if let Some(record) = records.get_mut(&id) {
                record.state = entry.state;
                record.progress = entry.progress;
                record.error = entry.error;
            }
        }
        log::debug!("Loaded model manifest {}", path.display());
        Ok(true)
    }

    /// Persist state to `manifest.json`
    pub fn save_manifest(&self) -> EngineResult<()> {
        std::fs::create_dir_all(&self.model_dir)?;
        let manifest = Manifest {
            models: self
                .records
                .read()
                .iter()
                .map(|(id, r)| {
                    (
                        *id,
                        ManifestEntry {
                            state: r.state,
                            progress: r.progress,
                            error: r.error.clone(),
                        },
                    )
                })
                .collect(),
        };
        std::fs::write(
            self.model_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(())
    }

    /// Set model state
    pub fn set_state(&self, id: ModelId, state: ModelState) {
        if let Some(record) = self.records.write().get_mut(&id) {
            record.state = state;
            if state != ModelState::Downloading {
                record.progress = None;
            }
            if state != ModelState::Error {
                record.error = None;
            }
        }
        log::info!("Model {} -> {:?}", id, state);
    }

    /// Report download progress (implies downloading)
    pub fn set_progress(&self, id: ModelId, progress: u8) {
        if let Some(record) = self.records.write().get_mut(&id) {
            record.state = ModelState::Downloading;
            record.progress = Some(progress.min(100));
            record.error = None;
        }
    }

    /// Report a failed download
    pub fn set_error(&self, id: ModelId, message: &str) {
        if let Some(record) = self.records.write().get_mut(&id) {
            record.state = ModelState::Error;
            record.progress = None;
            record.error = Some(message.to_string());
        }
        log::error!("Model {} failed: {}", id, message);
    }

    /// Snapshot of one record
    pub fn record(&self, id: ModelId) -> Option<ModelAvailabilityRecord> {
        self.records.read().get(&id).cloned()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<ModelAvailabilityRecord> {
        self.records.read().values().cloned().collect()
    }
}

impl ModelAvailability for ModelRegistry {
    fn status(&self, stage: StageId) -> ModelState {
        match stage.model() {
            None => ModelState::Ready,
            Some(id) => self
                .records
                .read()
                .get(&id)
                .map_or(ModelState::Pending, |r| r.state),
        }
    }
}
