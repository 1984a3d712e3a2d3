//! Engine facade: one object wiring models, stages, jobs and exports

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use rf_offline::OutputFormat;

use crate::artifacts::{ArtifactStore, DiskArtifacts, MemoryArtifacts};
use crate::availability::{ModelAvailabilityRecord, ModelRegistry};
use crate::config::{EngineConfig, ProcessingConfig};
use crate::engines::OnnxModelLoader;
use crate::error::{EngineError, EngineResult};
use crate::export::ExportService;
use crate::orchestrator::{Orchestrator, StageRegistry};
use crate::runner::{JobEvent, JobRunner};
use crate::stage::AudioSource;
use crate::store::{Job, JobStats, JobStore};

pub struct RestorationEngine {
    config: EngineConfig,
    registry: Arc<ModelRegistry>,
    store: Arc<JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    runner: JobRunner,
    exporter: ExportService,
}

impl RestorationEngine {
    /// Engine with the standard stage table. Model state comes from the
    /// manifest (if any) and a scan of the model directory.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let registry = Arc::new(ModelRegistry::new(&config.model_dir));
        if let Err(e) = registry.load_manifest() {
            log::warn!("Ignoring unreadable model manifest: {}", e);
        }
        registry.scan();

        let loader = Arc::new(OnnxModelLoader::new(&config.model_dir, config.segment_seconds));
        Self::with_stages(config, registry, StageRegistry::with_defaults(loader))
    }

    /// Engine with a custom stage table
    pub fn with_stages(
        config: EngineConfig,
        registry: Arc<ModelRegistry>,
        stages: StageRegistry,
    ) -> EngineResult<Self> {
        config.validate()?;
        let artifacts: Arc<dyn ArtifactStore> = match &config.artifact_dir {
            Some(dir) => Arc::new(DiskArtifacts::new(dir)?),
            None => Arc::new(MemoryArtifacts::new()),
        };
        let store = Arc::new(JobStore::new());
        let orchestrator = Orchestrator::new(stages, Arc::clone(&registry) as _);
        let runner = JobRunner::new(
            Arc::clone(&store),
            orchestrator,
            Arc::clone(&artifacts),
            config.job_stack_size,
        );
        let exporter = ExportService::new(Arc::clone(&store), Arc::clone(&artifacts));

        Ok(Self {
            config,
            registry,
            store,
            artifacts,
            runner,
            exporter,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Model availability registry (the download collaborator writes here)
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Start a job
    pub fn submit(&self, config: ProcessingConfig, source: AudioSource) -> EngineResult<String> {
        self.runner.submit(config, source)
    }

    /// Start a job with the engine's default processing config
    pub fn submit_default(&self, source: AudioSource) -> EngineResult<String> {
        self.runner.submit(self.config.defaults.clone(), source)
    }

    /// Job snapshot
    pub fn status(&self, id: &str) -> EngineResult<Job> {
        self.store.get(id).ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Newest jobs first
    pub fn list_jobs(&self, limit: usize) -> Vec<Job> {
        self.store.list(limit)
    }

    /// Remove a terminal job and its stored result
    pub fn remove_job(&self, id: &str) -> EngineResult<Job> {
        let job = self.store.remove(id)?;
        if let Some(result) = &job.result {
            if let Err(e) = self.artifacts.remove(result) {
                log::warn!("Job {}: artifact not removed: {}", id, e);
            }
        }
        log::info!("Job {} removed", id);
        Ok(job)
    }

    pub fn stats(&self) -> JobStats {
        self.store.stats()
    }

    /// Encode a complete job's result. `name` and `quality` follow
    /// [`OutputFormat::parse`].
    pub fn export(&self, id: &str, name: &str, quality: Option<&str>) -> EngineResult<Vec<u8>> {
        let format =
            OutputFormat::parse(name, quality).map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;
        self.exporter.export(id, &format)
    }

    /// Encode a complete job's result in an already parsed format
    pub fn export_format(&self, id: &str, format: &OutputFormat) -> EngineResult<Vec<u8>> {
        self.exporter.export(id, format)
    }

    /// Model availability snapshot
    pub fn models(&self) -> Vec<ModelAvailabilityRecord> {
        self.registry.records()
    }

    /// Block until the job is terminal or the timeout elapses
    pub fn wait(&self, id: &str, timeout: Duration) -> EngineResult<Job> {
        self.runner.wait(id, timeout)
    }

    /// Subscribe to job notifications emitted from now on. Each call is an
    /// independent subscription; drop the receiver to unsubscribe.
    pub fn events(&self) -> Receiver<JobEvent> {
        self.runner.events()
    }
}
