//! RF-Jobs: Restoration job engine
//!
//! Takes an audio source and a processing config, runs an ordered list of
//! restoration stages on a background thread and keeps a pollable job
//! record until the result is exported.
//!
//! - Stages: ingest, analysis, separation, denoise, restoration, upscale,
//!   master, export. The processing mode selects which run.
//! - Model-backed stages substitute their classical engine while a model is
//!   not ready. Separation has no substitute and fails the job.
//! - One OS thread per job; status reads never wait on a stage.
//! - Results are stored once and exported on demand to WAV, AIFF, FLAC or MP3.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_jobs::{AudioSource, EngineConfig, ProcessingConfig, RestorationEngine};
//!
//! let engine = RestorationEngine::new(EngineConfig::from_env()?)?;
//! let id = engine.submit(ProcessingConfig::default(), AudioSource::File("take.wav".into()))?;
//! let job = engine.wait(&id, Duration::from_secs(600))?;
//! let flac = engine.export(&id, "flac", Some("24"))?;
//! ```

pub mod artifacts;
pub mod availability;
pub mod config;
mod engine;
pub mod engines;
mod error;
pub mod export;
pub mod orchestrator;
pub mod runner;
pub mod stage;
pub mod store;

pub use artifacts::{ArtifactStore, DiskArtifacts, MemoryArtifacts};
pub use availability::{ModelAvailability, ModelAvailabilityRecord, ModelId, ModelRegistry, ModelState};
pub use config::{EngineConfig, NoiseProfile, ProcessingConfig, ProcessingMode};
pub use engine::RestorationEngine;
pub use error::{EngineError, EngineResult, StageError, StageResult};
pub use export::ExportService;
pub use orchestrator::{Orchestrator, PipelineFailure, PipelineOutput, StageRegistry};
pub use runner::{JobEvent, JobRunner};
pub use stage::{AudioSource, StageContext, StageEngine, StageId, StageMetadata, StageOutput, StageReport, stages_for};
pub use store::{Job, JobError, JobStats, JobStatus, JobStore, ResultRef};

pub use rf_offline::{AudioBuffer, OutputFormat};
