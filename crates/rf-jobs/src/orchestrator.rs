//! Pipeline orchestration
//!
//! Runs the stage list of a processing mode strictly in order. For every
//! stage the engine is resolved from one table plus the current model
//! availability; a stage whose model is not ready runs its classical
//! substitute if it has one and fails the job otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rf_offline::AudioBuffer;

use crate::availability::{ModelAvailability, ModelId, ModelState};
use crate::config::ProcessingConfig;
use crate::engines::{
    AnalysisStage, DeclipStage, FinalizeStage, IngestStage, LoudnessStage, ModelLoader, NeuralStage,
    ResampleStage, SpectralGateStage,
};
use crate::error::{StageError, StageResult};
use crate::stage::{
    AudioSource, StageContext, StageEngine, StageId, StageMetadata, StageReport, stages_for,
};

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Engines registered for one stage
#[derive(Clone, Default)]
pub struct StageEntry {
    /// Model-backed engine
    pub neural: Option<Arc<dyn StageEngine>>,
    /// Classical engine: the only engine of model-free stages, the
    /// substitute for model-backed ones
    pub classic: Option<Arc<dyn StageEngine>>,
}

/// The one table mapping stages to engines
#[derive(Clone, Default)]
pub struct StageRegistry {
    entries: BTreeMap<StageId, StageEntry>,
}

impl StageRegistry {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard engine table, neural engines loaded through `loader`
    pub fn with_defaults(loader: Arc<dyn ModelLoader>) -> Self {
        let mut registry = Self::new();
        registry
            .set_classic(StageId::Ingest, Arc::new(IngestStage))
            .set_classic(StageId::Analysis, Arc::new(AnalysisStage))
            .set_classic(StageId::Denoise, Arc::new(SpectralGateStage))
            .set_classic(StageId::Restoration, Arc::new(DeclipStage))
            .set_classic(StageId::Upscale, Arc::new(ResampleStage))
            .set_classic(StageId::Master, Arc::new(LoudnessStage))
            .set_classic(StageId::Export, Arc::new(FinalizeStage));
        for id in ModelId::ALL {
            let stage = match id {
                ModelId::Separator => StageId::Separation,
                ModelId::Denoiser => StageId::Denoise,
                ModelId::Restorer => StageId::Restoration,
                ModelId::Upscaler => StageId::Upscale,
            };
            registry.set_neural(stage, Arc::new(NeuralStage::new(id, Arc::clone(&loader))));
        }
        registry
    }

    /// Register (or replace) the model-backed engine of a stage
    pub fn set_neural(&mut self, stage: StageId, engine: Arc<dyn StageEngine>) -> &mut Self {
        self.entries.entry(stage).or_default().neural = Some(engine);
        self
    }

    /// Register (or replace) the classical engine of a stage
    pub fn set_classic(&mut self, stage: StageId, engine: Arc<dyn StageEngine>) -> &mut Self {
        self.entries.entry(stage).or_default().classic = Some(engine);
        self
    }

    /// Engines of a stage
    pub fn entry(&self, stage: StageId) -> Option<&StageEntry> {
        self.entries.get(&stage)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Successful pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub audio: AudioBuffer,
    pub reports: Vec<StageReport>,
}

/// Aborted pipeline run: the failing stage and every report up to it
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub stage: StageId,
    pub error: StageError,
    pub reports: Vec<StageReport>,
}

/// Aggregate progress: `(completed * 100 + current) / total`
pub fn overall_progress(completed: usize, current: u8, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100 + current.min(100) as usize) / total).min(100) as u8
}

/// Sequential stage runner
pub struct Orchestrator {
    stages: StageRegistry,
    availability: Arc<dyn ModelAvailability>,
}

impl Orchestrator {
    pub fn new(stages: StageRegistry, availability: Arc<dyn ModelAvailability>) -> Self {
        Self { stages, availability }
    }

    /// Engine for `stage` under `config`, and whether it is a substitute
    pub fn select(
        &self,
        stage: StageId,
        config: &ProcessingConfig,
    ) -> StageResult<(Arc<dyn StageEngine>, bool)> {
        let entry = self.stages.entry(stage);
        let neural = entry.and_then(|e| e.neural.clone());
        let classic = entry.and_then(|e| e.classic.clone());

        let Some(model) = stage.requested_model(config) else {
            return classic.or(neural).map(|engine| (engine, false)).ok_or_else(|| {
                StageError::Computation(format!("no engine registered for stage {}", stage))
            });
        };

        let state = self.availability.status(stage);
        match (neural, classic) {
            (Some(engine), _) if state == ModelState::Ready => Ok((engine, false)),
            (_, Some(engine)) => {
                log::warn!(
                    "{} model is {:?}, stage {} falls back to {}",
                    model,
                    state,
                    stage,
                    engine.name()
                );
                Ok((engine, true))
            }
            (_, None) => Err(StageError::MissingDependency { stage, model }),
        }
    }

    /// Run every stage of `config.mode` in order.
    ///
    /// `progress` receives `(stage, stage_progress, overall)`; both values
    /// are non-decreasing within a run.
    pub fn run(
        &self,
        job_id: &str,
        config: &ProcessingConfig,
        source: &AudioSource,
        progress: &mut dyn FnMut(StageId, u8, u8),
    ) -> Result<PipelineOutput, PipelineFailure> {
        let stages = stages_for(config.mode);
        let total = stages.len();
        let mut audio = AudioBuffer::default();
        let mut reports: Vec<StageReport> = Vec::with_capacity(total);

        for (index, &stage) in stages.iter().enumerate() {
            let started = Instant::now();
            progress(stage, 0, overall_progress(index, 0, total));

            let (engine, fallback) = match self.select(stage, config) {
                Ok(selected) => selected,
                Err(error) => {
                    log::error!("[{}] {} unavailable: {}", job_id, stage, error);
                    reports.push(StageReport {
                        stage,
                        engine: String::new(),
                        fallback: false,
                        elapsed_ms: 0,
                        success: false,
                        metadata: StageMetadata::default(),
                    });
                    return Err(PipelineFailure { stage, error, reports });
                }
            };

            log::debug!("[{}] {} -> {}{}", job_id, stage, engine.name(), if fallback { " (fallback)" } else { "" });
            let ctx = StageContext {
                job_id,
                stage,
                config,
                source,
            };
            let mut last = 0u8;
            let result = engine.run(std::mem::take(&mut audio), &ctx, &mut |p| {
                let p = p.min(100);
                if p > last {
                    last = p;
                    progress(stage, p, overall_progress(index, p, total));
                }
            });
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    progress(stage, 100, overall_progress(index + 1, 0, total));
                    reports.push(StageReport {
                        stage,
                        engine: engine.name().to_string(),
                        fallback,
                        elapsed_ms,
                        success: true,
                        metadata: output.metadata,
                    });
                    audio = output.audio;
                }
                Err(error) => {
                    log::error!("[{}] {} failed in {}: {}", job_id, stage, engine.name(), error);
                    reports.push(StageReport {
                        stage,
                        engine: engine.name().to_string(),
                        fallback,
                        elapsed_ms,
                        success: false,
                        metadata: StageMetadata::default(),
                    });
                    return Err(PipelineFailure { stage, error, reports });
                }
            }
        }

        Ok(PipelineOutput { audio, reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::{ModelRegistry, ModelState};
    use crate::config::ProcessingMode;
    use crate::engines::test_support::noisy_tone;
    use crate::stage::StageOutput;
    use parking_lot::Mutex;

    /// Everything ready, or nothing
    struct Fixed(ModelState);

    impl ModelAvailability for Fixed {
        fn status(&self, stage: StageId) -> ModelState {
            if stage.model().is_some() { self.0 } else { ModelState::Ready }
        }
    }

    /// Passes audio through and records the stage it ran for
    struct Echo {
        name: &'static str,
        log: Arc<Mutex<Vec<(StageId, &'static str)>>>,
    }

    impl StageEngine for Echo {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(
            &self,
            input: AudioBuffer,
            ctx: &StageContext<'_>,
            progress: &mut dyn FnMut(u8),
        ) -> StageResult<StageOutput> {
            self.log.lock().push((ctx.stage, self.name));
            progress(50);
            progress(30);
            progress(200);
            let audio = match (ctx.stage, ctx.source) {
                (StageId::Ingest, AudioSource::Buffer(b)) => b.clone(),
                _ => input,
            };
            Ok(StageOutput::new(audio))
        }
    }

    struct Failing;

    impl StageEngine for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run(&self, _: AudioBuffer, _: &StageContext<'_>, _: &mut dyn FnMut(u8)) -> StageResult<StageOutput> {
            Err(StageError::Computation("boom".into()))
        }
    }

    /// Marks the denoiser ready while it runs
    struct Unlock {
        registry: Arc<ModelRegistry>,
    }

    impl StageEngine for Unlock {
        fn name(&self) -> &'static str {
            "unlock"
        }

        fn run(&self, input: AudioBuffer, _: &StageContext<'_>, progress: &mut dyn FnMut(u8)) -> StageResult<StageOutput> {
            self.registry.set_state(ModelId::Denoiser, ModelState::Ready);
            progress(100);
            Ok(StageOutput::new(input))
        }
    }

    fn echo_registry(log: &Arc<Mutex<Vec<(StageId, &'static str)>>>) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for stage in StageId::ALL {
            registry.set_neural(stage, Arc::new(Echo { name: "neural", log: Arc::clone(log) }));
            if stage != StageId::Separation {
                registry.set_classic(stage, Arc::new(Echo { name: "classic", log: Arc::clone(log) }));
            }
        }
        registry
    }

    fn source() -> AudioSource {
        AudioSource::Buffer(noisy_tone(1, 8000, 0.1))
    }

    #[test]
    fn test_overall_progress() {
        assert_eq!(overall_progress(0, 0, 5), 0);
        assert_eq!(overall_progress(0, 50, 5), 10);
        assert_eq!(overall_progress(2, 50, 5), 50);
        assert_eq!(overall_progress(5, 0, 5), 100);
        assert_eq!(overall_progress(0, 0, 0), 100);
    }

    #[test]
    fn test_ready_models_use_neural_engines() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(echo_registry(&log), Arc::new(Fixed(ModelState::Ready)));
        let mut overall = Vec::new();
        let output = orchestrator
            .run("job", &ProcessingConfig::default(), &source(), &mut |_, _, o| overall.push(o))
            .unwrap();

        let engines: Vec<_> = output.reports.iter().map(|r| (r.stage, r.engine.as_str(), r.fallback)).collect();
        assert_eq!(
            engines,
            vec![
                (StageId::Ingest, "classic", false),
                (StageId::Analysis, "classic", false),
                (StageId::Denoise, "neural", false),
                (StageId::Upscale, "neural", false),
                (StageId::Export, "classic", false),
            ]
        );
        assert!(overall.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(overall.last(), Some(&100));
        assert_eq!(output.audio.frames(), 800);
    }

    #[test]
    fn test_pending_models_fall_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(echo_registry(&log), Arc::new(Fixed(ModelState::Pending)));
        let output = orchestrator
            .run("job", &ProcessingConfig::default(), &source(), &mut |_, _, _| {})
            .unwrap();
        let denoise = output.reports.iter().find(|r| r.stage == StageId::Denoise).unwrap();
        assert_eq!(denoise.engine, "classic");
        assert!(denoise.fallback);
        assert!(output.reports.iter().all(|r| r.success));
    }

    #[test]
    fn test_quick_mode_is_not_a_fallback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(echo_registry(&log), Arc::new(Fixed(ModelState::Ready)));
        let config = ProcessingConfig::default().mode(ProcessingMode::Quick).upscale_factor(1);
        let output = orchestrator.run("job", &config, &source(), &mut |_, _, _| {}).unwrap();
        for report in &output.reports {
            assert_eq!(report.engine, "classic");
            assert!(!report.fallback);
        }
    }

    #[test]
    fn test_missing_separator_fails_at_separation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(echo_registry(&log), Arc::new(Fixed(ModelState::Pending)));
        let config = ProcessingConfig::default().mode(ProcessingMode::Extreme);
        let failure = orchestrator.run("job", &config, &source(), &mut |_, _, _| {}).unwrap_err();

        assert_eq!(failure.stage, StageId::Separation);
        assert_eq!(
            failure.error,
            StageError::MissingDependency { stage: StageId::Separation, model: ModelId::Separator }
        );
        assert_eq!(failure.reports.len(), 3);
        assert!(!failure.reports[2].success);
        // Nothing ran after the failing stage
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_stage_error_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = echo_registry(&log);
        registry.set_classic(StageId::Analysis, Arc::new(Failing));
        let orchestrator = Orchestrator::new(registry, Arc::new(Fixed(ModelState::Ready)));
        let failure = orchestrator
            .run("job", &ProcessingConfig::default(), &source(), &mut |_, _, _| {})
            .unwrap_err();
        assert_eq!(failure.stage, StageId::Analysis);
        assert_eq!(failure.error, StageError::Computation("boom".into()));
        assert_eq!(failure.reports.last().map(|r| r.engine.as_str()), Some("failing"));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_stage_progress_clamped_and_monotonic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(echo_registry(&log), Arc::new(Fixed(ModelState::Ready)));
        let mut seen = Vec::new();
        orchestrator
            .run("job", &ProcessingConfig::default(), &source(), &mut |stage, p, _| {
                if stage == StageId::Analysis {
                    seen.push(p)
                }
            })
            .unwrap();
        assert_eq!(seen, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_availability_checked_per_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let models = Arc::new(ModelRegistry::new("/nonexistent"));
        models.set_progress(ModelId::Upscaler, 60);

        let mut registry = echo_registry(&log);
        registry.set_classic(StageId::Analysis, Arc::new(Unlock { registry: Arc::clone(&models) }));
        let orchestrator = Orchestrator::new(registry, models.clone());
        assert!(!models.is_ready(StageId::Denoise));

        let output = orchestrator
            .run("job", &ProcessingConfig::default(), &source(), &mut |_, _, _| {})
            .unwrap();
        let engines: Vec<_> = output.reports.iter().map(|r| (r.stage, r.engine.as_str(), r.fallback)).collect();
        assert_eq!(
            engines,
            vec![
                (StageId::Ingest, "classic", false),
                (StageId::Analysis, "unlock", false),
                (StageId::Denoise, "neural", false),
                // Still downloading
                (StageId::Upscale, "classic", true),
                (StageId::Export, "classic", false),
            ]
        );
    }
}
