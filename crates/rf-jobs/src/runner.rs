//! Job runner
//!
//! Every submitted job gets its own named OS thread. The thread owns the
//! job record for its lifetime: it marks the job processing, runs the
//! orchestrator, stores the artifact and writes exactly one terminal state.
//! Panics escaping the pipeline or the result write are caught and recorded
//! as internal errors.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::artifacts::ArtifactStore;
use crate::config::ProcessingConfig;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{Orchestrator, PipelineFailure, PipelineOutput};
use crate::stage::{AudioSource, StageId, StageReport};
use crate::store::{Job, JobError, JobStatus, JobStore};

/// Capacity of each subscriber channel; events beyond it are dropped
const EVENT_CAPACITY: usize = 1024;

/// Poll interval of [`JobRunner::wait`]
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Job notifications
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { id: String, stage: StageId, progress: u8 },
    Completed { id: String },
    Failed { id: String, message: String },
}

struct Shared {
    store: Arc<JobStore>,
    orchestrator: Orchestrator,
    artifacts: Arc<dyn ArtifactStore>,
    subscribers: Mutex<Vec<Sender<JobEvent>>>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl Shared {
    /// Fan out to live subscribers; dropped receivers are pruned
    fn emit(&self, event: JobEvent) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::trace!("Job event subscriber full, dropping event");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Record a terminal failure
    fn fail(&self, id: &str, error: JobError, reports: Vec<StageReport>) {
        let message = error.message.clone();
        match self.store.set_error(id, error, reports) {
            Ok(()) => self.emit(JobEvent::Failed {
                id: id.to_string(),
                message,
            }),
            Err(e) => log::error!("Job {}: could not record failure: {}", id, e),
        }
    }

    /// Record a caught panic against the stage the job was in
    fn fail_panic(&self, id: &str, panic: &(dyn Any + Send)) {
        let detail = panic_message(panic);
        log::error!("Job {} panicked: {}", id, detail);
        let stage = self.store.get(id).and_then(|job| job.current_stage);
        self.fail(id, JobError::new(format!("internal error: {}", detail), stage), Vec::new());
    }

    /// Store the artifact and complete the job
    fn finish(&self, id: &str, output: PipelineOutput, started: Instant) {
        let PipelineOutput { audio, reports } = output;
        let result = match self.artifacts.put(id, &audio) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Job {}: storing result failed: {}", id, e);
                self.fail(id, JobError::new(e.to_string(), Some(StageId::Export)), reports);
                return;
            }
        };

        let stored = result.clone();
        match self.store.set_result(id, result, reports.clone()) {
            Ok(()) => {
                log::info!(
                    "Job {} complete in {:.1} s",
                    id,
                    started.elapsed().as_secs_f64()
                );
                self.emit(JobEvent::Completed { id: id.to_string() });
            }
            Err(e) => {
                log::error!("Job {}: recording result failed: {}", id, e);
                if let Err(e) = self.artifacts.remove(&stored) {
                    log::warn!("Job {}: orphaned artifact {}: {}", id, stored.artifact_id, e);
                }
                self.fail(id, JobError::new(e.to_string(), Some(StageId::Export)), reports);
            }
        }
    }

    /// Body of a job thread
    fn execute(&self, id: &str, config: &ProcessingConfig, source: &AudioSource) {
        if let Err(e) = self.store.transition(id, JobStatus::Processing) {
            log::error!("Job {} not started: {}", id, e);
            return;
        }
        let started = Instant::now();
        log::info!("Job {} processing ({})", id, config.mode);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.orchestrator.run(id, config, source, &mut |stage, stage_progress, overall| {
                if self.store.update_progress(id, stage, stage_progress, overall).is_ok() {
                    self.emit(JobEvent::Progress {
                        id: id.to_string(),
                        stage,
                        progress: overall,
                    });
                }
            })
        }));

        match outcome {
            Ok(Ok(output)) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.finish(id, output, started))) {
                    self.fail_panic(id, panic.as_ref());
                }
            }
            Ok(Err(PipelineFailure { stage, error, reports })) => {
                log::error!("Job {} failed at {}: {}", id, stage, error);
                self.fail(id, JobError::new(error.to_string(), Some(stage)), reports);
            }
            Err(panic) => self.fail_panic(id, panic.as_ref()),
        }
    }
}

/// Spawns and tracks job threads
pub struct JobRunner {
    shared: Arc<Shared>,
    stack_size: usize,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: Orchestrator,
        artifacts: Arc<dyn ArtifactStore>,
        stack_size: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                orchestrator,
                artifacts,
                subscribers: Mutex::new(Vec::new()),
            }),
            stack_size,
        }
    }

    /// Validate, register and start a job. Returns the job id.
    ///
    /// A job whose thread cannot be spawned is still registered and goes
    /// straight to `error`.
    pub fn submit(&self, config: ProcessingConfig, source: AudioSource) -> EngineResult<String> {
        config.validate()?;
        let job = self.shared.store.create(config, source.describe());
        let id = job.id.clone();

        let shared = Arc::clone(&self.shared);
        let thread_id = id.clone();
        let config = job.config;
        let spawned = std::thread::Builder::new()
            .name(format!("rf-job-{}", &id[..8]))
            .stack_size(self.stack_size)
            .spawn(move || shared.execute(&thread_id, &config, &source));

        if let Err(e) = spawned {
            let error = EngineError::Spawn(e.to_string());
            log::error!("Job {}: {}", id, error);
            self.shared.fail(&id, JobError::new(error.to_string(), None), Vec::new());
        }
        Ok(id)
    }

    /// New subscription to the events of all jobs of this runner.
    ///
    /// Each receiver only sees events emitted after it was created. A
    /// receiver that falls more than 1024 events behind misses the
    /// overflow; dropping it unsubscribes.
    pub fn events(&self) -> Receiver<JobEvent> {
        self.shared.subscribe()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.shared.store
    }

    /// Block until the job is terminal or `timeout` elapses; returns the
    /// last snapshot either way
    pub fn wait(&self, id: &str, timeout: Duration) -> EngineResult<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self
                .shared
                .store
                .get(id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            if job.status.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            std::thread::sleep(WAIT_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifacts;
    use crate::availability::{ModelAvailability, ModelState};
    use crate::engines::test_support::noisy_tone;
    use crate::error::StageResult;
    use crate::orchestrator::StageRegistry;
    use crate::stage::{StageContext, StageEngine, StageOutput};
    use crate::store::ResultRef;
    use rf_offline::AudioBuffer;

    struct NothingReady;

    impl ModelAvailability for NothingReady {
        fn status(&self, stage: StageId) -> ModelState {
            if stage.model().is_some() { ModelState::Pending } else { ModelState::Ready }
        }
    }

    struct Passthrough;

    impl StageEngine for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        fn run(&self, input: AudioBuffer, ctx: &StageContext<'_>, progress: &mut dyn FnMut(u8)) -> StageResult<StageOutput> {
            progress(100);
            match ctx.source {
                AudioSource::Buffer(b) if ctx.stage == StageId::Ingest => Ok(StageOutput::new(b.clone())),
                _ => Ok(StageOutput::new(input)),
            }
        }
    }

    struct Panicking;

    impl StageEngine for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn run(&self, _: AudioBuffer, _: &StageContext<'_>, _: &mut dyn FnMut(u8)) -> StageResult<StageOutput> {
            panic!("stage exploded")
        }
    }

    /// Refuses every write
    struct FullDisk;

    impl ArtifactStore for FullDisk {
        fn put(&self, _: &str, _: &AudioBuffer) -> EngineResult<ResultRef> {
            Err(EngineError::Artifact("disk full".into()))
        }

        fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>> {
            Err(EngineError::Artifact(format!("no artifact {}", result.artifact_id)))
        }

        fn remove(&self, _: &ResultRef) -> EngineResult<()> {
            Ok(())
        }
    }

    struct ExplodingDisk;

    impl ArtifactStore for ExplodingDisk {
        fn put(&self, _: &str, _: &AudioBuffer) -> EngineResult<ResultRef> {
            panic!("disk exploded")
        }

        fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>> {
            Err(EngineError::Artifact(format!("no artifact {}", result.artifact_id)))
        }

        fn remove(&self, _: &ResultRef) -> EngineResult<()> {
            Ok(())
        }
    }

    /// Stores the artifact, then fails the job behind the runner's back
    struct RacingDisk {
        inner: MemoryArtifacts,
        store: Arc<JobStore>,
    }

    impl ArtifactStore for RacingDisk {
        fn put(&self, id: &str, audio: &AudioBuffer) -> EngineResult<ResultRef> {
            let result = self.inner.put(id, audio)?;
            self.store.set_error(id, JobError::new("removed elsewhere", None), Vec::new())?;
            Ok(result)
        }

        fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>> {
            self.inner.load(result)
        }

        fn remove(&self, result: &ResultRef) -> EngineResult<()> {
            self.inner.remove(result)
        }
    }

    fn runner_with(
        store: Arc<JobStore>,
        analysis: Arc<dyn StageEngine>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> JobRunner {
        let mut stages = StageRegistry::new();
        for stage in StageId::ALL {
            stages.set_classic(stage, Arc::new(Passthrough));
        }
        stages.set_classic(StageId::Analysis, analysis);
        JobRunner::new(store, Orchestrator::new(stages, Arc::new(NothingReady)), artifacts, 1 << 20)
    }

    fn runner(analysis: Arc<dyn StageEngine>) -> JobRunner {
        runner_with(Arc::new(JobStore::new()), analysis, Arc::new(MemoryArtifacts::new()))
    }

    fn source() -> AudioSource {
        AudioSource::Buffer(noisy_tone(2, 48000, 0.05))
    }

    #[test]
    fn test_job_completes_with_events() {
        let runner = runner(Arc::new(Passthrough));
        let events = runner.events();
        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        let job = runner.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        assert_eq!(job.reports.len(), 5);
        assert!(job.reports.iter().filter(|r| r.stage == StageId::Denoise).all(|r| r.fallback));
        assert_eq!(job.result.as_ref().map(|r| r.frames), Some(2400));

        let mut received = Vec::new();
        while let Ok(event) = events.recv_timeout(Duration::from_secs(10)) {
            let done = event == JobEvent::Completed { id: id.clone() };
            received.push(event);
            if done {
                break;
            }
        }
        assert_eq!(received.last(), Some(&JobEvent::Completed { id: id.clone() }));
        assert!(received.iter().any(|e| matches!(e, JobEvent::Progress { .. })));
    }

    #[test]
    fn test_panic_recorded_as_internal_error() {
        let runner = runner(Arc::new(Panicking));
        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        let job = runner.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(job.status, JobStatus::Error);
        let error = job.error.unwrap();
        assert_eq!(error.message, "internal error: stage exploded");
        assert_eq!(error.stage, Some(StageId::Analysis));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_invalid_config_creates_no_job() {
        let runner = runner(Arc::new(Passthrough));
        let result = runner.submit(ProcessingConfig::default().upscale_factor(3), source());
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
        assert!(runner.store().is_empty());
    }

    #[test]
    fn test_wait_unknown_job() {
        let runner = runner(Arc::new(Passthrough));
        assert!(matches!(runner.wait("nope", Duration::ZERO), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_panic_while_storing_result_is_terminal() {
        let runner = runner_with(Arc::new(JobStore::new()), Arc::new(Passthrough), Arc::new(ExplodingDisk));
        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        let job = runner.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().message, "internal error: disk exploded");
        assert!(job.result.is_none());
    }

    #[test]
    fn test_store_failure_keeps_stage_reports() {
        let runner = runner_with(Arc::new(JobStore::new()), Arc::new(Passthrough), Arc::new(FullDisk));
        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        let job = runner.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(job.status, JobStatus::Error);
        let error = job.error.unwrap();
        assert_eq!(error.stage, Some(StageId::Export));
        assert!(error.message.contains("disk full"));
        assert_eq!(job.reports.len(), 5);
        assert!(job.reports.iter().all(|r| r.success));
    }

    #[test]
    fn test_unrecorded_result_drops_artifact() {
        let store = Arc::new(JobStore::new());
        let artifacts = Arc::new(RacingDisk {
            inner: MemoryArtifacts::new(),
            store: Arc::clone(&store),
        });
        let runner = runner_with(store, Arc::new(Passthrough), artifacts.clone());
        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        let job = runner.wait(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.result.is_none());
        // Give the job thread time to finish its cleanup after the status flip
        let deadline = Instant::now() + Duration::from_secs(10);
        while !artifacts.inner.is_empty() && Instant::now() < deadline {
            std::thread::sleep(WAIT_POLL);
        }
        assert!(artifacts.inner.is_empty());
    }

    #[test]
    fn test_subscribers_are_independent() {
        let runner = runner(Arc::new(Passthrough));
        let first = runner.events();
        let second = runner.events();
        let dropped = runner.events();
        drop(dropped);

        let id = runner.submit(ProcessingConfig::default(), source()).unwrap();
        runner.wait(&id, Duration::from_secs(10)).unwrap();

        for events in [&first, &second] {
            let mut completed = false;
            while let Ok(event) = events.recv_timeout(Duration::from_secs(10)) {
                if event == (JobEvent::Completed { id: id.clone() }) {
                    completed = true;
                    break;
                }
            }
            assert!(completed);
        }

        // Late subscribers see nothing from finished jobs
        let late = runner.events();
        assert!(late.try_recv().is_err());
        assert_eq!(runner.shared.subscribers.lock().len(), 3);
    }
}
