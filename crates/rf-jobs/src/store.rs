//! Job store
//!
//! One slot per job behind its own lock. The outer map lock is held only
//! to find or insert a slot, slot locks only for field assignments, so a
//! status read never waits on a running stage.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ProcessingConfig;
use crate::error::{EngineError, EngineResult};
use crate::stage::{StageId, StageReport, stages_for};

// ═══════════════════════════════════════════════════════════════════════════════
// JOB RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Complete or error
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

/// Terminal failure of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    /// Failing stage, when the failure happened inside the pipeline
    pub stage: Option<StageId>,
}

impl JobError {
    pub fn new<S: Into<String>>(message: S, stage: Option<StageId>) -> Self {
        Self {
            message: message.into(),
            stage,
        }
    }
}

/// Reference to the stored result of a complete job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRef {
    pub artifact_id: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    /// Set for on-disk artifacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Human description of the input
    pub source: String,
    pub config: ProcessingConfig,
    pub status: JobStatus,
    pub current_stage: Option<StageId>,
    /// Aggregate progress (0 - 100)
    pub progress: u8,
    pub stages: BTreeMap<StageId, StageProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<JobError>,
    pub result: Option<ResultRef>,
    pub reports: Vec<StageReport>,
}

impl Job {
    fn new(source: String, config: ProcessingConfig) -> Self {
        let now = Utc::now();
        let stages = stages_for(config.mode)
            .iter()
            .map(|&stage| (stage, StageProgress { progress: 0, updated_at: now }))
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            config,
            status: JobStatus::Queued,
            current_stage: None,
            progress: 0,
            stages,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error: None,
            result: None,
            reports: Vec::new(),
        }
    }

    fn invalid(&self, to: JobStatus) -> EngineError {
        EngineError::InvalidTransition {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub complete: usize,
    pub error: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

struct Slot {
    seq: u64,
    job: RwLock<Job>,
}

/// Concurrency-safe job registry
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<Slot>>>,
    next_seq: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> EngineResult<Arc<Slot>> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Register a queued job, returns its snapshot
    pub fn create(&self, config: ProcessingConfig, source: String) -> Job {
        let job = Job::new(source, config);
        let snapshot = job.clone();
        let slot = Arc::new(Slot {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            job: RwLock::new(job),
        });
        self.jobs.write().insert(snapshot.id.clone(), slot);
        log::info!("Job {} queued ({})", snapshot.id, snapshot.config.mode);
        snapshot
    }

    /// Snapshot of a job
    pub fn get(&self, id: &str) -> Option<Job> {
        let slot = self.jobs.read().get(id).cloned()?;
        let job = slot.job.read().clone();
        Some(job)
    }

    /// Non-terminal status change. Only `queued -> processing` goes through
    /// here; terminal states are entered with [`set_result`](Self::set_result)
    /// and [`set_error`](Self::set_error).
    pub fn transition(&self, id: &str, to: JobStatus) -> EngineResult<()> {
        let slot = self.slot(id)?;
        let mut job = slot.job.write();
        match (job.status, to) {
            (JobStatus::Queued, JobStatus::Processing) => {
                let now = Utc::now();
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.updated_at = now;
                Ok(())
            }
            _ => Err(job.invalid(to)),
        }
    }

    /// Record progress of a processing job. Values never go backwards.
    pub fn update_progress(&self, id: &str, stage: StageId, stage_progress: u8, overall: u8) -> EngineResult<()> {
        let slot = self.slot(id)?;
        let mut job = slot.job.write();
        if job.status != JobStatus::Processing {
            return Err(EngineError::NotReady {
                id: id.to_string(),
                status: job.status,
            });
        }
        let now = Utc::now();
        job.current_stage = Some(stage);
        job.progress = job.progress.max(overall.min(100));
        let entry = job.stages.entry(stage).or_insert(StageProgress {
            progress: 0,
            updated_at: now,
        });
        entry.progress = entry.progress.max(stage_progress.min(100));
        entry.updated_at = now;
        job.updated_at = now;
        Ok(())
    }

    /// `processing -> complete`
    pub fn set_result(&self, id: &str, result: ResultRef, reports: Vec<StageReport>) -> EngineResult<()> {
        let slot = self.slot(id)?;
        let mut job = slot.job.write();
        if job.status != JobStatus::Processing {
            return Err(job.invalid(JobStatus::Complete));
        }
        let now = Utc::now();
        job.status = JobStatus::Complete;
        job.progress = 100;
        for stage in job.stages.values_mut() {
            stage.progress = 100;
            stage.updated_at = now;
        }
        job.current_stage = None;
        job.result = Some(result);
        job.reports = reports;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    /// `queued | processing -> error`
    pub fn set_error(&self, id: &str, error: JobError, reports: Vec<StageReport>) -> EngineResult<()> {
        let slot = self.slot(id)?;
        let mut job = slot.job.write();
        if job.status.is_terminal() {
            return Err(job.invalid(JobStatus::Error));
        }
        let now = Utc::now();
        job.status = JobStatus::Error;
        if error.stage.is_some() {
            job.current_stage = error.stage;
        }
        job.error = Some(error);
        job.reports = reports;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    /// Newest first, at most `limit`
    pub fn list(&self, limit: usize) -> Vec<Job> {
        let mut slots: Vec<Arc<Slot>> = self.jobs.read().values().cloned().collect();
        slots.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
        slots
            .into_iter()
            .take(limit)
            .map(|slot| slot.job.read().clone())
            .collect()
    }

    /// Drop a job record. Jobs still queued or running cannot be removed.
    pub fn remove(&self, id: &str) -> EngineResult<Job> {
        let mut jobs = self.jobs.write();
        let status = jobs
            .get(id)
            .map(|slot| slot.job.read().status)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if !status.is_terminal() {
            return Err(EngineError::NotReady {
                id: id.to_string(),
                status,
            });
        }
        let slot = jobs.remove(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let job = slot.job.read().clone();
        Ok(job)
    }

    /// Counts by status
    pub fn stats(&self) -> JobStats {
        let slots: Vec<Arc<Slot>> = self.jobs.read().values().cloned().collect();
        let mut stats = JobStats {
            total: slots.len(),
            ..Default::default()
        };
        for slot in slots {
            match slot.job.read().status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Complete => stats.complete += 1,
                JobStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;

    fn result() -> ResultRef {
        ResultRef {
            artifact_id: "a".into(),
            sample_rate: 48000,
            channels: 2,
            frames: 10,
            path: None,
        }
    }

    #[test]
    fn test_create_queued() {
        let store = JobStore::new();
        let job = store.create(ProcessingConfig::default(), "take.wav".into());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.stages.len(), 5);
        assert!(job.result.is_none() && job.error.is_none());
        assert_eq!(store.get(&job.id), Some(job));
        assert!(store.get("missing").is_none());

        let extreme = store.create(ProcessingConfig::default().mode(ProcessingMode::Extreme), "x".into());
        assert_eq!(extreme.stages.len(), 8);
    }

    #[test]
    fn test_lifecycle() {
        let store = JobStore::new();
        let id = store.create(ProcessingConfig::default(), "take.wav".into()).id;

        // Progress before start is refused
        assert!(store.update_progress(&id, StageId::Ingest, 10, 2).is_err());
        store.transition(&id, JobStatus::Processing).unwrap();

        store.update_progress(&id, StageId::Denoise, 60, 52).unwrap();
        store.update_progress(&id, StageId::Denoise, 40, 48).unwrap();
        let job = store.get(&id).unwrap();
        assert_eq!(job.progress, 52);
        assert_eq!(job.stages[&StageId::Denoise].progress, 60);
        assert_eq!(job.current_stage, Some(StageId::Denoise));

        store.set_result(&id, result(), Vec::new()).unwrap();
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        assert!(job.stages.values().all(|s| s.progress == 100));
        assert!(job.completed_at.is_some());

        // Terminal records are frozen
        assert!(store.set_error(&id, JobError::new("late", None), Vec::new()).is_err());
        assert!(store.update_progress(&id, StageId::Export, 100, 100).is_err());
        assert!(store.transition(&id, JobStatus::Processing).is_err());
    }

    #[test]
    fn test_illegal_transitions() {
        let store = JobStore::new();
        let id = store.create(ProcessingConfig::default(), "x".into()).id;
        assert!(matches!(
            store.transition(&id, JobStatus::Complete),
            Err(EngineError::InvalidTransition { from: JobStatus::Queued, to: JobStatus::Complete, .. })
        ));
        assert!(store.set_result(&id, result(), Vec::new()).is_err());
        assert!(matches!(store.transition("nope", JobStatus::Processing), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_queued_job_can_fail() {
        let store = JobStore::new();
        let id = store.create(ProcessingConfig::default(), "x".into()).id;
        store.set_error(&id, JobError::new("could not start", None), Vec::new()).unwrap();
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().message, "could not start");
        assert!(job.result.is_none());
    }

    #[test]
    fn test_list_stats_remove() {
        let store = JobStore::new();
        let first = store.create(ProcessingConfig::default(), "1".into()).id;
        let second = store.create(ProcessingConfig::default(), "2".into()).id;
        let third = store.create(ProcessingConfig::default(), "3".into()).id;

        let listed: Vec<String> = store.list(2).into_iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![third.clone(), second.clone()]);

        store.transition(&second, JobStatus::Processing).unwrap();
        store.set_error(&third, JobError::new("bad", Some(StageId::Ingest)), Vec::new()).unwrap();
        assert_eq!(
            store.stats(),
            JobStats { total: 3, queued: 1, processing: 1, complete: 0, error: 1 }
        );

        assert!(matches!(store.remove(&second), Err(EngineError::NotReady { .. })));
        assert!(matches!(store.remove(&first), Err(EngineError::NotReady { .. })));
        assert_eq!(store.remove(&third).unwrap().id, third);
        assert!(matches!(store.remove(&third), Err(EngineError::NotFound(_))));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = JobStore::new();
        let job = store.create(ProcessingConfig::default(), "x".into());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["config"]["mode"], "standard");
        assert!(value["stages"]["denoise"].is_object());
    }
}
