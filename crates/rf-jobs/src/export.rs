//! Export of complete jobs
//!
//! Encoding is pure: the stored artifact is read, encoded into the
//! requested format and returned. Job state is never touched, so the same
//! export can be requested any number of times in any format.

use std::sync::Arc;

use rf_offline::{AudioEncoder, OutputFormat, create_encoder};

use crate::artifacts::ArtifactStore;
use crate::error::{EngineError, EngineResult};
use crate::store::{JobStatus, JobStore};

pub struct ExportService {
    store: Arc<JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ExportService {
    pub fn new(store: Arc<JobStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    /// Encode the result of job `id`
    pub fn export(&self, id: &str, format: &OutputFormat) -> EngineResult<Vec<u8>> {
        let job = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let result = match (job.status, job.result) {
            (JobStatus::Complete, Some(result)) => result,
            (status, _) => {
                return Err(EngineError::NotReady {
                    id: id.to_string(),
                    status,
                });
            }
        };

        let audio = self.artifacts.load(&result)?;
        let encoder: Box<dyn AudioEncoder> = create_encoder(format);
        let bytes = encoder
            .encode(&audio)
            .map_err(|e| EngineError::Encoding(e.to_string()))?;
        log::info!(
            "Exported job {} as {} ({} bytes)",
            id,
            format.extension(),
            bytes.len()
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifacts;
    use crate::config::ProcessingConfig;
    use crate::engines::test_support::noisy_tone;
    use rf_offline::AudioDecoder;

    fn complete_job(store: &JobStore, artifacts: &MemoryArtifacts) -> String {
        let id = store.create(ProcessingConfig::default(), "x".into()).id;
        store.transition(&id, JobStatus::Processing).unwrap();
        let result = artifacts.put(&id, &noisy_tone(2, 48000, 0.2)).unwrap();
        store.set_result(&id, result, Vec::new()).unwrap();
        id
    }

    #[test]
    fn test_export_formats() {
        let store = Arc::new(JobStore::new());
        let artifacts = Arc::new(MemoryArtifacts::new());
        let id = complete_job(&store, &artifacts);
        let service = ExportService::new(Arc::clone(&store), artifacts);

        for format in [OutputFormat::wav_16(), OutputFormat::flac()] {
            let bytes = service.export(&id, &format).unwrap();
            let decoded = AudioDecoder::decode_bytes(bytes, Some(format.extension())).unwrap();
            assert_eq!(decoded.sample_rate, 48000);
            assert_eq!(decoded.channels, 2);
            assert_eq!(decoded.frames(), 9600);
        }
        // Idempotent: job untouched
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Complete);
    }

    #[test]
    fn test_export_errors() {
        let store = Arc::new(JobStore::new());
        let artifacts = Arc::new(MemoryArtifacts::new());
        let service = ExportService::new(Arc::clone(&store), artifacts);

        assert!(matches!(
            service.export("missing", &OutputFormat::wav_24()),
            Err(EngineError::NotFound(_))
        ));

        let id = store.create(ProcessingConfig::default(), "x".into()).id;
        assert!(matches!(
            service.export(&id, &OutputFormat::wav_24()),
            Err(EngineError::NotReady { status: JobStatus::Queued, .. })
        ));
    }
}
