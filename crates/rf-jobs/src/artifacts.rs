//! Result storage for complete jobs
//!
//! The final internal audio of a job is kept either in memory or as a
//! 32-bit float WAV in the artifact directory. Exports always start from
//! the stored artifact, never from a previous export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use rf_offline::{AudioBuffer, AudioDecoder, AudioEncoder, WavConfig, WavEncoder};

use crate::error::{EngineError, EngineResult};
use crate::store::ResultRef;

/// Storage backend for job results
pub trait ArtifactStore: Send + Sync {
    /// Store the result of job `id`
    fn put(&self, id: &str, audio: &AudioBuffer) -> EngineResult<ResultRef>;

    /// Load a stored result
    fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>>;

    /// Delete a stored result. Missing artifacts are not an error.
    fn remove(&self, result: &ResultRef) -> EngineResult<()>;
}

fn reference(id: &str, audio: &AudioBuffer, path: Option<PathBuf>) -> ResultRef {
    ResultRef {
        artifact_id: id.to_string(),
        sample_rate: audio.sample_rate,
        channels: audio.channels,
        frames: audio.frames(),
        path,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process artifact store
#[derive(Default)]
pub struct MemoryArtifacts {
    buffers: RwLock<HashMap<String, Arc<AudioBuffer>>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn put(&self, id: &str, audio: &AudioBuffer) -> EngineResult<ResultRef> {
        self.buffers.write().insert(id.to_string(), Arc::new(audio.clone()));
        Ok(reference(id, audio, None))
    }

    fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>> {
        self.buffers
            .read()
            .get(&result.artifact_id)
            .cloned()
            .ok_or_else(|| EngineError::Artifact(format!("no artifact {}", result.artifact_id)))
    }

    fn remove(&self, result: &ResultRef) -> EngineResult<()> {
        self.buffers.write().remove(&result.artifact_id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISK
// ═══════════════════════════════════════════════════════════════════════════════

/// Float WAV files in a directory
pub struct DiskArtifacts {
    dir: PathBuf,
}

impl DiskArtifacts {
    /// Create the directory if needed
    pub fn new<P: Into<PathBuf>>(dir: P) -> EngineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactStore for DiskArtifacts {
    fn put(&self, id: &str, audio: &AudioBuffer) -> EngineResult<ResultRef> {
        let bytes = WavEncoder::new(WavConfig::float32())
            .encode(audio)
            .map_err(|e| EngineError::Artifact(e.to_string()))?;
        let path = self.dir.join(format!("{}.wav", id));
        std::fs::write(&path, bytes)?;
        log::debug!("Stored artifact {}", path.display());
        Ok(reference(id, audio, Some(path)))
    }

    fn load(&self, result: &ResultRef) -> EngineResult<Arc<AudioBuffer>> {
        let path = result
            .path
            .clone()
            .unwrap_or_else(|| self.dir.join(format!("{}.wav", result.artifact_id)));
        let audio = AudioDecoder::decode(&path).map_err(|e| EngineError::Artifact(e.to_string()))?;
        Ok(Arc::new(audio))
    }

    fn remove(&self, result: &ResultRef) -> EngineResult<()> {
        let path = result
            .path
            .clone()
            .unwrap_or_else(|| self.dir.join(format!("{}.wav", result.artifact_id)));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
