//! Stage identifiers and the stage engine contract

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rf_offline::AudioBuffer;

use crate::availability::ModelId;
use crate::config::{ProcessingConfig, ProcessingMode};
use crate::error::{EngineError, StageResult};

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE IDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Every pipeline stage. Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Ingest,
    Analysis,
    Separation,
    Denoise,
    Restoration,
    Upscale,
    Master,
    Export,
}

const QUICK_STAGES: &[StageId] = &[
    StageId::Ingest,
    StageId::Analysis,
    StageId::Denoise,
    StageId::Upscale,
    StageId::Export,
];

const STANDARD_STAGES: &[StageId] = QUICK_STAGES;

const EXTREME_STAGES: &[StageId] = &[
    StageId::Ingest,
    StageId::Analysis,
    StageId::Separation,
    StageId::Denoise,
    StageId::Restoration,
    StageId::Upscale,
    StageId::Master,
    StageId::Export,
];

impl StageId {
    /// All stages in pipeline order
    pub const ALL: [StageId; 8] = [
        Self::Ingest,
        Self::Analysis,
        Self::Separation,
        Self::Denoise,
        Self::Restoration,
        Self::Upscale,
        Self::Master,
        Self::Export,
    ];

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Analysis => "analysis",
            Self::Separation => "separation",
            Self::Denoise => "denoise",
            Self::Restoration => "restoration",
            Self::Upscale => "upscale",
            Self::Master => "master",
            Self::Export => "export",
        }
    }

    /// Optional heavy model the stage's neural engine depends on
    pub fn model(self) -> Option<ModelId> {
        match self {
            Self::Separation => Some(ModelId::Separator),
            Self::Denoise => Some(ModelId::Denoiser),
            Self::Restoration => Some(ModelId::Restorer),
            Self::Upscale => Some(ModelId::Upscaler),
            Self::Ingest | Self::Analysis | Self::Master | Self::Export => None,
        }
    }

    /// Model the stage asks for under `config`.
    ///
    /// Quick mode never asks for the denoiser and a 1x upscale never asks
    /// for the upscaler; those stages run their classical engine directly.
    pub fn requested_model(self, config: &ProcessingConfig) -> Option<ModelId> {
        match self {
            Self::Denoise if config.mode == ProcessingMode::Quick => None,
            Self::Upscale if config.upscale_factor <= 1 => None,
            _ => self.model(),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown stage '{}'", s)))
    }
}

/// Ordered stage list for a processing mode
pub fn stages_for(mode: ProcessingMode) -> &'static [StageId] {
    match mode {
        ProcessingMode::Quick => QUICK_STAGES,
        ProcessingMode::Standard => STANDARD_STAGES,
        ProcessingMode::Extreme => EXTREME_STAGES,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE & CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a job's audio comes from
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// File on disk
    File(PathBuf),
    /// Encoded bytes (uploaded file), extension as a decoder hint
    Bytes {
        data: Vec<u8>,
        extension: Option<String>,
    },
    /// Already decoded audio
    Buffer(AudioBuffer),
}

impl AudioSource {
    /// Short human description stored on the job
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Bytes { data, extension } => format!(
                "upload ({} bytes{})",
                data.len(),
                extension.as_deref().map(|e| format!(", .{}", e)).unwrap_or_default()
            ),
            Self::Buffer(buffer) => format!(
                "buffer ({} ch, {} Hz, {} frames)",
                buffer.channels,
                buffer.sample_rate,
                buffer.frames()
            ),
        }
    }
}

/// Read-only inputs of one stage invocation
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub job_id: &'a str,
    pub stage: StageId,
    pub config: &'a ProcessingConfig,
    pub source: &'a AudioSource,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured facts about what a stage produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_floor_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_ratio: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl StageMetadata {
    /// Shape of `audio`
    pub fn for_audio(audio: &AudioBuffer) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frames: audio.frames(),
            ..Default::default()
        }
    }

    /// Add a free-form detail
    pub fn with_detail<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// What a stage engine returns
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub audio: AudioBuffer,
    pub metadata: StageMetadata,
}

impl StageOutput {
    /// Output with metadata describing `audio`
    pub fn new(audio: AudioBuffer) -> Self {
        let metadata = StageMetadata::for_audio(&audio);
        Self { audio, metadata }
    }

    /// Attach a detail
    pub fn with_detail<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.metadata = self.metadata.with_detail(key, value);
        self
    }
}

/// Record of one executed stage, kept on the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    /// Engine that actually ran
    pub engine: String,
    /// True when a substitute ran because the model was unavailable
    pub fallback: bool,
    pub elapsed_ms: u64,
    pub success: bool,
    pub metadata: StageMetadata,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// One physical processing operation behind a uniform contract.
///
/// `progress` takes 0 - 100. Engines own their input buffer and must not
/// touch shared state; failures are reported through [`StageError`](crate::StageError).
pub trait StageEngine: Send + Sync {
    /// Engine name reported in stage metadata
    fn name(&self) -> &'static str;

    /// Run the stage
    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput>;
}

/// Map a fraction of `part` out of `parts` to 0 - 100
pub(crate) fn percent(part: f64, parts: usize) -> u8 {
    if parts == 0 {
        return 100;
    }
    ((part / parts as f64) * 100.0).clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_stage_lists() {
        assert_eq!(
            stages_for(ProcessingMode::Standard),
            &[
                StageId::Ingest,
                StageId::Analysis,
                StageId::Denoise,
                StageId::Upscale,
                StageId::Export
            ]
        );
        assert_eq!(stages_for(ProcessingMode::Quick), stages_for(ProcessingMode::Standard));

        let extreme = stages_for(ProcessingMode::Extreme);
        assert_eq!(extreme.len(), 8);
        assert_eq!(extreme[2], StageId::Separation);
        // Lists follow pipeline order
        assert!(extreme.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_names_round_trip() {
        for id in StageId::ALL {
            assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
            assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(id.as_str()));
        }
        assert!("dense".parse::<StageId>().is_err());
    }

    #[test]
    fn test_requested_model() {
        let standard = ProcessingConfig::default();
        assert_eq!(StageId::Denoise.requested_model(&standard), Some(ModelId::Denoiser));
        assert_eq!(StageId::Upscale.requested_model(&standard), Some(ModelId::Upscaler));
        assert_eq!(StageId::Ingest.requested_model(&standard), None);

        let quick = ProcessingConfig::default().mode(ProcessingMode::Quick);
        assert_eq!(StageId::Denoise.requested_model(&quick), None);

        let flat = ProcessingConfig::default().upscale_factor(1);
        assert_eq!(StageId::Upscale.requested_model(&flat), None);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.0, 2), 0);
        assert_eq!(percent(1.0, 2), 50);
        assert_eq!(percent(2.0, 2), 100);
        assert_eq!(percent(5.0, 0), 100);
    }
}
