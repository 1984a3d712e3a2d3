//! Concrete stage engines
//!
//! | Stage | Neural engine | Classical engine |
//! |-------|---------------|------------------|
//! | ingest | | [`IngestStage`] |
//! | analysis | | [`AnalysisStage`] |
//! | separation | [`NeuralStage`] | |
//! | denoise | [`NeuralStage`] | [`SpectralGateStage`] |
//! | restoration | [`NeuralStage`] | [`DeclipStage`] |
//! | upscale | [`NeuralStage`] | [`ResampleStage`] |
//! | master | | [`LoudnessStage`] |
//! | export | | [`FinalizeStage`] |

mod analysis;
mod denoise;
mod export;
mod ingest;
mod master;
mod neural;
mod restoration;
mod upscale;

pub use analysis::AnalysisStage;
pub use denoise::SpectralGateStage;
pub use export::FinalizeStage;
pub use ingest::IngestStage;
pub use master::LoudnessStage;
pub use neural::{ModelLoader, NeuralStage, OnnxModelLoader};
pub use restoration::DeclipStage;
pub use upscale::ResampleStage;

use rf_offline::AudioBuffer;

use crate::error::{StageError, StageResult};

/// Split into planar f32 for inference
pub(crate) fn to_planar_f32(audio: &AudioBuffer) -> Vec<Vec<f32>> {
    audio
        .to_channels()
        .into_iter()
        .map(|ch| ch.into_iter().map(|s| s as f32).collect())
        .collect()
}

/// Rebuild an interleaved buffer from planar f32
pub(crate) fn from_planar_f32(channels: &[Vec<f32>], sample_rate: u32) -> AudioBuffer {
    let planar: Vec<Vec<f64>> = channels
        .iter()
        .map(|ch| ch.iter().map(|&s| s as f64).collect())
        .collect();
    AudioBuffer::from_channels(&planar, sample_rate)
}

/// Reject buffers no stage can work on
pub(crate) fn require_audio(audio: &AudioBuffer) -> StageResult<()> {
    if audio.channels == 0 || audio.is_empty() {
        return Err(StageError::InvalidInput("stage received no audio".into()));
    }
    if audio.sample_rate == 0 {
        return Err(StageError::InvalidInput("stage received a zero sample rate".into()));
    }
    Ok(())
}
