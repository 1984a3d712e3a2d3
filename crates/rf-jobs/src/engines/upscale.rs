//! Sample-rate conversion to the job's output format (fallback for the
//! neural upscaler, and the whole upscale stage at 1x)

use rf_offline::{AudioBuffer, SrcQuality, resample};

use crate::config::ProcessingConfig;
use crate::engines::require_audio;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput};

pub struct ResampleStage;

impl ResampleStage {
    pub(crate) fn quality(config: &ProcessingConfig) -> SrcQuality {
        if config.high_precision {
            SrcQuality::Best
        } else {
            SrcQuality::Medium
        }
    }

    /// Resample to the target rate and conform the channel count
    pub(crate) fn conform(audio: &AudioBuffer, config: &ProcessingConfig) -> StageResult<AudioBuffer> {
        let resampled = resample(audio, config.target_sample_rate, Self::quality(config))?;
        Ok(resampled.conform_channels(config.target_channels)?)
    }
}

impl StageEngine for ResampleStage {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        progress(0);
        let source_rate = input.sample_rate;
        let output = Self::conform(&input, ctx.config)?;
        progress(80);

        log::debug!(
            "[{}] resampled {} Hz -> {} Hz, {} ch",
            ctx.job_id,
            source_rate,
            output.sample_rate,
            output.channels
        );
        progress(100);
        Ok(StageOutput::new(output)
            .with_detail("source_rate", source_rate)
            .with_detail("requested_factor", ctx.config.upscale_factor))
    }
}
