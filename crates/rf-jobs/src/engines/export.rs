//! Finalize: output format and peak safety before the result is stored

use rf_offline::{AudioBuffer, NormalizationMode, Normalizer};

use crate::engines::require_audio;
use crate::engines::upscale::ResampleStage;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput};

/// Linear peak ceiling of stored results
pub const EXPORT_CEILING: f64 = 0.99;

pub struct FinalizeStage;

impl StageEngine for FinalizeStage {
    fn name(&self) -> &'static str {
        "export-finalize"
    }

    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        progress(0);
        let config = ctx.config;
        let mut output = if input.sample_rate != config.target_sample_rate
            || input.channels != config.target_channels
        {
            ResampleStage::conform(&input, config)?
        } else {
            input
        };
        progress(60);

        let (before, _) =
            Normalizer::new(NormalizationMode::Ceiling { max_peak: EXPORT_CEILING }).apply(&mut output);
        progress(100);

        let duration = output.duration();
        Ok(StageOutput::new(output)
            .with_detail("limited", before.peak > EXPORT_CEILING)
            .with_detail("duration_seconds", duration))
    }
}
