//! Loudness mastering: -14 LUFS integrated with a -1 dBFS sample-peak ceiling

use rf_offline::{AudioBuffer, NormalizationMode, Normalizer};

use crate::engines::require_audio;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput};

pub struct LoudnessStage;

/// JSON-safe loudness value (silence measures `-inf`)
fn lufs(value: f64) -> serde_json::Value {
    if value.is_finite() {
        serde_json::json!((value * 10.0).round() / 10.0)
    } else {
        serde_json::Value::Null
    }
}

impl StageEngine for LoudnessStage {
    fn name(&self) -> &'static str {
        "loudness-normalizer"
    }

    fn run(
        &self,
        mut input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        progress(0);
        let (before, after) = Normalizer::new(NormalizationMode::streaming()).apply(&mut input);
        log::debug!(
            "[{}] loudness {:.1} -> {:.1} LUFS, peak {:.3} -> {:.3}",
            ctx.job_id,
            before.integrated,
            after.integrated,
            before.peak,
            after.peak
        );
        progress(100);

        Ok(StageOutput::new(input)
            .with_detail("lufs_before", lufs(before.integrated))
            .with_detail("lufs_after", lufs(after.integrated))
            .with_detail("peak_after", after.peak))
    }
}
