//! Spectral noise-floor analysis (audio passes through unchanged)

use rf_offline::AudioBuffer;
use rf_restore::SpectrumAnalyzer;

use crate::engines::require_audio;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput, percent};

pub struct AnalysisStage;

impl StageEngine for AnalysisStage {
    fn name(&self) -> &'static str {
        "stft-analysis"
    }

    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        let analyzer = SpectrumAnalyzer::new(input.sample_rate)?;

        let mut profiles = Vec::with_capacity(input.channels);
        for ch in 0..input.channels {
            profiles.push(analyzer.analyze_channel(ch, &input.get_channel(ch))?);
            progress(percent((ch + 1) as f64, input.channels));
        }

        let n = profiles.len() as f64;
        let noise_floor = profiles.iter().map(|p| p.noise_floor_db).sum::<f64>() / n;
        let silence = profiles.iter().map(|p| p.silence_ratio).sum::<f64>() / n;
        log::debug!(
            "[{}] noise floor {:.1} dB, silence {:.0}%",
            ctx.job_id,
            noise_floor,
            silence * 100.0
        );

        let profiles = serde_json::to_value(&profiles)
            .map_err(|e| crate::error::StageError::Computation(e.to_string()))?;
        let mut output = StageOutput::new(input).with_detail("profiles", profiles);
        output.metadata.noise_floor_db = Some(noise_floor);
        output.metadata.silence_ratio = Some(silence);
        Ok(output)
    }
}
