//! Spectral gate denoise (quick mode, and fallback for the neural denoiser)

use rf_offline::AudioBuffer;
use rf_restore::{GateSettings, SpectralGate};

use crate::config::{NoiseProfile, ProcessingConfig};
use crate::engines::require_audio;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput, percent};

pub struct SpectralGateStage;

impl SpectralGateStage {
    /// Gate settings for a job
    pub fn settings(config: &ProcessingConfig) -> GateSettings {
        let strength = config.strength_fraction();
        let settings = match config.noise_profile {
            NoiseProfile::Auto => GateSettings::auto(strength),
            NoiseProfile::Aggressive => GateSettings::aggressive(strength),
            NoiseProfile::Gentle => GateSettings::gentle(strength),
        };
        if config.high_precision {
            settings.high_precision()
        } else {
            settings
        }
    }
}

impl StageEngine for SpectralGateStage {
    fn name(&self) -> &'static str {
        "spectral-gate"
    }

    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        let settings = Self::settings(ctx.config);
        let fft_size = settings.fft_size;
        let gate = SpectralGate::new(settings)?;

        let channels = input.channels;
        let mut output = AudioBuffer::with_capacity(channels, input.sample_rate, input.frames());
        output.samples.resize(input.samples.len(), 0.0);
        for ch in 0..channels {
            let cleaned = gate.process(&input.get_channel(ch), &mut |p| {
                progress(percent(ch as f64 + p, channels))
            })?;
            output.set_channel(ch, &cleaned);
        }

        Ok(StageOutput::new(output)
            .with_detail("profile", ctx.config.noise_profile.as_str())
            .with_detail("strength", ctx.config.strength_fraction())
            .with_detail("fft_size", fft_size))
    }
}
