//! Spectral noise-floor analysis
//!
//! Per channel, a 2048-point STFT (hop 512) gives:
//! - noise floor: 10th percentile of all bin magnitudes
//! - peak frequency: bin with the highest mean magnitude
//! - dynamic range: loudest bin over the noise floor
//!
//! plus a time-domain silence ratio.

use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};
use crate::spectrum::Stft;

/// Analysis FFT size
pub const ANALYSIS_FFT_SIZE: usize = 2048;
/// Analysis hop size
pub const ANALYSIS_HOP: usize = 512;

/// Frames quieter than this are counted as silence
const SILENCE_DB: f64 = -60.0;

/// Spectral profile of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfile {
    /// Channel index
    pub channel: usize,
    /// Estimated noise floor (dB, magnitude domain)
    pub noise_floor_db: f64,
    /// Dominant frequency (Hz)
    pub peak_hz: f64,
    /// Peak-to-floor ratio (dB)
    pub dynamic_range_db: f64,
    /// Fraction of analysis frames below -60 dBFS RMS (0.0 - 1.0)
    pub silence_ratio: f64,
}

/// STFT-based spectrum analyzer
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    stft: Stft,
}

impl SpectrumAnalyzer {
    /// Create new analyzer
    pub fn new(sample_rate: u32) -> RestoreResult<Self> {
        if sample_rate == 0 {
            return Err(RestoreError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            sample_rate,
            stft: Stft::new(ANALYSIS_FFT_SIZE, ANALYSIS_HOP)?,
        })
    }

    /// Analyze one channel of samples
    pub fn analyze_channel(&self, channel: usize, samples: &[f64]) -> RestoreResult<ChannelProfile> {
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(RestoreError::AnalysisFailed(format!(
                "channel {} contains non-finite samples",
                channel
            )));
        }

        let frames = self.stft.magnitudes(samples)?;
        let bins = self.stft.bins();

        let mut all: Vec<f64> = frames.iter().flatten().copied().collect();
        let floor = percentile(&mut all, 0.10);
        let max = all.iter().copied().fold(0.0, f64::max);

        let mut mean = vec![0.0; bins];
        for frame in &frames {
            for (acc, &m) in mean.iter_mut().zip(frame) {
                *acc += m;
            }
        }
        let peak_bin = mean
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        Ok(ChannelProfile {
            channel,
            noise_floor_db: 20.0 * (floor + 1e-10).log10(),
            peak_hz: peak_bin as f64 * self.sample_rate as f64 / ANALYSIS_FFT_SIZE as f64,
            dynamic_range_db: 20.0 * (max / (floor + 1e-10)).max(1e-10).log10(),
            silence_ratio: self.silence_ratio(samples),
        })
    }

    /// Analyze every channel of a planar signal
    pub fn analyze(&self, channels: &[Vec<f64>]) -> RestoreResult<Vec<ChannelProfile>> {
        channels
            .iter()
            .enumerate()
            .map(|(ch, samples)| self.analyze_channel(ch, samples))
            .collect()
    }

    fn silence_ratio(&self, samples: &[f64]) -> f64 {
        let blocks: Vec<f64> = samples
            .chunks(ANALYSIS_FFT_SIZE)
            .map(|chunk| {
                let ms = chunk.iter().map(|s| s * s).sum::<f64>() / chunk.len() as f64;
                10.0 * (ms + 1e-20).log10()
            })
            .collect();
        if blocks.is_empty() {
            return 1.0;
        }
        blocks.iter().filter(|&&db| db < SILENCE_DB).count() as f64 / blocks.len() as f64
    }
}

/// Linear-interpolated percentile (0.0 - 1.0), reorders `values`
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}
