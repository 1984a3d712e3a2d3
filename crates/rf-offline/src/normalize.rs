//! Loudness measurement and normalization
//!
//! Implements:
//! - K-weighting pre-filter (ITU-R BS.1770-4)
//! - Integrated loudness over 400 ms blocks with 75% overlap,
//!   absolute gating (-70 LUFS) and relative gating (-10 LU)
//! - Peak ceiling used to keep exports out of clipping

use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;

/// Normalization mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NormalizationMode {
    /// Peak normalization (dBFS target)
    Peak { target_db: f64 },

    /// Loudness normalization (LUFS target) with a sample-peak ceiling
    Lufs { target_lufs: f64, ceiling_db: f64 },

    /// No gain change unless the peak exceeds the linear ceiling
    Ceiling { max_peak: f64 },
}

impl Default for NormalizationMode {
    fn default() -> Self {
        Self::streaming()
    }
}

impl NormalizationMode {
    /// -14 LUFS, -1 dBFS ceiling
    pub fn streaming() -> Self {
        Self::Lufs { target_lufs: -14.0, ceiling_db: -1.0 }
    }
}

/// Loudness measurement result
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoudnessInfo {
    /// Sample peak (linear)
    pub peak: f64,
    /// Integrated loudness (LUFS), `-inf` for silence
    pub integrated: f64,
}

/// Convert dB to linear gain
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// K-WEIGHTING FILTER (ITU-R BS.1770-4)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        // TDF-II
        let out = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * out + self.z2;
        self.z2 = self.b2 * input - self.a2 * out;
        out
    }
}

/// High shelf (+4 dB) followed by the RLB high-pass
#[derive(Debug, Clone)]
struct KWeighting {
    shelf: Biquad,
    high_pass: Biquad,
}

impl KWeighting {
    fn new(sample_rate: f64) -> Self {
        let (gain_db, f0, q) = (4.0, 1681.974450955533, 0.7071752369554196);
        let k = (std::f64::consts::PI * f0 / sample_rate).tan();
        let vh = db_to_linear(gain_db);
        let vb = vh.sqrt();
        let norm = 1.0 / (1.0 + k / q + k * k);
        let shelf = Biquad {
            b0: (vh + vb * k / q + k * k) * norm,
            b1: 2.0 * (k * k - vh) * norm,
            b2: (vh - vb * k / q + k * k) * norm,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
            ..Default::default()
        };

        let (f0, q) = (38.13547087602444, 0.5003270373238773);
        let k = (std::f64::consts::PI * f0 / sample_rate).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        let high_pass = Biquad {
            b0: 1.0,
            b1: -2.0,
            b2: 1.0,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
            ..Default::default()
        };

        Self { shelf, high_pass }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        self.high_pass.process(self.shelf.process(input))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LUFS LOUDNESS METER
// ═══════════════════════════════════════════════════════════════════════════════

/// Offline integrated-loudness meter
pub struct LoudnessMeter;

impl LoudnessMeter {
    /// Measure a whole buffer
    pub fn measure(buffer: &AudioBuffer) -> LoudnessInfo {
        let channels = buffer.channels.max(1);
        let frames = buffer.frames();
        let rate = buffer.sample_rate.max(1) as f64;

        // Per-frame K-weighted power summed over channels (weights 1.0 for L/R/C)
        let mut filters: Vec<KWeighting> = (0..channels).map(|_| KWeighting::new(rate)).collect();
        let mut power = Vec::with_capacity(frames);
        for frame in buffer.samples.chunks_exact(channels) {
            let sum: f64 = frame
                .iter()
                .zip(filters.iter_mut())
                .map(|(&s, f)| {
                    let w = f.process(s);
                    w * w
                })
                .sum();
            power.push(sum);
        }

        LoudnessInfo {
            peak: buffer.peak(),
            integrated: Self::gated_loudness(&power, rate),
        }
    }

    fn block_loudness(mean_square: f64) -> f64 {
        if mean_square > 0.0 {
            -0.691 + 10.0 * mean_square.log10()
        } else {
            -f64::INFINITY
        }
    }

    fn gated_loudness(power: &[f64], rate: f64) -> f64 {
        let block = (rate * 0.4) as usize;
        let hop = (rate * 0.1) as usize;
        if block == 0 || hop == 0 {
            return -f64::INFINITY;
        }

        // Short programs still get one block
        let blocks: Vec<f64> = if power.len() < block {
            if power.is_empty() {
                return -f64::INFINITY;
            }
            vec![power.iter().sum::<f64>() / power.len() as f64]
        } else {
            (0..=(power.len() - block) / hop)
                .map(|i| power[i * hop..i * hop + block].iter().sum::<f64>() / block as f64)
                .collect()
        };

        let above_abs: Vec<f64> = blocks
            .into_iter()
            .filter(|&ms| Self::block_loudness(ms) > -70.0)
            .collect();
        if above_abs.is_empty() {
            return -f64::INFINITY;
        }

        let abs_mean = above_abs.iter().sum::<f64>() / above_abs.len() as f64;
        let relative_gate = Self::block_loudness(abs_mean) - 10.0;

        let gated: Vec<f64> = above_abs
            .into_iter()
            .filter(|&ms| Self::block_loudness(ms) > relative_gate)
            .collect();
        if gated.is_empty() {
            return -f64::INFINITY;
        }
        Self::block_loudness(gated.iter().sum::<f64>() / gated.len() as f64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NORMALIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalizer for applying gain based on loudness analysis
pub struct Normalizer {
    mode: NormalizationMode,
}

impl Normalizer {
    /// Create new normalizer
    pub fn new(mode: NormalizationMode) -> Self {
        Self { mode }
    }

    /// Calculate gain to apply based on loudness info
    pub fn calculate_gain(&self, info: &LoudnessInfo) -> f64 {
        if info.peak <= 0.0 {
            return 1.0;
        }
        match self.mode {
            NormalizationMode::Peak { target_db } => db_to_linear(target_db) / info.peak,
            NormalizationMode::Lufs { target_lufs, ceiling_db } => {
                if !info.integrated.is_finite() {
                    return 1.0;
                }
                let gain = db_to_linear(target_lufs - info.integrated);
                let ceiling = db_to_linear(ceiling_db);
                gain.min(ceiling / info.peak)
            }
            NormalizationMode::Ceiling { max_peak } => {
                if info.peak > max_peak {
                    max_peak / info.peak
                } else {
                    1.0
                }
            }
        }
    }

    /// Measure and normalize in place. Returns the loudness before and after.
    pub fn apply(&self, buffer: &mut AudioBuffer) -> (LoudnessInfo, LoudnessInfo) {
        let before = LoudnessMeter::measure(buffer);
        let gain = self.calculate_gain(&before);
        if (gain - 1.0).abs() > f64::EPSILON {
            buffer.apply_gain(gain);
        }
        let after = LoudnessInfo {
            peak: before.peak * gain,
            integrated: before.integrated + 20.0 * gain.log10(),
        };
        (before, after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(amplitude: f64, seconds: f64) -> AudioBuffer {
        let rate = 48000u32;
        let frames = (rate as f64 * seconds) as usize;
        let mut buffer = AudioBuffer::with_capacity(2, rate, frames);
        for i in 0..frames {
            let s = amplitude * (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / rate as f64).sin();
            buffer.samples.push(s);
            buffer.samples.push(s);
        }
        buffer
    }

    #[test]
    fn test_k_weighting_near_unity_at_1k() {
        let mut filter = KWeighting::new(48000.0);
        let mut max_out = 0.0f64;
        for i in 0..48000 {
            let s = (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / 48000.0).sin();
            max_out = max_out.max(filter.process(s).abs());
        }
        assert!(max_out > 0.9 && max_out < 1.5);
    }

    #[test]
    fn test_silence_is_gated() {
        let info = LoudnessMeter::measure(&tone(0.0, 1.0));
        assert_eq!(info.integrated, -f64::INFINITY);
        assert_eq!(Normalizer::new(NormalizationMode::streaming()).calculate_gain(&info), 1.0);
    }

    #[test]
    fn test_full_scale_sine_reference() {
        // 0 dBFS 1 kHz sine: -3.01 LUFS per channel, so about 0 LUFS for two
        let info = LoudnessMeter::measure(&tone(1.0, 3.0));
        assert!((info.integrated - 0.0).abs() < 0.7, "got {}", info.integrated);
    }

    #[test]
    fn test_lufs_gain_respects_ceiling() {
        let info = LoudnessInfo { peak: 0.8, integrated: -30.0 };
        let gain = Normalizer::new(NormalizationMode::streaming()).calculate_gain(&info);
        assert_relative_eq!(gain * 0.8, db_to_linear(-1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_lufs_gain_unclamped() {
        let info = LoudnessInfo { peak: 0.1, integrated: -23.0 };
        let gain = Normalizer::new(NormalizationMode::streaming()).calculate_gain(&info);
        assert_relative_eq!(gain, db_to_linear(9.0), epsilon = 1e-9);
    }

    #[test]
    fn test_ceiling_only_attenuates() {
        let mut loud = tone(1.2, 0.5);
        let (before, after) = Normalizer::new(NormalizationMode::Ceiling { max_peak: 0.99 }).apply(&mut loud);
        assert!(before.peak > 1.0);
        assert_relative_eq!(after.peak, 0.99, epsilon = 1e-9);
        assert!(loud.peak() <= 0.99 + 1e-9);

        let mut quiet = tone(0.5, 0.5);
        let original = quiet.clone();
        Normalizer::new(NormalizationMode::Ceiling { max_peak: 0.99 }).apply(&mut quiet);
        assert_eq!(quiet, original);
    }
}
