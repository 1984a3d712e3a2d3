//! Spectral gate noise reduction
//!
//! Stationary broadband denoise:
//! - Noise spectrum learned from the quietest frames of the signal
//! - Wiener-style gain with over-subtraction and a spectral floor
//! - Temporal gain smoothing against musical noise
//! - Strength blend and optional attenuation cap
//!
//! Used as the quick-mode denoiser and as the fallback when the neural
//! denoiser is unavailable.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};
use crate::spectrum::Stft;

/// Minimum number of frames averaged into a noise estimate
const MIN_NOISE_FRAMES: usize = 5;

/// Progress is reported every this many frames
const PROGRESS_INTERVAL: usize = 64;

/// Spectral gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Blend between dry (0.0) and fully gated (1.0)
    pub strength: f64,
    /// FFT size
    pub fft_size: usize,
    /// Hop size
    pub hop_size: usize,
    /// Over-subtraction factor (1.0 - 4.0)
    pub over_subtraction: f64,
    /// Minimum Wiener gain before the strength blend
    pub spectral_floor: f64,
    /// Maximum attenuation per bin (dB), `None` for unlimited
    pub max_attenuation_db: Option<f64>,
    /// Gain smoothing between frames (0.0 - 0.99)
    pub smoothing: f64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            strength: 0.85,
            fft_size: 2048,
            hop_size: 512,
            over_subtraction: 1.5,
            spectral_floor: 0.05,
            max_attenuation_db: Some(12.0),
            smoothing: 0.5,
        }
    }
}

impl GateSettings {
    /// Light settings for mostly-clean material
    pub fn gentle(strength: f64) -> Self {
        Self {
            strength,
            over_subtraction: 1.0,
            spectral_floor: 0.1,
            max_attenuation_db: Some(9.0),
            ..Default::default()
        }
    }

    /// Heavy settings for very noisy material
    pub fn aggressive(strength: f64) -> Self {
        Self {
            strength,
            over_subtraction: 2.5,
            spectral_floor: 0.02,
            max_attenuation_db: Some(18.0),
            smoothing: 0.7,
            ..Default::default()
        }
    }

    /// Balanced settings
    pub fn auto(strength: f64) -> Self {
        Self { strength, ..Default::default() }
    }

    /// Higher frequency resolution and no attenuation cap
    pub fn high_precision(mut self) -> Self {
        self.fft_size = 4096;
        self.hop_size = 1024;
        self.max_attenuation_db = None;
        self
    }

    /// Validate ranges
    pub fn validate(&self) -> RestoreResult<()> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(RestoreError::InvalidConfig(format!(
                "strength {} outside 0.0..=1.0",
                self.strength
            )));
        }
        if !(1.0..=4.0).contains(&self.over_subtraction) {
            return Err(RestoreError::InvalidConfig(format!(
                "over-subtraction {} outside 1.0..=4.0",
                self.over_subtraction
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(RestoreError::InvalidConfig(format!(
                "smoothing {} outside 0.0..1.0",
                self.smoothing
            )));
        }
        if self.max_attenuation_db.is_some_and(|db| db <= 0.0) {
            return Err(RestoreError::InvalidConfig("attenuation cap must be positive".into()));
        }
        Ok(())
    }
}

/// Averaged noise magnitude spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSpectrum {
    /// Mean magnitude per bin
    pub magnitude: Vec<f64>,
    /// Number of frames averaged
    pub frame_count: usize,
}

impl NoiseSpectrum {
    fn new(bins: usize) -> Self {
        Self {
            magnitude: vec![0.0; bins],
            frame_count: 0,
        }
    }

    /// Add frame to the running mean
    fn add_frame(&mut self, magnitudes: &[f64]) {
        self.frame_count += 1;
        let n = self.frame_count as f64;
        for (mean, &mag) in self.magnitude.iter_mut().zip(magnitudes) {
            *mean += (mag - *mean) / n;
        }
    }
}

/// Stationary spectral gate
pub struct SpectralGate {
    settings: GateSettings,
    stft: Stft,
}

impl SpectralGate {
    /// Create new gate
    pub fn new(settings: GateSettings) -> RestoreResult<Self> {
        settings.validate()?;
        let stft = Stft::new(settings.fft_size, settings.hop_size)?;
        Ok(Self { settings, stft })
    }

    /// Active settings
    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Learn the noise spectrum from the quietest tenth of the frames
    pub fn estimate_noise(&self, signal: &[f64]) -> RestoreResult<NoiseSpectrum> {
        let frames = self.stft.magnitudes(signal)?;
        let mut order: Vec<(usize, f64)> = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| (i, frame.iter().map(|m| m * m).sum::<f64>()))
            .collect();
        order.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));

        let take = (frames.len() / 10).max(MIN_NOISE_FRAMES).min(frames.len());
        let mut noise = NoiseSpectrum::new(self.stft.bins());
        for &(i, _) in order.iter().take(take) {
            noise.add_frame(&frames[i]);
        }
        Ok(noise)
    }

    /// Gate one channel. `progress` receives the completed fraction (0.0 - 1.0).
    pub fn process(&self, signal: &[f64], progress: &mut dyn FnMut(f64)) -> RestoreResult<Vec<f64>> {
        if signal.is_empty() {
            progress(1.0);
            return Ok(Vec::new());
        }
        let noise = self.estimate_noise(signal)?;
        let output = self.apply(signal, &noise, progress)?;
        progress(1.0);
        Ok(output)
    }

    /// Gate one channel against a known noise spectrum
    pub fn apply(
        &self,
        signal: &[f64],
        noise: &NoiseSpectrum,
        progress: &mut dyn FnMut(f64),
    ) -> RestoreResult<Vec<f64>> {
        let size = self.stft.size;
        let bins = self.stft.bins();
        if noise.magnitude.len() != bins {
            return Err(RestoreError::InvalidConfig(format!(
                "noise spectrum has {} bins, gate expects {}",
                noise.magnitude.len(),
                bins
            )));
        }

        // Pad both ends so every input sample sees full window overlap
        let mut padded = vec![0.0; signal.len() + 2 * size];
        padded[size..size + signal.len()].copy_from_slice(signal);

        let s = &self.settings;
        let min_gain = s.max_attenuation_db.map_or(0.0, |db| 10.0_f64.powf(-db / 20.0));
        let noise_power: Vec<f64> = noise
            .magnitude
            .iter()
            .map(|m| m * m * s.over_subtraction)
            .collect();

        let mut out = vec![0.0; padded.len()];
        let mut norm = vec![0.0; padded.len()];
        let mut spectrum = vec![Complex64::new(0.0, 0.0); bins];
        let mut frame = vec![0.0; size];
        let mut gains = vec![1.0; bins];

        let starts: Vec<usize> = self.stft.frame_starts(padded.len()).collect();
        let total = starts.len();

        for (n, &start) in starts.iter().enumerate() {
            self.stft.analyze(&padded, start, &mut spectrum)?;

            for ((bin, gain), &np) in spectrum.iter_mut().zip(gains.iter_mut()).zip(&noise_power) {
                let power = bin.norm_sqr();
                let wiener = if power > 1e-20 {
                    ((power - np) / power).max(0.0)
                } else {
                    0.0
                };
                let target = wiener.max(s.spectral_floor);
                *gain = s.smoothing * *gain + (1.0 - s.smoothing) * target;
                let g = (1.0 - s.strength * (1.0 - *gain)).max(min_gain);
                *bin *= g;
            }

            self.stft.synthesize(&mut spectrum, &mut frame)?;
            for (i, &x) in frame.iter().enumerate() {
                let w = self.stft.window[i];
                if let (Some(o), Some(nrm)) = (out.get_mut(start + i), norm.get_mut(start + i)) {
                    *o += x * w;
                    *nrm += w * w;
                }
            }

            if n % PROGRESS_INTERVAL == 0 {
                progress(n as f64 / total as f64);
            }
        }

        Ok(out[size..size + signal.len()]
            .iter()
            .zip(&norm[size..size + signal.len()])
            .map(|(&y, &w)| if w > 1e-12 { y / w } else { 0.0 })
            .collect())
    }
}
