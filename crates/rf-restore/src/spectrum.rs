//! Shared STFT plumbing (Hann window, forward/inverse real FFT)

use std::sync::Arc;

use num_complex::Complex64;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{RestoreError, RestoreResult};

pub(crate) struct Stft {
    pub size: usize,
    pub hop: usize,
    pub window: Vec<f64>,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
}

impl Stft {
    pub fn new(size: usize, hop: usize) -> RestoreResult<Self> {
        if size < 16 || !size.is_power_of_two() {
            return Err(RestoreError::InvalidConfig(format!(
                "FFT size must be a power of two >= 16, got {}",
                size
            )));
        }
        if hop == 0 || hop > size / 2 {
            return Err(RestoreError::InvalidConfig(format!(
                "Hop size {} must be in 1..={}",
                hop,
                size / 2
            )));
        }

        let mut planner = RealFftPlanner::<f64>::new();
        let window = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos()))
            .collect();

        Ok(Self {
            size,
            hop,
            window,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        })
    }

    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Frame start offsets covering `len` samples (at least one frame)
    pub fn frame_starts(&self, len: usize) -> impl Iterator<Item = usize> + use<> {
        let count = if len <= self.size {
            1
        } else {
            (len - self.size).div_ceil(self.hop) + 1
        };
        let hop = self.hop;
        (0..count).map(move |i| i * hop)
    }

    /// Windowed forward transform of the frame at `start` (zero-padded past the end)
    pub fn analyze(&self, signal: &[f64], start: usize, spectrum: &mut [Complex64]) -> RestoreResult<()> {
        let mut frame: Vec<f64> = (0..self.size)
            .map(|i| signal.get(start + i).copied().unwrap_or(0.0) * self.window[i])
            .collect();
        self.forward
            .process(&mut frame, spectrum)
            .map_err(|e| RestoreError::ProcessingError(e.to_string()))
    }

    /// Inverse transform, normalized by the FFT size
    pub fn synthesize(&self, spectrum: &mut [Complex64], frame: &mut [f64]) -> RestoreResult<()> {
        // DC and Nyquist must be real for the inverse real FFT
        if let Some(first) = spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }
        self.inverse
            .process(spectrum, frame)
            .map_err(|e| RestoreError::ProcessingError(e.to_string()))?;
        let norm = 1.0 / self.size as f64;
        for s in frame.iter_mut() {
            *s *= norm;
        }
        Ok(())
    }

    /// Magnitude spectrogram, one row per frame
    pub fn magnitudes(&self, signal: &[f64]) -> RestoreResult<Vec<Vec<f64>>> {
        let mut spectrum = vec![Complex64::new(0.0, 0.0); self.bins()];
        self.frame_starts(signal.len())
            .map(|start| {
                self.analyze(signal, start, &mut spectrum)?;
                Ok(spectrum.iter().map(|c| c.norm()).collect())
            })
            .collect()
    }
}
