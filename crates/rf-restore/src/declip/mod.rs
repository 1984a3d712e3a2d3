//! Audio declipping - reconstruct clipped waveforms
//!
//! Flat-topped regions at or above the threshold are replaced with a cubic
//! Hermite spline fitted to the slopes on either side, then soft-limited so
//! the repair cannot clip again. Further passes re-detect what is left.

use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};

/// Ceiling for reconstructed peaks
const RECONSTRUCTION_LIMIT: f64 = 0.999;

/// Declipping configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclipConfig {
    /// Detection threshold (0.5 - 1.0, linear)
    pub threshold: f64,
    /// Margin around each clipped run (samples)
    pub margin_samples: usize,
    /// Repair passes
    pub quality: usize,
}

impl Default for DeclipConfig {
    fn default() -> Self {
        Self {
            threshold: 0.99,
            margin_samples: 4,
            quality: 3,
        }
    }
}

/// Statistics about declipping
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclipStats {
    /// Number of clipped regions detected on the first pass
    pub regions_detected: usize,
    /// Total samples rewritten on the first pass
    pub samples_repaired: usize,
    /// Peak original value
    pub peak_original: f64,
    /// Peak reconstructed value
    pub peak_reconstructed: f64,
}

/// Offline declipper
pub struct Declipper {
    config: DeclipConfig,
}

impl Declipper {
    /// Create new declipper
    pub fn new(config: DeclipConfig) -> RestoreResult<Self> {
        if !(0.5..=1.0).contains(&config.threshold) {
            return Err(RestoreError::InvalidConfig(format!(
                "declip threshold {} outside 0.5..=1.0",
                config.threshold
            )));
        }
        Ok(Self { config })
    }

    /// Repair one channel in place
    pub fn repair(&self, audio: &mut [f64]) -> DeclipStats {
        let peak_original = peak(audio);
        let mut stats = DeclipStats {
            peak_original,
            ..Default::default()
        };

        for pass in 0..self.config.quality.max(1) {
            let regions = self.detect_clips(audio);
            if pass == 0 {
                stats.regions_detected = regions.len();
                stats.samples_repaired = regions.iter().map(|(s, e)| e - s).sum();
            }
            if regions.is_empty() {
                break;
            }
            for &(start, end) in &regions {
                if let Some(repaired) = self.reconstruct_spline(audio, start, end) {
                    for (dst, s) in audio[start..end].iter_mut().zip(repaired) {
                        *dst = soft_limit(s, RECONSTRUCTION_LIMIT);
                    }
                }
            }
        }

        stats.peak_reconstructed = peak(audio);
        if stats.regions_detected > 0 {
            log::debug!(
                "Declip: {} regions, {} samples, peak {:.3} -> {:.3}",
                stats.regions_detected,
                stats.samples_repaired,
                stats.peak_original,
                stats.peak_reconstructed
            );
        }
        stats
    }

    /// Detect clipped regions, widened by the margin and merged
    fn detect_clips(&self, audio: &[f64]) -> Vec<(usize, usize)> {
        let threshold = self.config.threshold;
        let margin = self.config.margin_samples;
        let mut regions: Vec<(usize, usize)> = Vec::new();

        let mut in_clip = false;
        let mut clip_start = 0;

        for (i, &sample) in audio.iter().enumerate() {
            let is_clipped = sample.abs() >= threshold;
            if is_clipped && !in_clip {
                clip_start = i.saturating_sub(margin);
                in_clip = true;
            } else if !is_clipped && in_clip {
                push_merged(&mut regions, (clip_start, (i + margin).min(audio.len())));
                in_clip = false;
            }
        }
        if in_clip {
            push_merged(&mut regions, (clip_start, audio.len()));
        }
        regions
    }

    /// Cubic Hermite spline across `start..end`, `None` when a side has no anchor
    fn reconstruct_spline(&self, audio: &[f64], start: usize, end: usize) -> Option<Vec<f64>> {
        let margin = self.config.margin_samples.max(1);
        let len = end - start;
        if len < 4 {
            return None;
        }

        let left = &audio[start.saturating_sub(margin * 2)..start];
        let right = &audio[end..(end + margin * 2).min(audio.len())];

        let p0 = *left.last()?;
        let p1 = *right.first()?;
        let left_deriv = match left {
            [.., a, b] => b - a,
            _ => 0.0,
        };
        let right_deriv = match right {
            [a, b, ..] => b - a,
            _ => 0.0,
        };
        let m0 = left_deriv * len as f64;
        let m1 = right_deriv * len as f64;

        Some(
            (0..len)
                .map(|i| {
                    let t = i as f64 / len as f64;
                    let t2 = t * t;
                    let t3 = t2 * t;

                    // Hermite basis functions
                    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                    let h10 = t3 - 2.0 * t2 + t;
                    let h01 = -2.0 * t3 + 3.0 * t2;
                    let h11 = t3 - t2;

                    h00 * p0 + h10 * m0 + h01 * p1 + h11 * m1
                })
                .collect(),
        )
    }
}

fn push_merged(regions: &mut Vec<(usize, usize)>, region: (usize, usize)) {
    match regions.last_mut() {
        Some(last) if region.0 <= last.1 => last.1 = last.1.max(region.1),
        _ => regions.push(region),
    }
}

fn peak(audio: &[f64]) -> f64 {
    audio.iter().map(|s| s.abs()).fold(0.0, f64::max)
}

/// Soft knee above `limit`, asymptotic to `2 * limit`
fn soft_limit(sample: f64, limit: f64) -> f64 {
    if sample.abs() <= limit {
        sample
    } else {
        let over = sample.abs() - limit;
        sample.signum() * (limit + over / (1.0 + over / limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clipped_sine(len: usize) -> Vec<f64> {
        (0..len).map(|i| ((i as f64 * 0.05).sin() * 1.5).clamp(-1.0, 1.0)).collect()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Declipper::new(DeclipConfig { threshold: 1.5, ..Default::default() }).is_err());
        assert!(Declipper::new(DeclipConfig::default()).is_ok());
    }

    #[test]
    fn test_clip_detection() {
        let declipper = Declipper::new(DeclipConfig::default()).unwrap();
        let regions = declipper.detect_clips(&clipped_sine(1000));
        assert!(!regions.is_empty());
        // Regions are sorted and disjoint
        assert!(regions.windows(2).all(|w| w[0].1 < w[1].0));
    }

    #[test]
    fn test_repair_modifies_clipped_regions() {
        let declipper = Declipper::new(DeclipConfig::default()).unwrap();
        let input = clipped_sine(1000);
        let mut output = input.clone();
        let stats = declipper.repair(&mut output);

        assert!(stats.regions_detected > 0);
        assert!(stats.samples_repaired > 0);
        let diff: f64 = input.iter().zip(&output).map(|(a, b)| (a - b).abs()).sum();
        assert!(diff > 0.0);
        assert!(output.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_clean_signal_untouched() {
        let declipper = Declipper::new(DeclipConfig::default()).unwrap();
        let input: Vec<f64> = (0..1000).map(|i| 0.5 * (i as f64 * 0.05).sin()).collect();
        let mut output = input.clone();
        let stats = declipper.repair(&mut output);
        assert_eq!(stats.regions_detected, 0);
        assert_eq!(output, input);
    }

    #[test]
    fn test_soft_limit() {
        assert_eq!(soft_limit(0.5, 1.0), 0.5);
        assert!(soft_limit(1.5, 1.0) < 1.5);
        assert!(soft_limit(1.5, 1.0) > 1.0);
        assert!(soft_limit(-1.5, 1.0) < -1.0);
    }
}
