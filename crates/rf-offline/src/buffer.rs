//! Interleaved audio buffer shared by every processing stage

use crate::error::{OfflineError, OfflineResult};

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio buffer for offline processing (f64 for maximum precision)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<f64>,
    /// Number of channels
    pub channels: usize,
    /// Sample rate
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create new buffer
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            channels,
            sample_rate,
        }
    }

    /// Create buffer with capacity
    pub fn with_capacity(channels: usize, sample_rate: u32, frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frames * channels),
            channels,
            sample_rate,
        }
    }

    /// Build an interleaved buffer from planar channel data.
    ///
    /// Channels shorter than the longest one are zero-padded.
    pub fn from_channels(channels: &[Vec<f64>], sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let mut buffer = Self::with_capacity(channels.len(), sample_rate, frames);
        for frame in 0..frames {
            for channel in channels {
                buffer.samples.push(channel.get(frame).copied().unwrap_or(0.0));
            }
        }
        buffer
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// True when the buffer holds no audio
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Get channel slice (non-interleaved view)
    pub fn get_channel(&self, channel: usize) -> Vec<f64> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
            .collect()
    }

    /// Split into planar channels
    pub fn to_channels(&self) -> Vec<Vec<f64>> {
        (0..self.channels).map(|ch| self.get_channel(ch)).collect()
    }

    /// Set channel data
    pub fn set_channel(&mut self, channel: usize, data: &[f64]) {
        if channel >= self.channels {
            return;
        }
        for (i, &sample) in data.iter().enumerate() {
            let idx = i * self.channels + channel;
            if idx < self.samples.len() {
                self.samples[idx] = sample;
            }
        }
    }

    /// Convert to mono (mean of all channels)
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }

        let samples = self
            .samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f64>() / self.channels as f64)
            .collect();

        AudioBuffer {
            samples,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// Convert to stereo. Mono is duplicated, wider layouts keep the first two channels.
    pub fn to_stereo(&self) -> AudioBuffer {
        match self.channels {
            2 => self.clone(),
            1 => AudioBuffer {
                samples: self.samples.iter().flat_map(|&s| [s, s]).collect(),
                channels: 2,
                sample_rate: self.sample_rate,
            },
            _ => AudioBuffer {
                samples: self
                    .samples
                    .chunks_exact(self.channels.max(1))
                    .flat_map(|frame| [frame[0], frame[1.min(frame.len() - 1)]])
                    .collect(),
                channels: 2,
                sample_rate: self.sample_rate,
            },
        }
    }

    /// Reshape to the requested channel count (1 or 2)
    pub fn conform_channels(&self, target: usize) -> OfflineResult<AudioBuffer> {
        match target {
            1 => Ok(self.to_mono()),
            2 => Ok(self.to_stereo()),
            other => Err(OfflineError::ChannelMismatch {
                expected: 2,
                actual: other,
            }),
        }
    }

    /// Apply gain
    pub fn apply_gain(&mut self, gain: f64) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Get peak level (linear)
    pub fn peak(&self) -> f64 {
        self.samples.iter().map(|s| s.abs()).fold(0.0, f64::max)
    }

    /// Get peak level (dB)
    pub fn peak_db(&self) -> f64 {
        let peak = self.peak();
        if peak <= 0.0 {
            -f64::INFINITY
        } else {
            20.0 * peak.log10()
        }
    }

    /// RMS level across all channels (dB)
    pub fn rms_db(&self) -> f64 {
        if self.samples.is_empty() {
            return -f64::INFINITY;
        }
        let mean_square =
            self.samples.iter().map(|s| s * s).sum::<f64>() / self.samples.len() as f64;
        if mean_square <= 0.0 {
            -f64::INFINITY
        } else {
            10.0 * mean_square.log10()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_audio_buffer_mono_to_stereo() {
        let mono = AudioBuffer {
            samples: vec![0.1, 0.2, 0.3],
            channels: 1,
            sample_rate: 48000,
        };
        let stereo = mono.to_stereo();
        assert_eq!(stereo.channels, 2);
        assert_eq!(stereo.samples, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_audio_buffer_stereo_to_mono() {
        let stereo = AudioBuffer {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            channels: 2,
            sample_rate: 44100,
        };
        let mono = stereo.to_mono();
        assert_eq!(mono.channels, 1);
        assert_relative_eq!(mono.samples[0], 0.5);
        assert_relative_eq!(mono.samples[1], 0.5);
    }

    #[test]
    fn test_conform_rejects_surround() {
        let buffer = AudioBuffer::new(2, 48000);
        assert!(buffer.conform_channels(6).is_err());
        assert_eq!(buffer.conform_channels(1).map(|b| b.channels).ok(), Some(1));
    }

    #[test]
    fn test_planar_round_trip() {
        let planar = vec![vec![0.1, 0.2], vec![-0.1, -0.2]];
        let buffer = AudioBuffer::from_channels(&planar, 48000);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.samples, vec![0.1, -0.1, 0.2, -0.2]);
        assert_eq!(buffer.to_channels(), planar);
    }

    #[test]
    fn test_audio_buffer_peak() {
        let buffer = AudioBuffer {
            samples: vec![0.25, -0.5, 0.1],
            channels: 1,
            sample_rate: 48000,
        };
        assert_relative_eq!(buffer.peak(), 0.5);
        assert_relative_eq!(buffer.peak_db(), -6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_buffer_levels() {
        let buffer = AudioBuffer::new(2, 48000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.rms_db(), -f64::INFINITY);
        assert_eq!(buffer.duration(), 0.0);
    }
}
