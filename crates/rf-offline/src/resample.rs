//! Sample rate conversion (rubato, windowed sinc)

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::{OfflineError, OfflineResult};

/// Sample rate conversion quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrcQuality {
    /// Fast, lower quality
    Quick,
    /// Medium quality
    Medium,
    /// Best quality (slower)
    Best,
}

impl Default for SrcQuality {
    fn default() -> Self {
        Self::Medium
    }
}

impl SrcQuality {
    fn parameters(self) -> SincInterpolationParameters {
        let (sinc_len, oversampling_factor) = match self {
            Self::Quick => (64, 64),
            Self::Medium => (128, 128),
            Self::Best => (256, 256),
        };
        SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        }
    }
}

const CHUNK_FRAMES: usize = 1024;

fn append(output: &mut [Vec<f64>], chunk: Vec<Vec<f64>>) {
    for (dst, src) in output.iter_mut().zip(chunk) {
        dst.extend_from_slice(&src);
    }
}

/// Resample to `target_rate`. Output length is `ceil(frames * ratio)` with the
/// filter delay removed, so the result stays time-aligned with the input.
pub fn resample(buffer: &AudioBuffer, target_rate: u32, quality: SrcQuality) -> OfflineResult<AudioBuffer> {
    if target_rate == 0 {
        return Err(OfflineError::SampleRateConversion("target rate is zero".into()));
    }
    if buffer.sample_rate == target_rate {
        return Ok(buffer.clone());
    }
    if buffer.is_empty() {
        return Ok(AudioBuffer::new(buffer.channels, target_rate));
    }
    if buffer.sample_rate == 0 {
        return Err(OfflineError::SampleRateConversion("source rate is zero".into()));
    }

    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let channels = buffer.channels;
    let input = buffer.to_channels();
    let frames = buffer.frames();
    let expected = (frames as f64 * ratio).ceil() as usize;

    let mut resampler = SincFixedIn::<f64>::new(ratio, 1.0, quality.parameters(), CHUNK_FRAMES, channels)
        .map_err(|e| OfflineError::SampleRateConversion(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut output: Vec<Vec<f64>> = vec![Vec::with_capacity(expected + delay); channels];

    let mut pos = 0;
    while pos + CHUNK_FRAMES <= frames {
        let chunk: Vec<&[f64]> = input.iter().map(|ch| &ch[pos..pos + CHUNK_FRAMES]).collect();
        let out = resampler
            .process(chunk.as_slice(), None)
            .map_err(|e| OfflineError::SampleRateConversion(e.to_string()))?;
        append(&mut output, out);
        pos += CHUNK_FRAMES;
    }

    if pos < frames {
        let tail: Vec<&[f64]> = input.iter().map(|ch| &ch[pos..]).collect();
        let out = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| OfflineError::SampleRateConversion(e.to_string()))?;
        append(&mut output, out);
    }

    // Drain the filter until the delayed tail is out
    while output[0].len() < expected + delay {
        let out = resampler
            .process_partial(None::<&[&[f64]]>, None)
            .map_err(|e| OfflineError::SampleRateConversion(e.to_string()))?;
        if out.first().is_none_or(Vec::is_empty) {
            break;
        }
        append(&mut output, out);
    }

    let planar: Vec<Vec<f64>> = output
        .into_iter()
        .map(|ch| ch.into_iter().skip(delay).take(expected).collect())
        .collect();

    log::debug!(
        "Resampled {} Hz -> {} Hz ({} -> {} frames)",
        buffer.sample_rate,
        target_rate,
        frames,
        expected
    );
    Ok(AudioBuffer::from_channels(&planar, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, frames: usize, channels: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::with_capacity(channels, rate, frames);
        for i in 0..frames {
            let s = 0.5 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate as f64).sin();
            for _ in 0..channels {
                buffer.samples.push(s);
            }
        }
        buffer
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = sine(48000, 1000, 2);
        assert_eq!(resample(&input, 48000, SrcQuality::Quick).unwrap(), input);
    }

    #[test]
    fn test_upsample_length_and_layout() {
        let input = sine(44100, 44100, 2);
        let out = resample(&input, 48000, SrcQuality::Medium).unwrap();
        assert_eq!(out.sample_rate, 48000);
        assert_eq!(out.channels, 2);
        assert_eq!(out.frames(), 48000);
    }

    #[test]
    fn test_short_input_is_flushed() {
        // Shorter than one chunk
        let input = sine(24000, 300, 1);
        let out = resample(&input, 48000, SrcQuality::Quick).unwrap();
        assert_eq!(out.frames(), 600);
        // Energy survives the delay trim
        assert!(out.peak() > 0.3);
    }

    #[test]
    fn test_empty_input() {
        let out = resample(&AudioBuffer::new(2, 44100), 96000, SrcQuality::Best).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.sample_rate, 96000);
    }
}
