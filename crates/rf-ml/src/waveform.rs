//! Segmented waveform inference
//!
//! Long signals are cut into fixed-size segments with a short overlap,
//! run through the model one segment at a time and stitched back with a
//! linear crossfade over the overlap. The last segment is zero-padded and
//! the output is trimmed to `ceil(len * ratio)` samples.

use crate::error::{MlError, MlResult};
use crate::inference::SegmentModel;
use crate::models::ModelSpec;

/// Default overlap as a fraction of the segment
const OVERLAP_DIVISOR: usize = 16;

/// Runs a [`SegmentModel`] over whole channels
pub struct WaveformModel {
    model: Box<dyn SegmentModel>,
    spec: ModelSpec,
    overlap_frames: usize,
}

impl WaveformModel {
    /// Wrap a segment model
    pub fn new(model: Box<dyn SegmentModel>, spec: ModelSpec) -> Self {
        let overlap_frames = model.segment_frames() / OVERLAP_DIVISOR;
        Self {
            model,
            spec,
            overlap_frames,
        }
    }

    /// Override the segment overlap (clamped to half a segment)
    pub fn with_overlap(mut self, frames: usize) -> Self {
        self.overlap_frames = frames.min(self.model.segment_frames() / 2);
        self
    }

    /// Model description
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Process one channel at the model's input rate.
    /// `progress` receives the completed fraction (0.0 - 1.0).
    pub fn process_channel(&self, samples: &[f32], progress: &mut dyn FnMut(f64)) -> MlResult<Vec<f32>> {
        let seg = self.model.segment_frames();
        if seg == 0 {
            return Err(MlError::InferenceFailed {
                reason: "model reports zero-length segments".into(),
            });
        }
        if samples.is_empty() {
            progress(1.0);
            return Ok(Vec::new());
        }

        let ratio = self.spec.rate_ratio();
        let overlap = self.overlap_frames.min(seg / 2);
        let step = seg - overlap;
        let out_seg = (seg as f64 * ratio).round() as usize;
        let expected = (samples.len() as f64 * ratio).ceil() as usize;
        let count = if samples.len() <= seg {
            1
        } else {
            (samples.len() - seg).div_ceil(step) + 1
        };

        let mut output: Vec<f32> = Vec::with_capacity(expected + out_seg);
        let mut segment = vec![0.0f32; seg];

        for k in 0..count {
            let start = k * step;
            let available = samples.len().saturating_sub(start).min(seg);
            segment[..available].copy_from_slice(&samples[start..start + available]);
            segment[available..].fill(0.0);

            let result = self.model.run_segment(&segment)?;
            if result.len() != out_seg {
                return Err(MlError::InvalidOutputShape {
                    expected: format!("{} samples", out_seg),
                    got: format!("{} samples", result.len()),
                });
            }

            let out_start = (start as f64 * ratio).round() as usize;
            if output.len() < out_start {
                output.resize(out_start, 0.0);
            }
            let fade = output.len() - out_start;
            for (i, &v) in result.iter().enumerate() {
                if i < fade {
                    let t = (i + 1) as f32 / (fade + 1) as f32;
                    let pos = out_start + i;
                    output[pos] = output[pos] * (1.0 - t) + v * t;
                } else {
                    output.push(v);
                }
            }

            progress((k + 1) as f64 / count as f64);
        }

        output.truncate(expected);
        Ok(output)
    }

    /// Process planar channels in order, progress spread evenly across them
    pub fn process(&self, channels: &[Vec<f32>], progress: &mut dyn FnMut(f64)) -> MlResult<Vec<Vec<f32>>> {
        let total = channels.len().max(1) as f64;
        channels
            .iter()
            .enumerate()
            .map(|(ch, samples)| {
                self.process_channel(samples, &mut |p| progress((ch as f64 + p) / total))
            })
            .collect()
    }
}
