//! ONNX inference engine (tract, pure Rust CPU backend)
//!
//! Models take one `[1, samples]` f32 waveform and return one waveform.
//! The input length is fixed at load time so tract can fully optimize the
//! graph; callers feed fixed-size segments (see [`crate::WaveformModel`]).

use std::path::{Path, PathBuf};

use crate::error::{MlError, MlResult};

/// Anything that maps one fixed-length segment to an output segment
pub trait SegmentModel: Send + Sync {
    /// Run one segment of exactly `segment_frames()` samples
    fn run_segment(&self, input: &[f32]) -> MlResult<Vec<f32>>;

    /// Input segment length in samples
    fn segment_frames(&self) -> usize;
}

/// Tract runnable plan
type TractPlan = tract_onnx::prelude::SimplePlan<
    tract_onnx::prelude::TypedFact,
    Box<dyn tract_onnx::prelude::TypedOp>,
    tract_onnx::prelude::Graph<tract_onnx::prelude::TypedFact, Box<dyn tract_onnx::prelude::TypedOp>>,
>;

/// Loaded ONNX waveform model
pub struct InferenceEngine {
    plan: TractPlan,
    path: PathBuf,
    segment_frames: usize,
}

impl InferenceEngine {
    /// Load and optimize a model for `[1, segment_frames]` input
    pub fn load<P: AsRef<Path>>(model_path: P, segment_frames: usize) -> MlResult<Self> {
        use tract_onnx::prelude::*;

        let path = model_path.as_ref();
        if !path.exists() {
            return Err(MlError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        if segment_frames == 0 {
            return Err(MlError::ModelLoadFailed {
                reason: "segment length must be non-zero".into(),
            });
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| MlError::TractError(e.to_string()))?
            .with_input_fact(0, f32::fact([1, segment_frames]).into())
            .map_err(|e| MlError::TractError(e.to_string()))?
            .into_optimized()
            .map_err(|e| MlError::TractError(e.to_string()))?
            .into_runnable()
            .map_err(|e| MlError::TractError(e.to_string()))?;

        log::info!(
            "Loaded model {} ({} frame segments)",
            path.display(),
            segment_frames
        );

        Ok(Self {
            plan,
            path: path.to_path_buf(),
            segment_frames,
        })
    }

    /// Model file this engine was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SegmentModel for InferenceEngine {
    fn run_segment(&self, input: &[f32]) -> MlResult<Vec<f32>> {
        use tract_onnx::prelude::*;

        if input.len() != self.segment_frames {
            return Err(MlError::InferenceFailed {
                reason: format!(
                    "segment has {} samples, model expects {}",
                    input.len(),
                    self.segment_frames
                ),
            });
        }

        let tensor = Tensor::from_shape(&[1, input.len()], input)
            .map_err(|e| MlError::TractError(e.to_string()))?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| MlError::TractError(e.to_string()))?;

        let first = outputs.first().ok_or_else(|| MlError::InferenceFailed {
            reason: "No output from model".into(),
        })?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| MlError::TractError(e.to_string()))?;
        Ok(view.iter().copied().collect())
    }

    fn segment_frames(&self) -> usize {
        self.segment_frames
    }
}
