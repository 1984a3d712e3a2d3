//! Model-backed stage engines
//!
//! Every model works on its own sample rate. The stage resamples into
//! the model, runs it channel by channel through [`WaveformModel`] and
//! then shapes the result for the rest of the pipeline:
//!
//! - separator: back to the source rate
//! - denoiser: blended with the dry signal by the job's strength
//! - restorer: left at the model rate
//! - upscaler: conformed to the job's output rate and channel count

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use rf_ml::{InferenceEngine, MlResult, WaveformModel};
use rf_offline::{AudioBuffer, resample};

use crate::availability::ModelId;
use crate::engines::upscale::ResampleStage;
use crate::engines::{from_planar_f32, require_audio, to_planar_f32};
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput};

/// Strength ceiling without high precision (12 dB maximum attenuation)
const STANDARD_MAX_STRENGTH: f64 = 0.748_811_356_849_042;

/// Resolves a model id to a runnable model
pub trait ModelLoader: Send + Sync {
    fn load(&self, id: ModelId) -> MlResult<Arc<WaveformModel>>;
}

/// Loads ONNX files from the model directory, once per model
pub struct OnnxModelLoader {
    model_dir: PathBuf,
    segment_seconds: f64,
    cache: Mutex<HashMap<ModelId, Arc<WaveformModel>>>,
}

impl OnnxModelLoader {
    pub fn new<P: Into<PathBuf>>(model_dir: P, segment_seconds: f64) -> Self {
        Self {
            model_dir: model_dir.into(),
            segment_seconds,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, id: ModelId) -> MlResult<Arc<WaveformModel>> {
        let mut cache = self.cache.lock();
        if let Some(model) = cache.get(&id) {
            return Ok(Arc::clone(model));
        }

        let spec = id.spec();
        let segment_frames = ((self.segment_seconds * spec.input_rate as f64).round() as usize).max(1);
        let engine = InferenceEngine::load(self.model_dir.join(spec.file_name), segment_frames)?;
        let model = Arc::new(WaveformModel::new(Box::new(engine), spec));
        cache.insert(id, Arc::clone(&model));
        log::info!("Loaded {} ({}), {} frame segments", spec.label, spec.engine, segment_frames);
        Ok(model)
    }
}

/// Stage engine backed by one model
pub struct NeuralStage {
    model: ModelId,
    loader: Arc<dyn ModelLoader>,
}

impl NeuralStage {
    pub fn new(model: ModelId, loader: Arc<dyn ModelLoader>) -> Self {
        Self { model, loader }
    }

    /// Model this engine runs
    pub fn model(&self) -> ModelId {
        self.model
    }
}

/// Mix `wet` into `dry` sample by sample
fn blend(dry: &AudioBuffer, wet: &mut AudioBuffer, amount: f64) {
    for (w, &d) in wet.samples.iter_mut().zip(&dry.samples) {
        *w = amount * *w + (1.0 - amount) * d;
    }
}

impl StageEngine for NeuralStage {
    fn name(&self) -> &'static str {
        self.model.spec().engine
    }

    fn run(
        &self,
        input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        progress(0);
        let config = ctx.config;
        let model = self.loader.load(self.model)?;
        let spec = *model.spec();
        let source_rate = input.sample_rate;

        let dry = resample(&input, spec.input_rate, ResampleStage::quality(config))?;
        drop(input);
        progress(10);

        let planar = to_planar_f32(&dry);
        let processed = model.process(&planar, &mut |p| progress(10 + (p * 80.0) as u8))?;
        let mut output = from_planar_f32(&processed, spec.output_rate);
        progress(90);

        let mut strength = None;
        output = match self.model {
            ModelId::Separator => resample(&output, source_rate, ResampleStage::quality(config))?,
            ModelId::Denoiser => {
                let mut amount = config.strength_fraction();
                if !config.high_precision {
                    amount = amount.min(STANDARD_MAX_STRENGTH);
                }
                blend(&dry, &mut output, amount);
                strength = Some(amount);
                output
            }
            ModelId::Restorer => output,
            ModelId::Upscaler => ResampleStage::conform(&output, config)?,
        };
        progress(100);

        log::debug!(
            "[{}] {} ran at {} Hz, output {} Hz",
            ctx.job_id,
            spec.engine,
            spec.input_rate,
            output.sample_rate
        );

        let mut result = StageOutput::new(output)
            .with_detail("model", spec.file_name)
            .with_detail("model_rate", spec.input_rate);
        if let Some(amount) = strength {
            result = result.with_detail("strength", amount);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::engines::test_support::{noisy_tone, with_ctx};
    use crate::error::StageError;
    use crate::stage::{AudioSource, StageId};
    use approx::assert_relative_eq;
    use rf_ml::SegmentModel;

    /// Scales samples and repeats each one `repeat` times
    struct ScaleModel {
        gain: f32,
        repeat: usize,
    }

    impl SegmentModel for ScaleModel {
        fn run_segment(&self, input: &[f32]) -> MlResult<Vec<f32>> {
            Ok(input
                .iter()
                .flat_map(|&s| std::iter::repeat_n(s * self.gain, self.repeat))
                .collect())
        }

        fn segment_frames(&self) -> usize {
            4096
        }
    }

    /// Loader handing out scale models with the right rate ratio
    struct FakeLoader {
        gain: f32,
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, id: ModelId) -> MlResult<Arc<WaveformModel>> {
            let spec = id.spec();
            let repeat = spec.rate_ratio().round() as usize;
            Ok(Arc::new(WaveformModel::new(
                Box::new(ScaleModel { gain: self.gain, repeat }),
                spec,
            )))
        }
    }

    fn run(model: ModelId, gain: f32, config: &ProcessingConfig, input: &AudioBuffer) -> StageResult<StageOutput> {
        let stage = NeuralStage::new(model, Arc::new(FakeLoader { gain }));
        let source = AudioSource::Buffer(input.clone());
        with_ctx(StageId::Denoise, config, &source, |ctx| stage.run(input.clone(), ctx, &mut |_| {}))
    }

    #[test]
    fn test_denoiser_blends_by_strength() {
        let input = noisy_tone(2, 48000, 0.2);
        let config = ProcessingConfig::default().denoise_strength(50);
        // Model silences everything, so the output is the dry half
        let out = run(ModelId::Denoiser, 0.0, &config, &input).unwrap();
        assert_eq!(out.audio.sample_rate, 48000);
        assert_eq!(out.audio.frames(), input.frames());
        for (a, b) in input.samples.iter().zip(&out.audio.samples) {
            assert_relative_eq!(a * 0.5, *b, epsilon = 1e-6);
        }
        assert_eq!(out.metadata.details["strength"], 0.5);
    }

    #[test]
    fn test_denoiser_strength_capped_without_precision() {
        let input = noisy_tone(1, 48000, 0.1);
        let config = ProcessingConfig::default().denoise_strength(100).high_precision(false);
        let out = run(ModelId::Denoiser, 0.0, &config, &input).unwrap();
        let strength = out.metadata.details["strength"].as_f64().unwrap();
        assert_relative_eq!(strength, STANDARD_MAX_STRENGTH, epsilon = 1e-12);
    }

    #[test]
    fn test_upscaler_reaches_target_format() {
        let input = noisy_tone(1, 24000, 0.25);
        let config = ProcessingConfig::default();
        let stage = NeuralStage::new(ModelId::Upscaler, Arc::new(FakeLoader { gain: 1.0 }));
        assert_eq!(stage.name(), "AudioSR");

        let out = run(ModelId::Upscaler, 1.0, &config, &input).unwrap();
        assert_eq!(out.audio.sample_rate, 48000);
        assert_eq!(out.audio.channels, 2);
        assert_eq!(out.audio.frames(), 12000);
    }

    #[test]
    fn test_separator_returns_to_source_rate() {
        let input = noisy_tone(2, 48000, 0.2);
        let out = run(ModelId::Separator, 1.0, &ProcessingConfig::default(), &input).unwrap();
        assert_eq!(out.audio.sample_rate, 48000);
        assert_eq!(out.audio.channels, 2);
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(OnnxModelLoader::new(dir.path(), 1.0));
        let stage = NeuralStage::new(ModelId::Restorer, loader);
        let input = noisy_tone(1, 24000, 0.1);
        let source = AudioSource::Buffer(input.clone());
        let config = ProcessingConfig::default();
        let result = with_ctx(StageId::Restoration, &config, &source, |ctx| {
            stage.run(input.clone(), ctx, &mut |_| {})
        });
        assert!(matches!(result, Err(StageError::Inference(_))));
    }
}
