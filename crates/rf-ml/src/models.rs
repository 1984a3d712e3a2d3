//! Known restoration models
//!
//! File names are relative to the model directory.

use serde::Serialize;

/// Static description of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Human label
    pub label: &'static str,
    /// Engine name reported in stage metadata
    pub engine: &'static str,
    /// ONNX file name
    pub file_name: &'static str,
    /// Sample rate the model consumes
    pub input_rate: u32,
    /// Sample rate the model produces
    pub output_rate: u32,
    /// Approximate download size (MB)
    pub size_mb: u32,
}

impl ModelSpec {
    /// Output samples per input sample
    pub fn rate_ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }
}

/// Vocal/instrumental separator (vocal stem out)
pub const SEPARATOR: ModelSpec = ModelSpec {
    label: "Dense Source Separator",
    engine: "UVR5-MDX",
    file_name: "uvr5_mdx_vocals.onnx",
    input_rate: 44100,
    output_rate: 44100,
    size_mb: 67,
};

/// Neural denoiser
pub const DENOISER: ModelSpec = ModelSpec {
    label: "Dense Neural Filter",
    engine: "DeepFilterNet3",
    file_name: "deepfilternet3.onnx",
    input_rate: 48000,
    output_rate: 48000,
    size_mb: 12,
};

/// Neural restoration of damaged content
pub const RESTORER: ModelSpec = ModelSpec {
    label: "Dense Waveform Restorer",
    engine: "VoiceRestore",
    file_name: "voicerestore.onnx",
    input_rate: 24000,
    output_rate: 24000,
    size_mb: 301,
};

/// Bandwidth-extension super-resolution
pub const UPSCALER: ModelSpec = ModelSpec {
    label: "Dense Diffusion Upscaler",
    engine: "AudioSR",
    file_name: "audiosr_basic.onnx",
    input_rate: 24000,
    output_rate: 48000,
    size_mb: 401,
};

/// Every known model
pub const ALL: [ModelSpec; 4] = [SEPARATOR, DENOISER, RESTORER, UPSCALER];
