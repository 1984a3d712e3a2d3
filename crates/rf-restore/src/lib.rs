//! ReelForge Restoration DSP
//!
//! Classical (model-free) restoration building blocks:
//!
//! ## Analysis
//! - Per-channel noise floor, dominant frequency and dynamic range
//! - Silence ratio for gate profile selection
//!
//! ## Spectral Gate
//! - Noise spectrum learned from the quietest frames
//! - Wiener gain with over-subtraction, smoothing and attenuation cap
//!
//! ## Declipping
//! - Hard clipping reconstruction using spline interpolation
//!
//! All processors work offline on whole `f64` channels.

#![warn(missing_docs)]

pub mod analysis;
pub mod declip;
pub mod denoise;

mod error;
mod spectrum;

pub use analysis::{ChannelProfile, SpectrumAnalyzer};
pub use declip::{DeclipConfig, DeclipStats, Declipper};
pub use denoise::{GateSettings, NoiseSpectrum, SpectralGate};
pub use error::{RestoreError, RestoreResult};
