//! # ReelForge ML Inference
//!
//! Neural waveform models for restoration:
//! - Source separation (vocal isolation)
//! - Neural denoising
//! - Waveform restoration
//! - Super-resolution upscaling
//!
//! ## Architecture
//!
//! Uses pure Rust `tract` on the CPU. Every model is a waveform-in,
//! waveform-out graph run over fixed-size segments; the models themselves
//! are downloaded by an external collaborator and only loaded from disk here.

#![warn(missing_docs)]

pub mod models;

mod error;
mod inference;
mod waveform;

pub use error::{MlError, MlResult};
pub use inference::{InferenceEngine, SegmentModel};
pub use models::ModelSpec;
pub use waveform::WaveformModel;
