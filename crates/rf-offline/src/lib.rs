//! RF-Offline: Offline audio I/O for the restoration engine
//!
//! Everything a restoration job needs around the actual repair work:
//! - Decoding any supported container into an interleaved f64 buffer
//! - Sample rate conversion (rubato)
//! - EBU R128 loudness metering, normalization and peak ceiling
//! - Encoding to WAV, AIFF, FLAC and MP3 at export time
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_offline::{AudioDecoder, OutputFormat, create_encoder};
//!
//! let buffer = AudioDecoder::decode(Path::new("/path/to/take.wav"))?;
//! let format = OutputFormat::parse("flac", Some("24"))?;
//! let bytes = create_encoder(&format).encode(&buffer)?;
//! ```

mod buffer;
mod decoder;
mod encoder;
mod error;
mod formats;
mod normalize;
mod resample;

pub use buffer::*;
pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub use formats::*;
pub use normalize::*;
pub use resample::*;
