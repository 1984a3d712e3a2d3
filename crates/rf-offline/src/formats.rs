//! Output format definitions
//!
//! Formats are chosen at export time from a `(name, quality)` pair, so the
//! same stored result can be materialized as WAV, AIFF, FLAC or MP3.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OfflineError, OfflineResult};

/// Output audio format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// WAV (PCM)
    Wav(WavConfig),

    /// AIFF (PCM)
    Aiff(AiffConfig),

    /// FLAC (lossless)
    Flac(FlacConfig),

    /// MP3 (lossy)
    Mp3(Mp3Config),
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Wav(WavConfig::default())
    }
}

impl OutputFormat {
    /// Parse a format name and optional quality string.
    ///
    /// | name | quality |
    /// |------|---------|
    /// | `wav` | `16`, `24` (default), `32`, `32f` |
    /// | `aiff` | `16`, `24` (default), `32` |
    /// | `flac` | `16`, `24` (default) |
    /// | `mp3` | CBR kbps `96`–`320` (default 320) or VBR `v0`–`v9` |
    pub fn parse(name: &str, quality: Option<&str>) -> OfflineResult<Self> {
        let quality = quality.map(str::trim).filter(|q| !q.is_empty());
        let bad_quality = |q: &str| {
            OfflineError::UnsupportedFormat(format!("{} quality '{}'", name, q))
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "wav" | "wave" => match quality {
                None | Some("24") => Ok(Self::wav_24()),
                Some("16") => Ok(Self::wav_16()),
                Some("32") => Ok(Self::Wav(WavConfig { bit_depth: 32, ..Default::default() })),
                Some("32f") | Some("float") => Ok(Self::wav_32f()),
                Some(q) => Err(bad_quality(q)),
            },
            "aiff" | "aif" => match quality {
                None | Some("24") => Ok(Self::aiff_24()),
                Some("16") => Ok(Self::aiff_16()),
                Some("32") => Ok(Self::Aiff(AiffConfig { bit_depth: 32, ..Default::default() })),
                Some(q) => Err(bad_quality(q)),
            },
            "flac" => match quality {
                None | Some("24") => Ok(Self::flac()),
                Some("16") => Ok(Self::Flac(FlacConfig { bit_depth: 16, ..Default::default() })),
                Some(q) => Err(bad_quality(q)),
            },
            "mp3" => match quality {
                None => Ok(Self::mp3_320()),
                Some(q) => {
                    if let Some(level) = q.strip_prefix(['v', 'V']) {
                        match level.parse::<u8>() {
                            Ok(level) if level <= 9 => Ok(Self::mp3_vbr(level)),
                            _ => Err(bad_quality(q)),
                        }
                    } else {
                        match q.trim_end_matches('k').parse::<u16>() {
                            Ok(kbps) if (96..=320).contains(&kbps) => {
                                Ok(Self::Mp3(Mp3Config { bitrate: Mp3Bitrate::Cbr(kbps) }))
                            }
                            _ => Err(bad_quality(q)),
                        }
                    }
                }
            },
            other => Err(OfflineError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav(_) => "wav",
            Self::Aiff(_) => "aiff",
            Self::Flac(_) => "flac",
            Self::Mp3(_) => "mp3",
        }
    }

    /// Create WAV 16-bit format
    pub fn wav_16() -> Self {
        Self::Wav(WavConfig { bit_depth: 16, ..Default::default() })
    }

    /// Create WAV 24-bit format
    pub fn wav_24() -> Self {
        Self::Wav(WavConfig::default())
    }

    /// Create WAV 32-bit float format
    pub fn wav_32f() -> Self {
        Self::Wav(WavConfig::float32())
    }

    /// Create FLAC format
    pub fn flac() -> Self {
        Self::Flac(FlacConfig::default())
    }

    /// Create MP3 320kbps format
    pub fn mp3_320() -> Self {
        Self::Mp3(Mp3Config::default())
    }

    /// Create MP3 VBR format
    pub fn mp3_vbr(quality: u8) -> Self {
        Self::Mp3(Mp3Config { bitrate: Mp3Bitrate::Vbr(quality) })
    }

    /// Create AIFF 16-bit format
    pub fn aiff_16() -> Self {
        Self::Aiff(AiffConfig { bit_depth: 16, ..Default::default() })
    }

    /// Create AIFF 24-bit format
    pub fn aiff_24() -> Self {
        Self::Aiff(AiffConfig::default())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wav(c) if c.float => write!(f, "WAV 32-bit float"),
            Self::Wav(c) => write!(f, "WAV {}-bit", c.bit_depth),
            Self::Aiff(c) => write!(f, "AIFF {}-bit", c.bit_depth),
            Self::Flac(c) => write!(f, "FLAC {}-bit", c.bit_depth),
            Self::Mp3(c) => match c.bitrate {
                Mp3Bitrate::Cbr(kbps) => write!(f, "MP3 {} kbps", kbps),
                Mp3Bitrate::Vbr(q) => write!(f, "MP3 V{}", q),
            },
        }
    }
}

/// Dithering algorithm for bit depth reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DitheringMode {
    /// No dithering (truncation)
    None,
    /// Rectangular PDF dither
    Rectangular,
    /// Triangular PDF dither (recommended)
    Triangular,
}

impl Default for DitheringMode {
    fn default() -> Self {
        Self::Triangular
    }
}

/// WAV configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavConfig {
    /// Bit depth (16, 24, 32)
    pub bit_depth: u8,
    /// Float format (for 32-bit)
    pub float: bool,
    /// Dithering mode (for bit depth reduction)
    pub dithering: DitheringMode,
}

impl WavConfig {
    /// 32-bit float, no dither. Used for lossless intermediate storage.
    pub fn float32() -> Self {
        Self {
            bit_depth: 32,
            float: true,
            dithering: DitheringMode::None,
        }
    }
}

impl Default for WavConfig {
    fn default() -> Self {
        Self {
            bit_depth: 24,
            float: false,
            dithering: DitheringMode::Triangular,
        }
    }
}

/// AIFF configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiffConfig {
    /// Bit depth (16, 24, 32)
    pub bit_depth: u8,
    /// Dithering mode
    pub dithering: DitheringMode,
}

impl Default for AiffConfig {
    fn default() -> Self {
        Self {
            bit_depth: 24,
            dithering: DitheringMode::Triangular,
        }
    }
}

/// FLAC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlacConfig {
    /// Bit depth (16 or 24)
    pub bit_depth: u8,
    /// Block size in frames (0 = encoder default)
    pub block_size: usize,
    /// Dithering mode (for bit depth reduction)
    pub dithering: DitheringMode,
}

impl Default for FlacConfig {
    fn default() -> Self {
        Self {
            bit_depth: 24,
            block_size: 0,
            dithering: DitheringMode::Triangular,
        }
    }
}

/// MP3 bitrate mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mp3Bitrate {
    /// Constant bitrate (kbps)
    Cbr(u16),
    /// Variable bitrate (quality 0-9, lower = better)
    Vbr(u8),
}

impl Default for Mp3Bitrate {
    fn default() -> Self {
        Self::Cbr(320)
    }
}

/// MP3 configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mp3Config {
    /// Bitrate mode
    pub bitrate: Mp3Bitrate,
}
