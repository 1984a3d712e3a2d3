//! Processing and engine configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Supported output sample rates
pub const SUPPORTED_SAMPLE_RATES: [u32; 3] = [44100, 48000, 96000];

/// Supported upscale factors
pub const SUPPORTED_UPSCALE_FACTORS: [u8; 3] = [1, 2, 4];

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSING MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Selects the stage sequence of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Spectral gate + resample, no models
    Quick,
    /// Neural denoise and super-resolution
    Standard,
    /// Adds separation, restoration and mastering
    Extreme,
}

impl Default for ProcessingMode {
    fn default() -> Self {
        Self::Standard
    }
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Extreme => "extreme",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "extreme" => Ok(Self::Extreme),
            other => Err(EngineError::InvalidConfig(format!("unknown mode '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOISE PROFILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Spectral gate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseProfile {
    Auto,
    Aggressive,
    Gentle,
}

impl Default for NoiseProfile {
    fn default() -> Self {
        Self::Auto
    }
}

impl NoiseProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Aggressive => "aggressive",
            Self::Gentle => "gentle",
        }
    }
}

impl fmt::Display for NoiseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseProfile {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "aggressive" => Ok(Self::Aggressive),
            "gentle" => Ok(Self::Gentle),
            other => Err(EngineError::InvalidConfig(format!("unknown noise profile '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSING CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-job parameters, captured at submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Denoise strength (0 - 100)
    pub denoise_strength: u8,
    /// Slower, higher-resolution processing
    pub high_precision: bool,
    /// 1, 2 or 4
    pub upscale_factor: u8,
    /// 44100, 48000 or 96000
    pub target_sample_rate: u32,
    /// 1 or 2
    pub target_channels: usize,
    pub noise_profile: NoiseProfile,
    pub mode: ProcessingMode,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            denoise_strength: 85,
            high_precision: true,
            upscale_factor: 2,
            target_sample_rate: 48000,
            target_channels: 2,
            noise_profile: NoiseProfile::Auto,
            mode: ProcessingMode::Standard,
        }
    }
}

impl ProcessingConfig {
    /// Set processing mode
    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set denoise strength (0 - 100)
    pub fn denoise_strength(mut self, strength: u8) -> Self {
        self.denoise_strength = strength;
        self
    }

    /// Set precision toggle
    pub fn high_precision(mut self, enabled: bool) -> Self {
        self.high_precision = enabled;
        self
    }

    /// Set upscale factor
    pub fn upscale_factor(mut self, factor: u8) -> Self {
        self.upscale_factor = factor;
        self
    }

    /// Set output sample rate
    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = rate;
        self
    }

    /// Set output channel count
    pub fn target_channels(mut self, channels: usize) -> Self {
        self.target_channels = channels;
        self
    }

    /// Set noise profile
    pub fn noise_profile(mut self, profile: NoiseProfile) -> Self {
        self.noise_profile = profile;
        self
    }

    /// Denoise strength as 0.0 - 1.0
    pub fn strength_fraction(&self) -> f64 {
        self.denoise_strength.min(100) as f64 / 100.0
    }

    /// Validate ranges
    pub fn validate(&self) -> EngineResult<()> {
        if self.denoise_strength > 100 {
            return Err(EngineError::InvalidConfig(format!(
                "denoise strength {} outside 0..=100",
                self.denoise_strength
            )));
        }
        if !SUPPORTED_UPSCALE_FACTORS.contains(&self.upscale_factor) {
            return Err(EngineError::InvalidConfig(format!(
                "upscale factor {} not in {:?}",
                self.upscale_factor, SUPPORTED_UPSCALE_FACTORS
            )));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.target_sample_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "sample rate {} not in {:?}",
                self.target_sample_rate, SUPPORTED_SAMPLE_RATES
            )));
        }
        if !(1..=2).contains(&self.target_channels) {
            return Err(EngineError::InvalidConfig(format!(
                "channel count {} must be 1 or 2",
                self.target_channels
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding model files and `manifest.json`
    pub model_dir: PathBuf,
    /// Directory for stored results (None = memory)
    pub artifact_dir: Option<PathBuf>,
    /// Neural inference segment length (seconds)
    pub segment_seconds: f64,
    /// Stack size of job threads (bytes)
    pub job_stack_size: usize,
    /// Defaults for submissions that don't override them
    pub defaults: ProcessingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            artifact_dir: None,
            segment_seconds: 10.0,
            job_stack_size: 8 * 1024 * 1024,
            defaults: ProcessingConfig::default(),
        }
    }
}

fn default_model_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reelforge")
        .join("models")
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `RF_RESTORE_*` environment overrides
    pub fn from_env() -> EngineResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `RF_RESTORE_*` overrides from any key lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(key: &str, value: &str) -> EngineResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| EngineError::InvalidConfig(format!("{}='{}' is not valid", key, value)))
        }

        if let Some(dir) = lookup("RF_RESTORE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("RF_RESTORE_ARTIFACT_DIR") {
            self.artifact_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = lookup("RF_RESTORE_MODE") {
            self.defaults.mode = mode.parse()?;
        }
        if let Some(v) = lookup("RF_RESTORE_DENOISE_STRENGTH") {
            self.defaults.denoise_strength = parse("RF_RESTORE_DENOISE_STRENGTH", &v)?;
        }
        if let Some(v) = lookup("RF_RESTORE_SAMPLE_RATE") {
            self.defaults.target_sample_rate = parse("RF_RESTORE_SAMPLE_RATE", &v)?;
        }
        if let Some(v) = lookup("RF_RESTORE_CHANNELS") {
            self.defaults.target_channels = parse("RF_RESTORE_CHANNELS", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate engine and default processing settings
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.segment_seconds > 0.0 && self.segment_seconds <= 60.0) {
            return Err(EngineError::InvalidConfig(format!(
                "segment length {} s outside (0, 60]",
                self.segment_seconds
            )));
        }
        if self.job_stack_size < 64 * 1024 {
            return Err(EngineError::InvalidConfig(format!(
                "job stack size {} too small",
                self.job_stack_size
            )));
        }
        self.defaults.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_processing_defaults() {
        let config = ProcessingConfig::default();
        assert_eq!(config.mode, ProcessingMode::Standard);
        assert_eq!(config.denoise_strength, 85);
        assert!(config.high_precision);
        assert_eq!(config.upscale_factor, 2);
        assert_eq!(config.target_sample_rate, 48000);
        assert_eq!(config.target_channels, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        assert!(ProcessingConfig::default().denoise_strength(101).validate().is_err());
        assert!(ProcessingConfig::default().upscale_factor(3).validate().is_err());
        assert!(ProcessingConfig::default().target_sample_rate(22050).validate().is_err());
        assert!(ProcessingConfig::default().target_channels(6).validate().is_err());
        assert!(ProcessingConfig::default().target_channels(0).validate().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Extreme".parse::<ProcessingMode>().unwrap(), ProcessingMode::Extreme);
        assert!("turbo".parse::<ProcessingMode>().is_err());
        assert_eq!("gentle".parse::<NoiseProfile>().unwrap(), NoiseProfile::Gentle);
    }

    #[test]
    fn test_serde_lowercase_and_defaults() {
        let config: ProcessingConfig =
            serde_json::from_str(r#"{"mode":"quick","denoise_strength":40}"#).unwrap();
        assert_eq!(config.mode, ProcessingMode::Quick);
        assert_eq!(config.denoise_strength, 40);
        assert_eq!(config.target_sample_rate, 48000);

        assert!(serde_json::from_str::<ProcessingConfig>(r#"{"mode":"turbo"}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RF_RESTORE_MODEL_DIR", "/opt/models"),
            ("RF_RESTORE_MODE", "extreme"),
            ("RF_RESTORE_DENOISE_STRENGTH", "60"),
            ("RF_RESTORE_CHANNELS", "1"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.defaults.mode, ProcessingMode::Extreme);
        assert_eq!(config.defaults.denoise_strength, 60);
        assert_eq!(config.defaults.target_channels, 1);
        assert_eq!(config.defaults.target_sample_rate, 48000);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let result = EngineConfig::default()
            .with_overrides(|k| (k == "RF_RESTORE_SAMPLE_RATE").then(|| "fast".to_string()));
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));

        let result = EngineConfig::default()
            .with_overrides(|k| (k == "RF_RESTORE_SAMPLE_RATE").then(|| "22050".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"model_dir":"/srv/models","segment_seconds":5.0,"defaults":{"mode":"quick"}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.segment_seconds, 5.0);
        assert_eq!(config.defaults.mode, ProcessingMode::Quick);
        assert_eq!(config.artifact_dir, None);
    }
}
