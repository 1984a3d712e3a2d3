//! Audio encoding module
//!
//! Supports:
//! - WAV (via hound), native, no external dependencies
//! - AIFF (custom Rust), native, no external dependencies
//! - FLAC (via flacenc), pure Rust
//! - MP3 (via mp3lame-encoder), native LAME

use crate::buffer::AudioBuffer;
use crate::error::{OfflineError, OfflineResult};
use crate::formats::{AiffConfig, DitheringMode, FlacConfig, Mp3Bitrate, Mp3Config, OutputFormat, WavConfig};

use std::io::Cursor;

use rand::Rng;

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio encoder trait
pub trait AudioEncoder: Send + Sync {
    /// Encode audio buffer to bytes
    fn encode(&self, buffer: &AudioBuffer) -> OfflineResult<Vec<u8>>;

    /// Get file extension
    fn extension(&self) -> &'static str;
}

fn check_layout(buffer: &AudioBuffer) -> OfflineResult<()> {
    if buffer.channels == 0 || buffer.sample_rate == 0 {
        return Err(OfflineError::EncodingError(format!(
            "Invalid buffer layout: {} ch @ {} Hz",
            buffer.channels, buffer.sample_rate
        )));
    }
    Ok(())
}

/// Full-scale integer value for a bit depth
fn full_scale(bits: u8) -> f64 {
    ((1i64 << (bits - 1)) - 1) as f64
}

fn quantize(sample: f64, bits: u8) -> i32 {
    (sample.clamp(-1.0, 1.0) * full_scale(bits)).round() as i32
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// WAV encoder using hound
pub struct WavEncoder {
    config: WavConfig,
}

impl WavEncoder {
    pub fn new(config: WavConfig) -> Self {
        Self { config }
    }
}

impl AudioEncoder for WavEncoder {
    fn encode(&self, buffer: &AudioBuffer) -> OfflineResult<Vec<u8>> {
        check_layout(buffer)?;
        let float = self.config.float && self.config.bit_depth == 32;
        if !matches!(self.config.bit_depth, 16 | 24 | 32) {
            return Err(OfflineError::ConfigError(format!(
                "Unsupported bit depth: {}",
                self.config.bit_depth
            )));
        }

        let spec = hound::WavSpec {
            channels: buffer.channels as u16,
            sample_rate: buffer.sample_rate,
            bits_per_sample: self.config.bit_depth as u16,
            sample_format: if float {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        };

        let mut output = Vec::new();
        let mut writer = hound::WavWriter::new(Cursor::new(&mut output), spec)
            .map_err(|e| OfflineError::EncodingError(e.to_string()))?;

        if float {
            for &sample in &buffer.samples {
                writer
                    .write_sample(sample as f32)
                    .map_err(|e| OfflineError::EncodingError(e.to_string()))?;
            }
        } else {
            let bits = self.config.bit_depth;
            for sample in apply_dithering(&buffer.samples, bits, self.config.dithering) {
                let q = quantize(sample, bits);
                let result = if bits == 16 {
                    writer.write_sample(q as i16)
                } else {
                    writer.write_sample(q)
                };
                result.map_err(|e| OfflineError::EncodingError(e.to_string()))?;
            }
        }

        writer
            .finalize()
            .map_err(|e| OfflineError::EncodingError(e.to_string()))?;

        Ok(output)
    }

    fn extension(&self) -> &'static str {
        "wav"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLAC ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// FLAC encoder using flacenc
pub struct FlacEncoder {
    config: FlacConfig,
}

impl FlacEncoder {
    pub fn new(config: FlacConfig) -> Self {
        Self { config }
    }
}

impl AudioEncoder for FlacEncoder {
    fn encode(&self, buffer: &AudioBuffer) -> OfflineResult<Vec<u8>> {
        use flacenc::bitsink::ByteSink;
        use flacenc::component::BitRepr;
        use flacenc::error::Verify;
        use flacenc::source::MemSource;

        check_layout(buffer)?;
        let bits = self.config.bit_depth;
        if !matches!(bits, 16 | 24) {
            return Err(OfflineError::ConfigError(format!(
                "Unsupported FLAC bit depth: {}",
                bits
            )));
        }

        let pcm: Vec<i32> = apply_dithering(&buffer.samples, bits, self.config.dithering)
            .into_iter()
            .map(|s| quantize(s, bits))
            .collect();

        let mut encoder_config = flacenc::config::Encoder::default();
        if self.config.block_size > 0 {
            encoder_config.block_size = self.config.block_size;
        }
        let encoder_config = encoder_config
            .into_verified()
            .map_err(|(_, err)| OfflineError::ConfigError(format!("FLAC config: {:?}", err)))?;
        let block_size = encoder_config.block_size;

        let source = MemSource::from_samples(
            &pcm,
            buffer.channels,
            bits as usize,
            buffer.sample_rate as usize,
        );
        let stream = flacenc::encode_with_fixed_block_size(&encoder_config, source, block_size)
            .map_err(|e| OfflineError::EncodingError(format!("FLAC encode failed: {:?}", e)))?;

        let mut sink = ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| OfflineError::EncodingError(format!("FLAC write failed: {:?}", e)))?;

        Ok(sink.as_slice().to_vec())
    }

    fn extension(&self) -> &'static str {
        "flac"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AIFF ENCODER (native Rust implementation)
// ═══════════════════════════════════════════════════════════════════════════════

/// AIFF encoder. Big-endian PCM in FORM/COMM/SSND chunks.
pub struct AiffEncoder {
    config: AiffConfig,
}

impl AiffEncoder {
    pub fn new(config: AiffConfig) -> Self {
        Self { config }
    }

    /// 80-bit IEEE 754 extended precision, as required by the COMM sample rate field
    fn f64_to_extended(value: f64) -> [u8; 10] {
        let mut result = [0u8; 10];
        if value == 0.0 {
            return result;
        }

        let bits = value.to_bits();
        let sign = ((bits >> 63) & 1) as u16;
        let exp = ((bits >> 52) & 0x7FF) as i32;
        let mantissa = bits & 0x000F_FFFF_FFFF_FFFF;

        let extended_exp = if exp == 0 { 0 } else { (exp - 1023 + 16383) as u16 };
        let head = (sign << 15) | extended_exp;
        let extended_mantissa = if exp != 0 {
            0x8000_0000_0000_0000u64 | (mantissa << 11)
        } else {
            mantissa << 12
        };

        result[..2].copy_from_slice(&head.to_be_bytes());
        result[2..].copy_from_slice(&extended_mantissa.to_be_bytes());
        result
    }
}

impl AudioEncoder for AiffEncoder {
    fn encode(&self, buffer: &AudioBuffer) -> OfflineResult<Vec<u8>> {
        check_layout(buffer)?;
        let bit_depth = self.config.bit_depth;
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(OfflineError::ConfigError(format!(
                "Unsupported AIFF bit depth: {}",
                bit_depth
            )));
        }

        let channels = buffer.channels as u16;
        let bytes_per_sample = (bit_depth / 8) as u32;
        let num_frames = buffer.frames() as u32;
        let sound_data_size = num_frames * channels as u32 * bytes_per_sample;

        let comm_chunk_size: u32 = 18;
        let ssnd_chunk_size: u32 = 8 + sound_data_size;
        let form_size: u32 = 4 + 8 + comm_chunk_size + 8 + ssnd_chunk_size;

        let mut output = Vec::with_capacity(form_size as usize + 8);

        // FORM container
        output.extend_from_slice(b"FORM");
        output.extend_from_slice(&form_size.to_be_bytes());
        output.extend_from_slice(b"AIFF");

        // COMM
        output.extend_from_slice(b"COMM");
        output.extend_from_slice(&comm_chunk_size.to_be_bytes());
        output.extend_from_slice(&channels.to_be_bytes());
        output.extend_from_slice(&num_frames.to_be_bytes());
        output.extend_from_slice(&(bit_depth as u16).to_be_bytes());
        output.extend_from_slice(&Self::f64_to_extended(buffer.sample_rate as f64));

        // SSND: offset and block size are always zero
        output.extend_from_slice(b"SSND");
        output.extend_from_slice(&ssnd_chunk_size.to_be_bytes());
        output.extend_from_slice(&0u32.to_be_bytes());
        output.extend_from_slice(&0u32.to_be_bytes());

        let usable = num_frames as usize * buffer.channels;
        let dithered = apply_dithering(&buffer.samples[..usable], bit_depth, self.config.dithering);
        for sample in dithered {
            let bytes = quantize(sample, bit_depth).to_be_bytes();
            match bit_depth {
                16 => output.extend_from_slice(&bytes[2..4]),
                24 => output.extend_from_slice(&bytes[1..4]),
                _ => output.extend_from_slice(&bytes),
            }
        }

        if output.len() % 2 != 0 {
            output.push(0);
        }

        Ok(output)
    }

    fn extension(&self) -> &'static str {
        "aiff"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MP3 ENCODER (Native LAME)
// ═══════════════════════════════════════════════════════════════════════════════

/// Native MP3 encoder using LAME via mp3lame-encoder crate
/// Supports CBR (96–320 kbps) and VBR (quality 0-9)
pub struct LameMp3Encoder {
    config: Mp3Config,
}

impl LameMp3Encoder {
    pub fn new(config: Mp3Config) -> Self {
        Self { config }
    }

    fn lame_bitrate(&self) -> mp3lame_encoder::Bitrate {
        use mp3lame_encoder::Bitrate;
        match self.config.bitrate {
            Mp3Bitrate::Cbr(kbps) => match kbps {
                0..=111 => Bitrate::Kbps96,
                112..=127 => Bitrate::Kbps112,
                128..=159 => Bitrate::Kbps128,
                160..=191 => Bitrate::Kbps160,
                192..=223 => Bitrate::Kbps192,
                224..=255 => Bitrate::Kbps224,
                256..=319 => Bitrate::Kbps256,
                _ => Bitrate::Kbps320,
            },
            Mp3Bitrate::Vbr(_) => Bitrate::Kbps320,
        }
    }

    fn lame_quality(&self) -> mp3lame_encoder::Quality {
        use mp3lame_encoder::Quality;
        match self.config.bitrate {
            Mp3Bitrate::Vbr(q) => match q {
                0 => Quality::Best,
                1 => Quality::SecondBest,
                2 => Quality::NearBest,
                3 => Quality::VeryNice,
                4 => Quality::Nice,
                5 => Quality::Good,
                6 => Quality::Decent,
                7 => Quality::Ok,
                8 => Quality::SecondWorst,
                _ => Quality::Worst,
            },
            Mp3Bitrate::Cbr(_) => Quality::Best,
        }
    }
}

impl AudioEncoder for LameMp3Encoder {
    fn encode(&self, buffer: &AudioBuffer) -> OfflineResult<Vec<u8>> {
        use mp3lame_encoder::{Builder, DualPcm, FlushNoGap};

        check_layout(buffer)?;
        if buffer.channels > 2 {
            return Err(OfflineError::ChannelMismatch {
                expected: 2,
                actual: buffer.channels,
            });
        }

        let lame_err = |what: &str, e: &dyn std::fmt::Debug| {
            OfflineError::EncodingError(format!("LAME {} failed: {:?}", what, e))
        };

        let mut builder = Builder::new()
            .ok_or_else(|| OfflineError::EncodingError("LAME encoder init failed".to_string()))?;
        builder
            .set_num_channels(buffer.channels as u8)
            .map_err(|e| lame_err("set channels", &e))?;
        builder
            .set_sample_rate(buffer.sample_rate)
            .map_err(|e| lame_err("set sample rate", &e))?;
        builder
            .set_brate(self.lame_bitrate())
            .map_err(|e| lame_err("set bitrate", &e))?;
        builder
            .set_quality(self.lame_quality())
            .map_err(|e| lame_err("set quality", &e))?;
        let mut encoder = builder.build().map_err(|e| lame_err("build", &e))?;

        // LAME takes 16-bit PCM; mono streams ignore the right plane
        let num_frames = buffer.frames();
        let mut left: Vec<i16> = Vec::with_capacity(num_frames);
        let mut right: Vec<i16> = Vec::with_capacity(num_frames);
        for frame in buffer.samples.chunks_exact(buffer.channels) {
            left.push(quantize(frame[0], 16) as i16);
            right.push(quantize(frame[frame.len() - 1], 16) as i16);
        }

        let mut mp3_output: Vec<u8> =
            Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(num_frames));

        let encoded_size = encoder
            .encode(
                DualPcm {
                    left: &left,
                    right: &right,
                },
                mp3_output.spare_capacity_mut(),
            )
            .map_err(|e| lame_err("encode", &e))?;

        // SAFETY: encoder wrote encoded_size bytes into spare capacity
        unsafe {
            mp3_output.set_len(encoded_size);
        }

        mp3_output.reserve(7200);
        let flush_size = encoder
            .flush::<FlushNoGap>(mp3_output.spare_capacity_mut())
            .map_err(|e| lame_err("flush", &e))?;

        // SAFETY: encoder wrote flush_size bytes into spare capacity
        unsafe {
            mp3_output.set_len(mp3_output.len() + flush_size);
        }

        Ok(mp3_output)
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODER FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Create encoder for output format
pub fn create_encoder(format: &OutputFormat) -> Box<dyn AudioEncoder> {
    match format {
        OutputFormat::Wav(config) => Box::new(WavEncoder::new(config.clone())),
        OutputFormat::Aiff(config) => Box::new(AiffEncoder::new(config.clone())),
        OutputFormat::Flac(config) => Box::new(FlacEncoder::new(config.clone())),
        OutputFormat::Mp3(config) => Box::new(LameMp3Encoder::new(config.clone())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DITHERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Apply dithering for bit depth reduction
fn apply_dithering(samples: &[f64], target_bits: u8, mode: DitheringMode) -> Vec<f64> {
    if target_bits >= 32 {
        return samples.to_vec();
    }
    let step = 1.0 / full_scale(target_bits);
    let mut rng = rand::rng();

    match mode {
        DitheringMode::None => samples.to_vec(),
        DitheringMode::Rectangular => samples
            .iter()
            .map(|&s| s + (rng.random_range(0.0..1.0) - 0.5) * step)
            .collect(),
        DitheringMode::Triangular => samples
            .iter()
            .map(|&s| {
                // TPDF: sum of two uniform random values
                let r1: f64 = rng.random_range(0.0..1.0);
                let r2: f64 = rng.random_range(0.0..1.0);
                s + (r1 + r2 - 1.0) * step
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AudioDecoder;

    fn sine(channels: usize, sample_rate: u32, frames: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::with_capacity(channels, sample_rate, frames);
        for i in 0..frames {
            let s = 0.4 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / sample_rate as f64).sin();
            for _ in 0..channels {
                buffer.samples.push(s);
            }
        }
        buffer
    }

    #[test]
    fn test_wav_encoder() {
        let buffer = AudioBuffer {
            samples: vec![0.5, -0.5, 0.25, -0.25],
            channels: 2,
            sample_rate: 44100,
        };

        let data = WavEncoder::new(WavConfig::default()).encode(&buffer).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
    }

    #[test]
    fn test_wav_rejects_odd_depth() {
        let encoder = WavEncoder::new(WavConfig { bit_depth: 12, ..Default::default() });
        assert!(encoder.encode(&sine(1, 48000, 16)).is_err());
    }

    #[test]
    fn test_aiff_header() {
        let buffer = sine(2, 48000, 100);
        let data = AiffEncoder::new(AiffConfig::default()).encode(&buffer).unwrap();
        assert_eq!(&data[0..4], b"FORM");
        assert_eq!(&data[8..12], b"AIFF");
        // 54 header bytes + 100 frames * 2 ch * 3 bytes
        assert_eq!(data.len(), 54 + 600);
    }

    #[test]
    fn test_extended_sample_rate() {
        // 44100 Hz in 80-bit extended
        let bytes = AiffEncoder::f64_to_extended(44100.0);
        assert_eq!(bytes[0..2], [0x40, 0x0E]);
        assert_eq!(bytes[2], 0xAC);
    }

    #[test]
    fn test_flac_round_trip_layout() {
        let buffer = sine(2, 48000, 9600);
        let data = FlacEncoder::new(FlacConfig::default()).encode(&buffer).unwrap();
        assert_eq!(&data[0..4], b"fLaC");

        let decoded = AudioDecoder::decode_bytes(data, Some("flac")).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.frames(), 9600);
    }

    #[test]
    fn test_mp3_round_trip_layout() {
        let buffer = sine(2, 44100, 44100);
        let data = LameMp3Encoder::new(Mp3Config::default()).encode(&buffer).unwrap();
        assert!(!data.is_empty());

        let decoded = AudioDecoder::decode_bytes(data, Some("mp3")).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 44100);
    }

    #[test]
    fn test_factory_extension() {
        for name in ["wav", "aiff", "flac", "mp3"] {
            let format = OutputFormat::parse(name, None).unwrap();
            assert_eq!(create_encoder(&format).extension(), name);
        }
    }

    #[test]
    fn test_dither_stays_within_step() {
        let input = vec![0.0; 1000];
        let out = apply_dithering(&input, 16, DitheringMode::Triangular);
        let step = 1.0 / full_scale(16);
        assert!(out.iter().all(|s| s.abs() <= step));
    }
}
