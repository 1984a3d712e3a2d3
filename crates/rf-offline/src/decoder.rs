//! Audio decoding module
//!
//! Uses symphonia for decoding multiple formats:
//! - WAV, AIFF (PCM)
//! - FLAC (lossless)
//! - MP3, OGG Vorbis, AAC (lossy)
//!
//! Files and in-memory byte streams go through the same decode loop, so an
//! exported artifact can be verified without touching the disk.

use crate::buffer::AudioBuffer;
use crate::error::{OfflineError, OfflineResult};

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

// ═══════════════════════════════════════════════════════════════════════════════
// DECODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Universal audio decoder using symphonia
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode audio file to AudioBuffer
    pub fn decode(path: &Path) -> OfflineResult<AudioBuffer> {
        if !path.exists() {
            return Err(OfflineError::InputNotFound(path.display().to_string()));
        }
        let file = File::open(path)
            .map_err(|e| OfflineError::ReadError(format!("Failed to open file: {}", e)))?;

        let buffer = Self::decode_source(Box::new(file), Self::hint_for(path))?;
        log::debug!(
            "Decoded {}: {} ch, {} Hz, {} frames",
            path.display(),
            buffer.channels,
            buffer.sample_rate,
            buffer.frames()
        );
        Ok(buffer)
    }

    /// Decode an encoded byte stream (e.g. an export) to AudioBuffer
    pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> OfflineResult<AudioBuffer> {
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }
        Self::decode_source(Box::new(Cursor::new(bytes)), hint)
    }

    fn hint_for(path: &Path) -> Hint {
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        hint
    }

    fn open_format(source: Box<dyn MediaSource>, hint: Hint) -> OfflineResult<Box<dyn FormatReader>> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| OfflineError::ReadError(format!("Failed to probe format: {}", e)))?;
        Ok(probed.format)
    }

    fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> OfflineResult<AudioBuffer> {
        let mut format = Self::open_format(source, hint)?;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| OfflineError::ReadError("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| OfflineError::ReadError(format!("Failed to create decoder: {}", e)))?;

        let mut samples: Vec<f64> = Vec::new();
        let mut scratch: Option<SampleBuffer<f64>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(OfflineError::ReadError(format!("Packet read error: {}", e)));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if channels == 0 {
                        channels = spec.channels.count();
                    }
                    if sample_rate == 0 {
                        sample_rate = spec.rate;
                    }

                    let needs_alloc = scratch
                        .as_ref()
                        .is_none_or(|buf| buf.capacity() < decoded.capacity() * spec.channels.count());
                    if needs_alloc {
                        scratch = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = scratch.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                // Corrupt frames are skipped, the rest of the stream stays usable
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    return Err(OfflineError::ReadError(format!("Decode error: {}", e)));
                }
            }
        }

        if channels == 0 || sample_rate == 0 {
            return Err(OfflineError::ReadError(
                "Stream reports no channels or sample rate".to_string(),
            ));
        }

        Ok(AudioBuffer {
            samples,
            channels,
            sample_rate,
        })
    }
}
