//! Ingest: decode the job source

use rf_offline::{AudioBuffer, AudioDecoder};

use crate::error::{StageError, StageResult};
use crate::stage::{AudioSource, StageContext, StageEngine, StageOutput};

/// Decodes the job source with symphonia. Ignores its input buffer.
pub struct IngestStage;

impl StageEngine for IngestStage {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn run(
        &self,
        _input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        progress(0);
        let audio = match ctx.source {
            AudioSource::File(path) => AudioDecoder::decode(path)?,
            AudioSource::Bytes { data, extension } => {
                AudioDecoder::decode_bytes(data.clone(), extension.as_deref())?
            }
            AudioSource::Buffer(buffer) => buffer.clone(),
        };

        if audio.channels == 0 || audio.is_empty() {
            return Err(StageError::InvalidInput("source contains no audio".into()));
        }
        if audio.samples.iter().any(|s| !s.is_finite()) {
            return Err(StageError::InvalidInput("source contains non-finite samples".into()));
        }

        log::debug!(
            "[{}] ingested {} ch, {} Hz, {:.2} s",
            ctx.job_id,
            audio.channels,
            audio.sample_rate,
            audio.duration()
        );
        progress(100);

        let duration = audio.duration();
        Ok(StageOutput::new(audio).with_detail("duration_seconds", duration))
    }
}
