//! Declip restoration (fallback for the neural restorer)

use rf_offline::AudioBuffer;
use rf_restore::{DeclipConfig, Declipper};

use crate::engines::require_audio;
use crate::error::StageResult;
use crate::stage::{StageContext, StageEngine, StageOutput, percent};

pub struct DeclipStage;

impl StageEngine for DeclipStage {
    fn name(&self) -> &'static str {
        "declip"
    }

    fn run(
        &self,
        mut input: AudioBuffer,
        ctx: &StageContext<'_>,
        progress: &mut dyn FnMut(u8),
    ) -> StageResult<StageOutput> {
        require_audio(&input)?;
        let quality = if ctx.config.high_precision { 3 } else { 1 };
        let declipper = Declipper::new(DeclipConfig {
            quality,
            ..Default::default()
        })?;

        let mut regions = 0;
        let mut repaired = 0;
        for ch in 0..input.channels {
            let mut samples = input.get_channel(ch);
            let stats = declipper.repair(&mut samples);
            regions += stats.regions_detected;
            repaired += stats.samples_repaired;
            input.set_channel(ch, &samples);
            progress(percent((ch + 1) as f64, input.channels));
        }

        Ok(StageOutput::new(input)
            .with_detail("regions", regions)
            .with_detail("samples_repaired", repaired))
    }
}
