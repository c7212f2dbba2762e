//! Assemble drained frames into a playable WAV file. Convenience for
//! callers that collect a whole utterance instead of piping frames
//! onward.

use std::path::Path;

use anyhow::Context;

use crate::frame::AudioFrame;
use crate::{NUM_CHANNELS, SAMPLE_RATE};

fn spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: NUM_CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write frames as a 16-bit mono 32 kHz RIFF file.
pub fn write_wav(path: impl AsRef<Path>, frames: &[AudioFrame]) -> anyhow::Result<()> {
    let mut writer = hound::WavWriter::create(path.as_ref(), spec())
        .with_context(|| format!("creating {}", path.as_ref().display()))?;
    for frame in frames {
        for sample in frame.samples_i16() {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize().context("finalizing wav file")?;
    Ok(())
}
