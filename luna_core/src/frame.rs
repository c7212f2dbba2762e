use std::time::Duration;

use crate::{SAMPLE_RATE, SAMPLE_WIDTH};

/// One normalized unit of output audio: PCM16 little-endian samples
/// with a per-session sequence number. Sequence numbers delivered to
/// the caller strictly increase from 0 with no gaps or duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub seq: u64,
    /// PCM16-LE payload, always a whole number of samples.
    pub data: Vec<u8>,
    pub samples: usize,
}

impl AudioFrame {
    pub(crate) fn new(seq: u64, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len() % SAMPLE_WIDTH, 0);
        let samples = data.len() / SAMPLE_WIDTH;
        Self { seq, data, samples }
    }

    /// Playback duration at the fixed 32 kHz mono format.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / SAMPLE_RATE as f64)
    }

    /// Samples as i16, decoded from the little-endian payload.
    pub fn samples_i16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}
