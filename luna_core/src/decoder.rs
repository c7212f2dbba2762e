//! Chunk decoder: transport-framed byte chunks in, fixed-format audio
//! frames out.
//!
//! Chunk boundaries on the wire carry no meaning; they depend on how
//! the transport happened to flush. The decoder therefore re-frames
//! the byte stream into fixed 10 ms frames (320 samples at 32 kHz),
//! carrying unconsumed trailing bytes between calls. The resulting
//! frame sequence depends only on the bytes, never on how they were
//! fragmented.

use crate::error::TtsError;
use crate::frame::AudioFrame;
use crate::{FRAME_SAMPLES, NUM_CHANNELS, SAMPLE_RATE, SAMPLE_WIDTH};

const FRAME_BYTES: usize = FRAME_SAMPLES * SAMPLE_WIDTH;

#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    next_seq: u64,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any advertised format other than the fixed contract.
    /// No transcoding is attempted; a mismatch is a contract violation,
    /// not a recoverable condition.
    pub fn ensure_format(&self, sample_rate: u32, channels: u16) -> Result<(), TtsError> {
        if sample_rate != SAMPLE_RATE || channels != NUM_CHANNELS {
            return Err(TtsError::Decode(format!(
                "engine reported {sample_rate} Hz / {channels} ch, expected {SAMPLE_RATE} Hz / {NUM_CHANNELS} ch PCM16"
            )));
        }
        Ok(())
    }

    /// Feed one transport chunk; returns every complete frame it
    /// finishes. Trailing bytes stay buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_BYTES {
            let rest = self.pending.split_off(FRAME_BYTES);
            let data = std::mem::replace(&mut self.pending, rest);
            frames.push(self.emit(data));
        }
        frames
    }

    /// Drain the final partial frame at end of stream. A dangling odd
    /// byte means the engine truncated a sample mid-stream.
    pub fn flush(&mut self) -> Result<Option<AudioFrame>, TtsError> {
        if self.pending.len() % SAMPLE_WIDTH != 0 {
            return Err(TtsError::Decode(
                "stream ended in the middle of a 16-bit sample".to_string(),
            ));
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let data = std::mem::take(&mut self.pending);
        Ok(Some(self.emit(data)))
    }

    pub fn frames_produced(&self) -> u64 {
        self.next_seq
    }

    fn emit(&mut self, data: Vec<u8>) -> AudioFrame {
        let seq = self.next_seq;
        self.next_seq += 1;
        AudioFrame::new(seq, data)
    }
}
