//! Streaming client for the Luna Hindi text-to-speech engine.
//!
//! The engine synthesizes speech remotely and streams raw PCM16 audio
//! back over Server-Sent Events or a WebSocket. This crate owns the
//! client side of that exchange: it opens a stream per request, decodes
//! the transport chunks into fixed-format audio frames, and hands them
//! to the caller as an ordered, bounded, backpressured frame stream.
//!
//! Synthesis itself, playback and device I/O all live elsewhere.

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod manager;
pub mod session;
pub mod validation;
pub mod wav;

mod buffer;
mod frame;
mod transport;

pub use client::{EngineConfig, HealthStatus, TtsClient};
pub use config::{Transport, TtsOptions};
pub use error::TtsError;
pub use frame::AudioFrame;
pub use manager::SessionManager;
pub use session::{SessionState, StreamSession, SynthesisRequest};

use async_trait::async_trait;

/// Default endpoint of the hosted Luna engine.
pub const DEFAULT_BASE_URL: &str = "https://hindi.heypixa.ai";

/// Output sample rate, fixed by the engine.
pub const SAMPLE_RATE: u32 = 32_000;
/// Mono output, fixed by the engine.
pub const NUM_CHANNELS: u16 = 1;
/// PCM16 little-endian, two bytes per sample.
pub const SAMPLE_WIDTH: usize = 2;
/// Samples per normalized output frame (10 ms at 32 kHz).
pub const FRAME_SAMPLES: usize = 320;

/// Maximum characters per synthesis request.
pub const MAX_TEXT_LENGTH: usize = 5000;

/// Default nucleus sampling parameter.
pub const DEFAULT_TOP_P: f64 = 0.95;
/// Default repetition penalty.
pub const DEFAULT_REPETITION_PENALTY: f64 = 1.3;

pub(crate) const SYNTHESIZE_PATH: &str = "/api/v1/synthesize";
pub(crate) const WS_SYNTHESIZE_PATH: &str = "/api/v1/ws/synthesize";
pub(crate) const CONFIG_PATH: &str = "/api/v1/config";
pub(crate) const HEALTH_PATH: &str = "/api/v1/health";

/// The capability contract a host agent framework consumes: submit text
/// segments, drain an ordered frame stream, shut down. The core makes
/// no other assumption about the host.
#[async_trait]
pub trait TextToSpeech: Send {
    /// Queue a text segment for synthesis.
    fn submit(&mut self, text: &str) -> Result<(), TtsError>;

    /// Next audio frame across all submitted segments, in submission
    /// order. `Ok(None)` once every segment has been drained.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TtsError>;

    /// Release all sessions and their connections.
    fn shutdown(&mut self);
}
