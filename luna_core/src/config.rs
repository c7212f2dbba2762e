// Client configuration and tuning knobs.

use std::time::Duration;

use crate::{DEFAULT_BASE_URL, DEFAULT_REPETITION_PENALTY, DEFAULT_TOP_P};

/// Delivery channel for a synthesis stream. Both carry the same audio;
/// the choice is a transport detail, not a protocol difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// POST /api/v1/synthesize, chunks over Server-Sent Events.
    #[default]
    Sse,
    /// WS /api/v1/ws/synthesize, binary audio messages.
    WebSocket,
}

#[derive(Debug, Clone)]
pub struct TtsOptions {
    pub base_url: String,
    pub top_p: f64,
    pub repetition_penalty: f64,
    pub transport: Transport,
    /// Handshake plus request submission deadline.
    pub connect_timeout_secs: u64,
    /// Per-chunk inactivity deadline while streaming.
    pub read_timeout_secs: u64,
    /// Frame buffer watermark; the receive loop suspends beyond it.
    pub buffer_capacity: usize,
    /// Concurrent network streams the session manager allows.
    pub max_inflight: usize,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            top_p: DEFAULT_TOP_P,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            transport: Transport::Sse,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            buffer_capacity: 64,
            max_inflight: 2,
        }
    }
}

impl TtsOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("LUNA_BASE_URL")
            .ok()
            .unwrap_or(defaults.base_url);

        let top_p = std::env::var("LUNA_TOP_P")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.top_p);

        let repetition_penalty = std::env::var("LUNA_REPETITION_PENALTY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.repetition_penalty);

        let transport = match std::env::var("LUNA_TRANSPORT").ok().as_deref() {
            Some("ws") | Some("websocket") => Transport::WebSocket,
            Some("sse") | None => Transport::Sse,
            Some(other) => {
                tracing::warn!("unrecognized LUNA_TRANSPORT {other:?}, falling back to sse");
                Transport::Sse
            }
        };

        let connect_timeout_secs = std::env::var("LUNA_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.connect_timeout_secs);

        let read_timeout_secs = std::env::var("LUNA_READ_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.read_timeout_secs);

        let buffer_capacity = std::env::var("LUNA_BUFFER_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.buffer_capacity);

        let max_inflight = std::env::var("LUNA_MAX_INFLIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_inflight);

        Self {
            base_url,
            top_p,
            repetition_penalty,
            transport,
            connect_timeout_secs,
            read_timeout_secs,
            buffer_capacity,
            max_inflight,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Same host with the scheme swapped http -> ws (https -> wss).
    pub fn ws_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.replacen("http", "ws", 1), path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_scheme_swap() {
        let opts = TtsOptions {
            base_url: "https://hindi.heypixa.ai".to_string(),
            ..Default::default()
        };
        assert_eq!(
            opts.ws_url("/api/v1/ws/synthesize"),
            "wss://hindi.heypixa.ai/api/v1/ws/synthesize"
        );

        let opts = TtsOptions {
            base_url: "http://127.0.0.1:8085".to_string(),
            ..Default::default()
        };
        assert_eq!(
            opts.ws_url("/api/v1/ws/synthesize"),
            "ws://127.0.0.1:8085/api/v1/ws/synthesize"
        );
    }

    #[test]
    fn test_unrecognized_transport_falls_back_to_sse() {
        std::env::set_var("LUNA_TRANSPORT", "wss");
        assert_eq!(TtsOptions::from_env().transport, Transport::Sse);

        std::env::set_var("LUNA_TRANSPORT", "websocket");
        assert_eq!(TtsOptions::from_env().transport, Transport::WebSocket);
        std::env::remove_var("LUNA_TRANSPORT");
    }

    #[test]
    fn test_defaults() {
        let opts = TtsOptions::default();
        assert_eq!(opts.top_p, 0.95);
        assert_eq!(opts.repetition_penalty, 1.3);
        assert_eq!(opts.transport, Transport::Sse);
        assert_eq!(opts.connect_timeout_secs, 10);
    }
}
