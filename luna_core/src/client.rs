//! Top-level client handle: one-shot synthesis, segment streaming and
//! the engine's config/health endpoints.

use std::time::Duration;

use serde::Deserialize;

use crate::config::TtsOptions;
use crate::error::TtsError;
use crate::manager::SessionManager;
use crate::session::{StreamSession, SynthesisRequest};
use crate::{CONFIG_PATH, HEALTH_PATH, SAMPLE_RATE};

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine configuration as reported by `GET /api/v1/config`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

/// Engine health as reported by `GET /api/v1/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    #[serde(default = "unknown")]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "unknown")]
    pub backend_status: String,
    #[serde(default)]
    pub voice_cloning: bool,
}

fn unknown() -> String {
    "unknown".to_string()
}

#[derive(Deserialize)]
struct ConfigResponse {
    sample_rate: Option<u32>,
    #[serde(default)]
    sampling_defaults: SamplingDefaults,
}

#[derive(Deserialize, Default)]
struct SamplingDefaults {
    top_p: Option<f64>,
    repetition_penalty: Option<f64>,
}

pub struct TtsClient {
    opts: TtsOptions,
    http: reqwest::Client,
}

impl TtsClient {
    pub fn new(opts: TtsOptions) -> Self {
        Self::with_http_client(opts, reqwest::Client::new())
    }

    /// Reuse an existing HTTP client (connection pools are per-client).
    pub fn with_http_client(opts: TtsOptions, http: reqwest::Client) -> Self {
        Self { opts, http }
    }

    pub fn options(&self) -> &TtsOptions {
        &self.opts
    }

    /// Adjust sampling parameters for subsequent requests.
    pub fn update_options(&mut self, top_p: Option<f64>, repetition_penalty: Option<f64>) {
        if let Some(top_p) = top_p {
            self.opts.top_p = top_p;
        }
        if let Some(repetition_penalty) = repetition_penalty {
            self.opts.repetition_penalty = repetition_penalty;
        }
    }

    /// Synthesize one utterance. Validation is synchronous; the
    /// returned session streams frames as the engine produces them.
    pub fn synthesize(&self, text: &str) -> Result<StreamSession, TtsError> {
        let request = SynthesisRequest::new(text, self.opts.top_p, self.opts.repetition_penalty)?;
        Ok(StreamSession::open(&self.http, &self.opts, request))
    }

    /// Segment-by-segment streaming: submit text pieces as they become
    /// available, drain frames in submission order.
    pub fn stream(&self) -> SessionManager {
        SessionManager::new(self.http.clone(), self.opts.clone())
    }

    /// Fetch the engine's advertised configuration.
    pub async fn config(&self) -> Result<EngineConfig, TtsError> {
        let url = self.opts.http_url(CONFIG_PATH);
        let response = self
            .http
            .get(&url)
            .timeout(ENDPOINT_TIMEOUT)
            .send()
            .await
            .map_err(TtsError::transport)?;

        if !response.status().is_success() {
            return Err(TtsError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: ConfigResponse = response.json().await.map_err(TtsError::transport)?;
        Ok(EngineConfig {
            sample_rate: body.sample_rate.unwrap_or(SAMPLE_RATE),
            top_p: body.sampling_defaults.top_p.unwrap_or(crate::DEFAULT_TOP_P),
            repetition_penalty: body
                .sampling_defaults
                .repetition_penalty
                .unwrap_or(crate::DEFAULT_REPETITION_PENALTY),
        })
    }

    /// Check engine health.
    pub async fn health(&self) -> Result<HealthStatus, TtsError> {
        let url = self.opts.http_url(HEALTH_PATH);
        let response = self
            .http
            .get(&url)
            .timeout(ENDPOINT_TIMEOUT)
            .send()
            .await
            .map_err(TtsError::transport)?;

        if !response.status().is_success() {
            return Err(TtsError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response.json().await.map_err(TtsError::transport)
    }
}

impl Default for TtsClient {
    fn default() -> Self {
        Self::new(TtsOptions::default())
    }
}
