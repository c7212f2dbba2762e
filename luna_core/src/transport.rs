//! Engine transports. SSE and WebSocket deliver the same chunk
//! sequence; each connect call yields one stream of transport events
//! for one synthesis request.

use std::pin::Pin;

use async_stream::try_stream;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::TtsOptions;
use crate::error::TtsError;
use crate::session::SynthesisRequest;
use crate::{Transport, SYNTHESIZE_PATH, WS_SYNTHESIZE_PATH};

#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Raw PCM16 bytes, not aligned to sample boundaries.
    Audio(Vec<u8>),
    /// Format advertised by the engine; checked against the contract.
    Format { sample_rate: u32, channels: u16 },
    /// Graceful end of synthesis.
    Done,
}

pub(crate) type TransportStream =
    Pin<Box<dyn Stream<Item = Result<TransportEvent, TtsError>> + Send>>;

/// Establish the configured transport and submit the request. The
/// handshake and request submission run under `connect_timeout`.
pub(crate) async fn connect(
    http: &reqwest::Client,
    opts: &TtsOptions,
    request: &SynthesisRequest,
) -> Result<TransportStream, TtsError> {
    match opts.transport {
        Transport::Sse => connect_sse(http, opts, request).await,
        Transport::WebSocket => connect_ws(opts, request).await,
    }
}

#[derive(Deserialize)]
struct SsePayload {
    audio: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    error: Option<String>,
}

async fn connect_sse(
    http: &reqwest::Client,
    opts: &TtsOptions,
    request: &SynthesisRequest,
) -> Result<TransportStream, TtsError> {
    let url = opts.http_url(SYNTHESIZE_PATH);

    let response = tokio::time::timeout(
        opts.connect_timeout(),
        http.post(&url).json(request).send(),
    )
    .await
    .map_err(|_| TtsError::ConnectTimeout(opts.connect_timeout()))?
    .map_err(TtsError::transport)?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(TtsError::Api { status, message });
    }

    let mut body = response.bytes_stream();
    Ok(Box::pin(try_stream! {
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(TtsError::transport)?;
            buf.extend_from_slice(&chunk);

            while let Some(event) = take_sse_event(&mut buf) {
                for parsed in parse_sse_event(&event)? {
                    let done = matches!(parsed, TransportEvent::Done);
                    yield parsed;
                    if done {
                        return;
                    }
                }
            }
        }
    }))
}

/// Split one complete `data: ...\n\n` event off the front of the
/// buffer, if present.
fn take_sse_event(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buf.windows(2).position(|w| w == b"\n\n")?;
    let event = buf[..pos].to_vec();
    buf.drain(..pos + 2);
    Some(event)
}

fn parse_sse_event(event: &[u8]) -> Result<Vec<TransportEvent>, TtsError> {
    const DATA_PREFIX: &[u8] = b"data: ";

    let mut out = Vec::new();
    for line in event.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            continue;
        };

        if data == b"[DONE]" {
            out.push(TransportEvent::Done);
            continue;
        }

        let payload: SsePayload = match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("skipping unparseable SSE payload: {err}");
                continue;
            }
        };

        if let Some(message) = payload.error {
            return Err(TtsError::Transport(format!("engine error: {message}")));
        }
        if payload.sample_rate.is_some() || payload.channels.is_some() {
            out.push(TransportEvent::Format {
                sample_rate: payload.sample_rate.unwrap_or(crate::SAMPLE_RATE),
                channels: payload.channels.unwrap_or(crate::NUM_CHANNELS),
            });
        }
        if let Some(b64) = payload.audio {
            let bytes = BASE64
                .decode(b64)
                .map_err(|e| TtsError::Decode(format!("invalid base64 audio: {e}")))?;
            out.push(TransportEvent::Audio(bytes));
        }
    }
    Ok(out)
}

#[derive(Deserialize)]
struct WsServerMessage {
    #[serde(rename = "type")]
    kind: String,
    message: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
}

async fn connect_ws(
    opts: &TtsOptions,
    request: &SynthesisRequest,
) -> Result<TransportStream, TtsError> {
    let url = opts.ws_url(WS_SYNTHESIZE_PATH);

    let handshake = async {
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| TtsError::Transport(format!("websocket handshake failed: {e}")))?;
        let (mut write, read) = ws.split();

        let config = serde_json::json!({
            "type": "config",
            "top_p": request.top_p(),
            "repetition_penalty": request.repetition_penalty(),
        });
        write
            .send(WsMessage::Text(config.to_string()))
            .await
            .map_err(TtsError::transport)?;

        // One session carries exactly one utterance.
        let text = serde_json::json!({
            "type": "text",
            "content": request.text(),
            "is_final": true,
        });
        write
            .send(WsMessage::Text(text.to_string()))
            .await
            .map_err(TtsError::transport)?;

        Ok::<_, TtsError>((write, read))
    };

    let (write, mut read) = tokio::time::timeout(opts.connect_timeout(), handshake)
        .await
        .map_err(|_| TtsError::ConnectTimeout(opts.connect_timeout()))??;

    Ok(Box::pin(try_stream! {
        // Keep the write half alive for the life of the stream so the
        // connection is not half-closed under the engine.
        let _write = write;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(TtsError::transport)?;
            match msg {
                WsMessage::Binary(data) => yield TransportEvent::Audio(data),
                WsMessage::Text(text) => {
                    let parsed: WsServerMessage = match serde_json::from_str(&text) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            tracing::warn!("skipping unparseable websocket message: {err}");
                            continue;
                        }
                    };
                    match parsed.kind.as_str() {
                        "done" => {
                            yield TransportEvent::Done;
                            return;
                        }
                        "error" => {
                            Err(TtsError::Transport(format!(
                                "engine error: {}",
                                parsed.message.unwrap_or_else(|| "unknown error".to_string())
                            )))?;
                        }
                        "format" => yield TransportEvent::Format {
                            sample_rate: parsed.sample_rate.unwrap_or(crate::SAMPLE_RATE),
                            channels: parsed.channels.unwrap_or(crate::NUM_CHANNELS),
                        },
                        "status" => {
                            tracing::debug!("engine status: {}", parsed.message.unwrap_or_default());
                        }
                        other => tracing::debug!("ignoring websocket message type {other:?}"),
                    }
                }
                WsMessage::Close(_) => return,
                _ => {}
            }
        }
    }))
}
