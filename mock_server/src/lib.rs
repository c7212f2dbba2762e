//! Scripted stand-in for the Luna synthesis engine, used by the client
//! integration tests. Speaks the real endpoint grammar (SSE and
//! WebSocket synthesis, config, health) and misbehaves on request:
//! stalls mid-stream, drops the connection without an end marker, or
//! advertises the wrong audio format.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// What the engine should do for each synthesis request.
#[derive(Clone, Default)]
pub struct MockBehavior {
    /// Audio chunks to stream, in order.
    pub chunks: Vec<Vec<u8>>,
    /// Ignore `chunks` and stream the request text bytes back as one
    /// chunk (padded to a whole sample). Lets tests tell segments
    /// apart by payload.
    pub echo_text: bool,
    /// Pause between chunks.
    pub chunk_delay: Option<Duration>,
    /// Stall this long before sending chunk N.
    pub stall_before: Option<(usize, Duration)>,
    /// Drop the stream after N chunks without an end marker.
    pub abort_after: Option<usize>,
    /// Requests with exactly this text get one chunk, then a dropped
    /// stream. Lets a single segment fail among healthy ones.
    pub fail_text: Option<String>,
    /// Advertise this sample rate up front instead of staying silent.
    pub advertised_sample_rate: Option<u32>,
}

impl MockBehavior {
    fn plan(&self, text: &str) -> Vec<Vec<u8>> {
        if self.echo_text {
            let mut bytes = text.as_bytes().to_vec();
            if bytes.len() % 2 != 0 {
                bytes.push(0);
            }
            vec![bytes]
        } else {
            self.chunks.clone()
        }
    }

    fn abort_point(&self, text: &str) -> Option<usize> {
        if self.fail_text.as_deref() == Some(text) {
            Some(1)
        } else {
            self.abort_after
        }
    }
}

/// Synthesis request as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub text: String,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

struct MockState {
    behavior: MockBehavior,
    requests: Mutex<Vec<RecordedRequest>>,
}

type SharedMock = Arc<MockState>;

/// A running mock engine on an ephemeral port.
pub struct MockEngine {
    base_url: String,
    state: SharedMock,
    task: JoinHandle<()>,
}

impl MockEngine {
    pub async fn spawn(behavior: MockBehavior) -> Self {
        let state = Arc::new(MockState {
            behavior,
            requests: Mutex::new(Vec::new()),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock engine");
        let addr = listener.local_addr().expect("mock engine local addr");
        let app = router(state.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every synthesis request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Tracing init for tests; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn router(state: SharedMock) -> Router {
    Router::new()
        .route("/api/v1/synthesize", post(synthesize_sse))
        .route("/api/v1/ws/synthesize", get(synthesize_ws))
        .route("/api/v1/config", get(engine_config))
        .route("/api/v1/health", get(engine_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn synthesize_sse(
    State(state): State<SharedMock>,
    Json(req): Json<RecordedRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(text = %req.text, "mock engine: sse synthesis request");
    let plan = state.behavior.plan(&req.text);
    let abort_after = state.behavior.abort_point(&req.text);
    let behavior = state.behavior.clone();
    state.requests.lock().unwrap().push(req);

    let stream = async_stream::stream! {
        if let Some(rate) = behavior.advertised_sample_rate {
            let meta = serde_json::json!({ "sample_rate": rate, "channels": 1 });
            yield Ok(Event::default().data(meta.to_string()));
        }

        for (i, chunk) in plan.iter().enumerate() {
            if let Some((n, pause)) = behavior.stall_before {
                if i == n {
                    tokio::time::sleep(pause).await;
                }
            }
            if abort_after == Some(i) {
                // Body ends here with no [DONE]: abnormal termination.
                return;
            }
            let payload = serde_json::json!({ "audio": BASE64.encode(chunk) });
            yield Ok(Event::default().data(payload.to_string()));
            if let Some(delay) = behavior.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }

        if abort_after == Some(plan.len()) {
            // All chunks sent, then dropped before the end marker.
            return;
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream)
}

async fn synthesize_ws(State(state): State<SharedMock>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: SharedMock) {
    let mut text = String::new();
    let mut top_p = 0.0;
    let mut repetition_penalty = 0.0;

    // Collect config plus text messages until the final text piece.
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(raw) = msg else { continue };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.as_str()) else {
            continue;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("config") => {
                top_p = value.get("top_p").and_then(|v| v.as_f64()).unwrap_or(0.0);
                repetition_penalty = value
                    .get("repetition_penalty")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
            }
            Some("text") => {
                if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
                    text.push_str(content);
                }
                if value.get("is_final").and_then(|v| v.as_bool()) == Some(true) {
                    break;
                }
            }
            _ => {}
        }
    }

    debug!(text = %text, "mock engine: websocket synthesis request");
    let plan = state.behavior.plan(&text);
    let abort_after = state.behavior.abort_point(&text);
    let behavior = state.behavior.clone();
    state.requests.lock().unwrap().push(RecordedRequest {
        text,
        top_p,
        repetition_penalty,
    });

    if let Some(rate) = behavior.advertised_sample_rate {
        let meta = serde_json::json!({ "type": "format", "sample_rate": rate, "channels": 1 });
        if socket.send(Message::Text(meta.to_string().into())).await.is_err() {
            return;
        }
    }

    for (i, chunk) in plan.iter().enumerate() {
        if let Some((n, pause)) = behavior.stall_before {
            if i == n {
                tokio::time::sleep(pause).await;
            }
        }
        if abort_after == Some(i) {
            // Drop the socket with no done message.
            return;
        }
        if socket
            .send(Message::Binary(chunk.clone().into()))
            .await
            .is_err()
        {
            return;
        }
        if let Some(delay) = behavior.chunk_delay {
            tokio::time::sleep(delay).await;
        }
    }

    if abort_after == Some(plan.len()) {
        return;
    }

    let done = serde_json::json!({ "type": "done" });
    let _ = socket.send(Message::Text(done.to_string().into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn engine_config(State(state): State<SharedMock>) -> Json<serde_json::Value> {
    let rate = state.behavior.advertised_sample_rate.unwrap_or(32_000);
    Json(serde_json::json!({
        "sample_rate": rate,
        "sampling_defaults": { "top_p": 0.95, "repetition_penalty": 1.3 }
    }))
}

async fn engine_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": "2025-01-01T00:00:00Z",
        "backend_status": "ok",
        "voice_cloning": false
    }))
}
