//! One stream session owns one synthesis request end-to-end: the
//! transport connection, the receive loop, the decode step and the
//! frame buffer the caller drains. A session is exactly one network
//! attempt; nothing in here retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::buffer::{self, FrameConsumer, FrameProducer};
use crate::config::TtsOptions;
use crate::decoder::ChunkDecoder;
use crate::error::TtsError;
use crate::frame::AudioFrame;
use crate::transport::{self, TransportEvent};
use crate::validation::validate_request;

/// Validated, immutable synthesis request. Serializes to the wire
/// payload the engine expects.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    text: String,
    top_p: f64,
    repetition_penalty: f64,
}

impl SynthesisRequest {
    /// Build a request, validating every field synchronously. Invalid
    /// input never reaches the network.
    pub fn new(
        text: impl Into<String>,
        top_p: f64,
        repetition_penalty: f64,
    ) -> Result<Self, TtsError> {
        let text = text.into();
        validate_request(&text, top_p, repetition_penalty)?;
        Ok(Self {
            text,
            top_p,
            repetition_penalty,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn top_p(&self) -> f64 {
        self.top_p
    }

    pub fn repetition_penalty(&self) -> f64 {
        self.repetition_penalty
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed(TtsError),
    Closed,
}

type SharedState = Arc<Mutex<SessionState>>;

pub struct StreamSession {
    id: Uuid,
    consumer: FrameConsumer,
    state: SharedState,
    bytes_received: Arc<AtomicU64>,
    started_at: Instant,
    task: JoinHandle<()>,
    closed: bool,
}

impl StreamSession {
    /// Start a session: spawns the receive loop and returns at once.
    /// The request is already validated; connection failures surface
    /// through `next_frame`.
    pub fn open(http: &reqwest::Client, opts: &TtsOptions, request: SynthesisRequest) -> Self {
        Self::open_gated(http, opts, request, None)
    }

    /// As `open`, but the receive loop waits for a permit before any
    /// network activity. Used by the session manager to bound
    /// concurrent streams.
    pub(crate) fn open_gated(
        http: &reqwest::Client,
        opts: &TtsOptions,
        request: SynthesisRequest,
        gate: Option<Arc<Semaphore>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (producer, consumer) = buffer::bounded(opts.buffer_capacity);
        let state: SharedState = Arc::new(Mutex::new(SessionState::Idle));
        let bytes_received = Arc::new(AtomicU64::new(0));

        tracing::debug!(session = %id, transport = ?opts.transport, "opening synthesis stream");

        let task = tokio::spawn(run_receive_loop(
            http.clone(),
            opts.clone(),
            request,
            producer,
            state.clone(),
            bytes_received.clone(),
            gate,
        ));

        Self {
            id,
            consumer,
            state,
            bytes_received,
            started_at: Instant::now(),
            task,
            closed: false,
        }
    }

    /// Pull the next frame, suspending until one is available, the
    /// stream ends (`Ok(None)`) or the session has failed. This is the
    /// sole drain path; it never busy-polls.
    pub async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TtsError> {
        if self.closed {
            return Err(TtsError::SessionClosed);
        }
        self.consumer.next().await
    }

    /// Release the transport and any buffered frames, whatever state
    /// the session is in. Idempotent; later calls are no-ops and later
    /// `next_frame` calls fail with `SessionClosed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.task.abort();
        *self.state.lock().unwrap() = SessionState::Closed;
        tracing::debug!(session = %self.id, "session closed");
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    /// Raw bytes received from the transport so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Consume the session as a frame stream. The stream yields each
    /// frame, then either finishes (end of stream) or yields one
    /// terminal error.
    pub fn into_frames(mut self) -> impl Stream<Item = Result<AudioFrame, TtsError>> {
        async_stream::stream! {
            loop {
                match self.next_frame().await {
                    Ok(Some(frame)) => yield Ok(frame),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // Abandoning a session must not leak its connection.
        self.task.abort();
    }
}

fn set_state(state: &SharedState, next: SessionState) {
    let mut guard = state.lock().unwrap();
    // Closed is terminal. The receive loop can still be mid-poll when
    // close() aborts it; whatever transition it was about to make must
    // not resurrect the session.
    if *guard != SessionState::Closed {
        *guard = next;
    }
}

async fn fail(producer: FrameProducer, state: &SharedState, err: TtsError) {
    tracing::warn!("synthesis stream failed: {err}");
    set_state(state, SessionState::Failed(err.clone()));
    producer.fail(err).await;
}

async fn run_receive_loop(
    http: reqwest::Client,
    opts: TtsOptions,
    request: SynthesisRequest,
    producer: FrameProducer,
    state: SharedState,
    bytes_received: Arc<AtomicU64>,
    gate: Option<Arc<Semaphore>>,
) {
    // Gated sessions stay Idle until a stream slot frees up.
    let _permit = match gate {
        Some(gate) => match gate.acquire_owned().await {
            Ok(permit) => Some(permit),
            // Manager shut down before this segment started.
            Err(_) => return,
        },
        None => None,
    };

    set_state(&state, SessionState::Connecting);
    let mut stream = match transport::connect(&http, &opts, &request).await {
        Ok(stream) => stream,
        Err(err) => return fail(producer, &state, err).await,
    };

    set_state(&state, SessionState::Streaming);
    let mut decoder = ChunkDecoder::new();
    let read_timeout = opts.read_timeout();

    loop {
        let event = match tokio::time::timeout(read_timeout, stream.next()).await {
            Err(_) => {
                return fail(producer, &state, TtsError::StreamTimeout(read_timeout)).await;
            }
            Ok(None) => {
                // Connection gone without the end marker: abnormal
                // termination, distinct from graceful completion.
                return fail(
                    producer,
                    &state,
                    TtsError::Transport("connection closed before end of stream".to_string()),
                )
                .await;
            }
            Ok(Some(Err(err))) => return fail(producer, &state, err).await,
            Ok(Some(Ok(event))) => event,
        };

        match event {
            TransportEvent::Format {
                sample_rate,
                channels,
            } => {
                if let Err(err) = decoder.ensure_format(sample_rate, channels) {
                    return fail(producer, &state, err).await;
                }
            }
            TransportEvent::Audio(chunk) => {
                bytes_received.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                for frame in decoder.push(&chunk) {
                    // Backpressure: suspends here while the buffer is
                    // full, which in turn stops the transport read.
                    if !producer.push(frame).await {
                        return;
                    }
                }
            }
            TransportEvent::Done => {
                match decoder.flush() {
                    Ok(Some(frame)) => {
                        if !producer.push(frame).await {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => return fail(producer, &state, err).await,
                }
                tracing::debug!(
                    frames = decoder.frames_produced(),
                    bytes = bytes_received.load(Ordering::Relaxed),
                    "synthesis stream completed"
                );
                set_state(&state, SessionState::Completed);
                producer.finish().await;
                return;
            }
        }
    }
}
