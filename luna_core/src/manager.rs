//! Orchestrates one session per submitted text segment. Sessions may
//! run their network streams concurrently (bounded by `max_inflight`),
//! but frames are always drained in submission order: nothing from
//! segment N surfaces before segment N-1 is exhausted.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::TtsOptions;
use crate::error::TtsError;
use crate::frame::AudioFrame;
use crate::session::{StreamSession, SynthesisRequest};
use crate::TextToSpeech;

pub struct SessionManager {
    http: reqwest::Client,
    opts: TtsOptions,
    gate: Arc<Semaphore>,
    queue: VecDeque<StreamSession>,
    closed: bool,
}

impl SessionManager {
    pub fn new(http: reqwest::Client, opts: TtsOptions) -> Self {
        let gate = Arc::new(Semaphore::new(opts.max_inflight.max(1)));
        Self {
            http,
            opts,
            gate,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Queue a text segment. Validation happens here, synchronously;
    /// the network session starts as soon as an inflight slot frees
    /// up, so submission is pipelined.
    pub fn submit(&mut self, text: &str) -> Result<(), TtsError> {
        if self.closed {
            return Err(TtsError::SessionClosed);
        }
        let request =
            SynthesisRequest::new(text, self.opts.top_p, self.opts.repetition_penalty)?;
        let session =
            StreamSession::open_gated(&self.http, &self.opts, request, Some(self.gate.clone()));
        tracing::debug!(session = %session.id(), pending = self.queue.len() + 1, "segment submitted");
        self.queue.push_back(session);
        Ok(())
    }

    /// Next frame across segments, strictly in submission order.
    /// `Ok(None)` once every submitted segment is drained. A failed
    /// segment surfaces its error exactly once, after its buffered
    /// frames; later segments keep playing on subsequent calls.
    pub async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TtsError> {
        if self.closed {
            return Err(TtsError::SessionClosed);
        }
        while let Some(front) = self.queue.front_mut() {
            match front.next_frame().await {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {
                    // Segment drained; move on to the next one.
                    self.queue.pop_front();
                }
                Err(err) => {
                    self.queue.pop_front();
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    /// Segments submitted and not yet fully drained.
    pub fn pending_segments(&self) -> usize {
        self.queue.len()
    }

    /// Close every session and reject further operations. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Pending receive loops waiting on the gate observe the close
        // and never touch the network.
        self.gate.close();
        for session in &mut self.queue {
            session.close();
        }
        self.queue.clear();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl TextToSpeech for SessionManager {
    fn submit(&mut self, text: &str) -> Result<(), TtsError> {
        SessionManager::submit(self, text)
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, TtsError> {
        SessionManager::next_frame(self).await
    }

    fn shutdown(&mut self) {
        self.close();
    }
}
