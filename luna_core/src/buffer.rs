//! Bounded frame queue between the network receive loop and the
//! consumer. This channel is the only state the two tasks share; its
//! capacity is the backpressure watermark. End-of-stream and failure
//! markers ride the same ordered queue, so frames buffered before a
//! failure always drain first.

use tokio::sync::mpsc;

use crate::error::TtsError;
use crate::frame::AudioFrame;

pub(crate) enum FrameEvent {
    Frame(AudioFrame),
    End,
    Failed(TtsError),
}

pub(crate) struct FrameProducer {
    tx: mpsc::Sender<FrameEvent>,
}

pub(crate) struct FrameConsumer {
    rx: mpsc::Receiver<FrameEvent>,
    finished: bool,
}

pub(crate) fn bounded(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameProducer { tx },
        FrameConsumer {
            rx,
            finished: false,
        },
    )
}

impl FrameProducer {
    /// Push a frame, suspending while the buffer is at capacity.
    /// Returns false once the consumer is gone.
    pub async fn push(&self, frame: AudioFrame) -> bool {
        self.tx.send(FrameEvent::Frame(frame)).await.is_ok()
    }

    /// Mark graceful end of stream.
    pub async fn finish(self) {
        let _ = self.tx.send(FrameEvent::End).await;
    }

    /// Mark terminal failure; surfaced to the consumer after every
    /// already-buffered frame.
    pub async fn fail(self, err: TtsError) {
        let _ = self.tx.send(FrameEvent::Failed(err)).await;
    }
}

impl FrameConsumer {
    /// Next frame, suspending while the buffer is empty. `Ok(None)` is
    /// end-of-stream and latches: later calls keep returning it.
    pub async fn next(&mut self) -> Result<Option<AudioFrame>, TtsError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(FrameEvent::Frame(frame)) => Ok(Some(frame)),
            Some(FrameEvent::End) => {
                self.finished = true;
                Ok(None)
            }
            Some(FrameEvent::Failed(err)) => {
                self.finished = true;
                Err(err)
            }
            // Producer dropped without an end marker.
            None => {
                self.finished = true;
                Err(TtsError::Transport(
                    "audio stream ended unexpectedly".to_string(),
                ))
            }
        }
    }
}
