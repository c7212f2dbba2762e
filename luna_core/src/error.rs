use std::time::Duration;

use thiserror::Error;

/// Client error taxonomy.
///
/// Validation errors surface synchronously when a request is built;
/// everything else is observed through `next_frame` after any frames
/// buffered before the failure have been drained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtsError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timed out connecting to the synthesis engine after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no audio received for {0:?} while streaming")]
    StreamTimeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("engine returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("audio format contract violated: {0}")]
    Decode(String),

    #[error("session is closed")]
    SessionClosed,
}

impl TtsError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
