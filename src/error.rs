use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::audio::{Direction, StreamHandle, StreamState};

/// Errors surfaced synchronously by the resolver, the registry and the engines.
///
/// Callback-context trouble (codec failures, overruns, underruns) never shows up
/// here; it is reported through [`crate::pipeline::EventSink`].
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio device not found: \"{name}\" ({direction})")]
    DeviceNotFound { name: String, direction: Direction },

    #[error("failed to open {direction} stream on \"{device}\": {reason}")]
    Open {
        device: String,
        direction: Direction,
        reason: String,
    },

    #[error("stream {handle}: cannot {op} while {state}")]
    State {
        handle: StreamHandle,
        op: &'static str,
        state: StreamState,
    },

    #[error("invalid stream handle {0}")]
    InvalidHandle(StreamHandle),

    #[error("stream {handle} does not support {op}")]
    Unsupported {
        handle: StreamHandle,
        op: &'static str,
    },

    #[error("stream {handle}: {op} made no progress for {waited:?}")]
    Stalled {
        handle: StreamHandle,
        op: &'static str,
        waited: Duration,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("audio backend error: {0}")]
    Backend(String),
}

impl From<alsa::Error> for AudioError {
    fn from(e: alsa::Error) -> Self {
        AudioError::Backend(e.to_string())
    }
}

/// Errors from a block codec. Per-frame failures are dropped, never retried.
///
/// `Copy` so a failure can be reported from a callback without allocating.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("expected a frame of {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("unsupported sample rate {0} Hz")]
    UnsupportedRate(u32),

    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u32),

    #[error("unsupported frame duration {0} ms")]
    UnsupportedDuration(u32),

    #[error("unknown stream format")]
    UnknownFormat,

    #[error("codec frames must hold at least one sample")]
    EmptyFrame,

    #[error("{function} failed: {reason}")]
    Backend {
        function: &'static str,
        reason: &'static str,
    },
}

impl From<opus::Error> for CodecError {
    fn from(e: opus::Error) -> Self {
        CodecError::Backend {
            function: e.function(),
            reason: e.description(),
        }
    }
}

/// An OS-level failure inside the audio backend: the call that failed and
/// its errno. Travels through the event queue without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendFailure {
    pub op: &'static str,
    pub errno: i32,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed: {}",
            self.op,
            std::io::Error::from_raw_os_error(self.errno)
        )
    }
}

impl From<alsa::Error> for BackendFailure {
    fn from(e: alsa::Error) -> Self {
        BackendFailure {
            op: e.func(),
            // alsa-lib return codes are negated errnos
            errno: e.errno().abs(),
        }
    }
}

pub type Result<T, E = AudioError> = std::result::Result<T, E>;
