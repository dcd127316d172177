//! Stream identity, lifecycle state and settings.

use std::fmt;
use std::time::Duration;

/// Opaque identifier of one open stream within a registry.
///
/// Handles increase monotonically and are never reused by the registry that
/// issued them, even after the stream is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub(crate) u64);

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle: Created -> Started -> Paused <-> Started -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Started,
    Paused,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Created => "created",
            StreamState::Started => "started",
            StreamState::Paused => "paused",
            StreamState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Ring capacity, in periods, used when the caller does not pick one.
pub const DEFAULT_BUFFER_PERIODS: usize = 8;

/// Settings a stream is opened with. Immutable for the lifetime of the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u32,
    /// Frames delivered per hardware callback
    pub frames_per_buffer: usize,
    /// Interleaved samples per codec frame, when codec framing is active
    pub codec_frame_samples: Option<usize>,
    /// Capacity of the stream's PCM ring, in periods
    pub buffer_periods: usize,
}

impl StreamSettings {
    pub fn new(sample_rate: u32, channels: u32, frames_per_buffer: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frames_per_buffer,
            codec_frame_samples: None,
            buffer_periods: DEFAULT_BUFFER_PERIODS,
        }
    }

    pub fn with_codec_frame(mut self, samples: usize) -> Self {
        self.codec_frame_samples = Some(samples);
        self
    }

    pub fn with_buffer_periods(mut self, periods: usize) -> Self {
        self.buffer_periods = periods;
        self
    }

    /// Interleaved samples in one hardware callback buffer.
    pub fn period_samples(&self) -> usize {
        self.frames_per_buffer * self.channels as usize
    }

    /// Nominal time between two callbacks.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_buffer as f64 / self.sample_rate.max(1) as f64)
    }

    pub(crate) fn ring_capacity(&self) -> usize {
        self.period_samples() * self.buffer_periods.max(1)
    }
}
