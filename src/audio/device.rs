//! Endpoint descriptions shared by every engine.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Device name that resolves to the engine's default endpoint for a direction.
pub const DEFAULT_DEVICE: &str = "default";

/// Stream direction: capture (input) or playback (output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Playback => f.write_str("playback"),
        }
    }
}

impl From<Direction> for alsa::Direction {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Capture => alsa::Direction::Capture,
            Direction::Playback => alsa::Direction::Playback,
        }
    }
}

/// A resolved hardware device/direction pair, ready to be opened as a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    /// Name as reported by enumeration (e.g. "default", "plughw:0,0")
    pub name: String,
    pub direction: Direction,
    /// Highest channel count the device accepts in this direction
    pub max_channels: u32,
    /// Lowest buffering latency the device supports
    pub default_low_latency: Duration,
    /// Highest buffering latency the device supports
    pub default_high_latency: Duration,
    /// Native sample rate in Hz
    pub default_sample_rate: u32,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] max_channels={} latency={:?}..{:?} rate={}Hz",
            self.name,
            self.direction,
            self.max_channels,
            self.default_low_latency,
            self.default_high_latency,
            self.default_sample_rate,
        )
    }
}
