//! Codec framing between hardware periods and block codecs.
//!
//! capture callback -> FrameAccumulator -> slot buffer -> FrameDrain -> playback callback

mod accumulator;
mod drain;
mod events;

pub use accumulator::FrameAccumulator;
pub use drain::FrameDrain;
pub use events::{
    spawn_event_logger, CodecStage, EventSink, FaultKind, PipelineEvent, PipelineStats,
    StatsSnapshot,
};
