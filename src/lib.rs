//! voxlink - real-time PCM capture and playback with codec framing
//!
//! Hardware callbacks move fixed-size periods of interleaved `i16` samples.
//! Lock-free buffers decouple them from the application, and the pipeline
//! re-frames periods into whole codec frames and back.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;

pub use error::{AudioError, BackendFailure, CodecError, Result};
