//! audio - Device resolution, audio engines and the stream registry
//!
//! Two engines implement [`AudioEngine`]: [`AlsaEngine`] on real hardware and
//! [`SyntheticEngine`] for machines without a sound card (and for tests).

mod alsa_device;
mod alsa_engine;
mod device;
mod engine;
mod registry;
mod resolver;
mod stream;
pub mod synthetic;

pub use alsa_engine::AlsaEngine;
pub use device::{Direction, Endpoint, DEFAULT_DEVICE};
pub use engine::{AudioEngine, NativeStream, StreamCallback};
pub use registry::{StreamRegistry, StreamRoute};
pub use resolver::DeviceResolver;
pub use stream::{StreamHandle, StreamSettings, StreamState, DEFAULT_BUFFER_PERIODS};
pub use synthetic::SyntheticEngine;
