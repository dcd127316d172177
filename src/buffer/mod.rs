//! Single-producer/single-consumer buffers shared between a hardware callback
//! and the rest of the program.
//!
//! - `ring`: interleaved PCM samples, overwrite-oldest on overflow
//! - `slots`: variable-length compressed frames, one frame per slot, evict-oldest
//!   on overflow

mod ring;
mod slots;

pub use ring::{sample_ring, ReadOutcome, RingConsumer, RingProducer, RingStats, Underrun};
pub use slots::{frame_slots, frame_slots_sized, SlotReader, SlotWriter};
