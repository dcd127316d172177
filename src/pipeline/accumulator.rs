//! Encoder side: re-frame arbitrary PCM chunks into whole codec frames.
//!
//! Hardware callbacks deliver whatever their period size is, but the codec
//! only accepts frames of exactly `F` samples. The accumulator keeps one
//! frame's worth of holding space and a fill cursor; every time the space
//! fills it encodes once, into a buffer taken from the slot buffer's pool,
//! and hands the blob to the slot buffer.

use crate::buffer::SlotWriter;
use crate::codec::FrameEncoder;

use super::events::{CodecStage, EventSink};

pub struct FrameAccumulator {
    encoder: Box<dyn FrameEncoder>,
    slots: SlotWriter,
    sink: EventSink,
    holding: Vec<i16>,
    cursor: usize,
}

impl FrameAccumulator {
    pub fn new(encoder: Box<dyn FrameEncoder>, slots: SlotWriter, sink: EventSink) -> Self {
        let frame = encoder.frame_samples().max(1);
        Self {
            encoder,
            slots,
            sink,
            holding: vec![0i16; frame],
            cursor: 0,
        }
    }

    /// Feed one chunk and emit every frame it completes.
    ///
    /// Returns the number of frames encoded during this call.
    pub fn feed(&mut self, chunk: &[i16]) -> usize {
        let mut rest = chunk;
        let mut emitted = 0;

        while !rest.is_empty() {
            let room = self.holding.len() - self.cursor;
            let take = room.min(rest.len());
            self.holding[self.cursor..self.cursor + take].copy_from_slice(&rest[..take]);
            self.cursor += take;
            rest = &rest[take..];

            if self.cursor == self.holding.len() {
                self.cursor = 0;
                if self.emit() {
                    emitted += 1;
                }
            }
        }

        emitted
    }

    /// Pad a partially filled frame with silence and encode it.
    ///
    /// Returns `true` if a frame was written.
    pub fn flush(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.holding[self.cursor..].fill(0);
        self.cursor = 0;
        self.emit()
    }

    /// Samples waiting for the current frame to fill.
    pub fn pending(&self) -> usize {
        self.cursor
    }

    pub fn frame_samples(&self) -> usize {
        self.holding.len()
    }

    fn emit(&mut self) -> bool {
        let mut blob = self.slots.buffer();
        match self.encoder.encode(&self.holding, &mut blob) {
            Ok(()) => {
                self.slots.write_owned(blob);
                self.sink.frame_encoded();
                true
            }
            Err(e) => {
                self.slots.recycle(blob);
                self.sink.codec_failure(CodecStage::Encode, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::frame_slots;
    use crate::error::CodecError;
    use std::sync::{Arc, Mutex};

    /// Records every frame it is handed; fails on request.
    struct RecordingEncoder {
        frame: usize,
        calls: Arc<Mutex<Vec<Vec<i16>>>>,
        fail_on: Option<usize>,
    }

    impl FrameEncoder for RecordingEncoder {
        fn frame_samples(&self) -> usize {
            self.frame
        }

        fn max_frame_bytes(&self) -> usize {
            1
        }

        fn encode(&mut self, pcm: &[i16], out: &mut Vec<u8>) -> Result<(), CodecError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(pcm.to_vec());
            if self.fail_on == Some(calls.len()) {
                return Err(CodecError::Backend {
                    function: "encode",
                    reason: "injected",
                });
            }
            out.clear();
            out.push(calls.len() as u8);
            Ok(())
        }
    }

    fn accumulator(
        frame: usize,
        fail_on: Option<usize>,
    ) -> (FrameAccumulator, Arc<Mutex<Vec<Vec<i16>>>>, crate::buffer::SlotReader, EventSink) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let encoder = RecordingEncoder {
            frame,
            calls: Arc::clone(&calls),
            fail_on,
        };
        let (tx, rx) = frame_slots(16);
        let sink = EventSink::detached();
        (
            FrameAccumulator::new(Box::new(encoder), tx, sink.clone()),
            calls,
            rx,
            sink,
        )
    }

    #[test]
    fn test_single_samples_make_exactly_one_frame() {
        let (mut acc, calls, _rx, _) = accumulator(160, None);

        for i in 0..160i16 {
            acc.feed(&[i]);
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (0..160i16).collect::<Vec<_>>());
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn test_two_chunks_of_100_with_frame_160() {
        let (mut acc, calls, mut rx, _) = accumulator(160, None);
        let samples: Vec<i16> = (0..200).collect();

        assert_eq!(acc.feed(&samples[..100]), 0);
        assert_eq!(calls.lock().unwrap().len(), 0);
        assert_eq!(acc.pending(), 100);

        assert_eq!(acc.feed(&samples[100..]), 1);
        assert_eq!(calls.lock().unwrap()[0], samples[..160].to_vec());
        assert_eq!(acc.pending(), 40);
        assert_eq!(rx.read(), Some(vec![1]));

        // the 40 leftovers lead the next frame
        acc.feed(&[0i16; 120]);
        let calls = calls.lock().unwrap();
        assert_eq!(calls[1][..40], samples[160..]);
    }

    #[test]
    fn test_large_chunk_drains_every_frame() {
        let (mut acc, calls, _rx, sink) = accumulator(50, None);

        assert_eq!(acc.feed(&vec![1i16; 150]), 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(acc.pending(), 0);
        assert_eq!(sink.stats().snapshot().frames_encoded, 3);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let (mut acc, calls, _rx, _) = accumulator(8, None);
        assert_eq!(acc.feed(&[]), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_codec_failure_drops_frame_and_continues() {
        let (mut acc, calls, mut rx, sink) = accumulator(4, Some(1));

        assert_eq!(acc.feed(&[1, 2, 3, 4, 5, 6, 7, 8]), 1);

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(sink.stats().snapshot().codec_failures, 1);
        // only the second frame reached the slots
        assert_eq!(rx.read(), Some(vec![2]));
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn test_flush_pads_with_silence() {
        let (mut acc, calls, _rx, _) = accumulator(6, None);

        acc.feed(&[9, 9, 9]);
        assert!(acc.flush());
        assert!(!acc.flush());

        assert_eq!(calls.lock().unwrap()[0], vec![9, 9, 9, 0, 0, 0]);
    }

    #[test]
    fn test_frames_reuse_recycled_buffers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let encoder = RecordingEncoder {
            frame: 2,
            calls,
            fail_on: None,
        };
        let (tx, mut rx) = crate::buffer::frame_slots_sized(1, 8);
        let mut acc = FrameAccumulator::new(Box::new(encoder), tx, EventSink::detached());

        acc.feed(&[1, 2]);
        let first = rx.read().unwrap();
        let ptr = first.as_ptr();
        rx.recycle(first);

        // the pool holds capacity + 2 buffers; cycling through them all brings
        // the recycled one back
        let mut reused = false;
        for _ in 0..4 {
            acc.feed(&[1, 2]);
            let blob = rx.read().unwrap();
            reused |= blob.as_ptr() == ptr;
            rx.recycle(blob);
        }
        assert!(reused);
    }
}
