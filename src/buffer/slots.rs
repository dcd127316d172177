//! Circular slot buffer for variable-length codec frames.
//!
//! Compressed frames cannot be concatenated into a byte stream (a decoder fed a
//! slice that straddles two frames fails), so each frame keeps its own slot.
//! The slots are a bounded lock-free queue; when it is full a write evicts the
//! oldest unread frame.
//!
//! Frame buffers circulate: the writer takes an empty one from a spare pool,
//! the reader hands it back once the frame is consumed. After the pool has
//! warmed up neither side allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Frames in flight outside the queue: one being encoded, one being decoded.
const IN_FLIGHT: usize = 2;

struct Shared {
    frames: ArrayQueue<Vec<u8>>,
    spare: ArrayQueue<Vec<u8>>,
    written: AtomicU64,
    overwritten: AtomicU64,
}

impl Shared {
    fn recycle(&self, mut blob: Vec<u8>) {
        blob.clear();
        // a full pool just lets the buffer go
        let _ = self.spare.push(blob);
    }
}

/// Create a buffer of `capacity` slots and split it into its two halves.
pub fn frame_slots(capacity: usize) -> (SlotWriter, SlotReader) {
    frame_slots_sized(capacity, 0)
}

/// Like [`frame_slots`], with every pooled buffer pre-allocated to hold
/// `frame_bytes`, so writes up to that size never allocate.
pub fn frame_slots_sized(capacity: usize, frame_bytes: usize) -> (SlotWriter, SlotReader) {
    let capacity = capacity.max(1);
    let spare = ArrayQueue::new(capacity + IN_FLIGHT);
    for _ in 0..capacity + IN_FLIGHT {
        let _ = spare.push(Vec::with_capacity(frame_bytes));
    }

    let shared = Arc::new(Shared {
        frames: ArrayQueue::new(capacity),
        spare,
        written: AtomicU64::new(0),
        overwritten: AtomicU64::new(0),
    });

    (
        SlotWriter {
            shared: Arc::clone(&shared),
        },
        SlotReader { shared },
    )
}

/// Producing half of a frame slot buffer.
pub struct SlotWriter {
    shared: Arc<Shared>,
}

impl SlotWriter {
    /// An empty buffer from the spare pool to encode the next frame into.
    pub fn buffer(&mut self) -> Vec<u8> {
        self.shared.spare.pop().unwrap_or_default()
    }

    /// Copy `blob` into the next slot.
    pub fn write(&mut self, blob: &[u8]) {
        let mut buf = self.buffer();
        buf.extend_from_slice(blob);
        self.write_owned(buf);
    }

    /// Move an already-owned blob into the next slot, evicting the oldest
    /// unread frame if every slot is taken.
    pub fn write_owned(&mut self, blob: Vec<u8>) {
        let shared = &*self.shared;
        if let Some(evicted) = shared.frames.force_push(blob) {
            shared.overwritten.fetch_add(1, Ordering::Relaxed);
            shared.recycle(evicted);
        }
        shared.written.fetch_add(1, Ordering::Release);
    }

    /// Return a buffer that was taken with [`buffer`](Self::buffer) but not written.
    pub fn recycle(&mut self, blob: Vec<u8>) {
        self.shared.recycle(blob);
    }

    pub fn capacity(&self) -> usize {
        self.shared.frames.capacity()
    }

    /// Frames written since creation.
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    /// Unread frames that were replaced before anyone read them.
    pub fn overwritten(&self) -> u64 {
        self.shared.overwritten.load(Ordering::Relaxed)
    }
}

/// Consuming half of a frame slot buffer.
pub struct SlotReader {
    shared: Arc<Shared>,
}

impl SlotReader {
    /// Take the oldest unread frame, or `None` when every slot is empty.
    pub fn read(&mut self) -> Option<Vec<u8>> {
        self.shared.frames.pop()
    }

    /// Hand a consumed frame's buffer back to the writer.
    pub fn recycle(&mut self, blob: Vec<u8>) {
        self.shared.recycle(blob);
    }

    pub fn capacity(&self) -> usize {
        self.shared.frames.capacity()
    }

    /// Frames written but not yet read.
    pub fn pending(&self) -> usize {
        self.shared.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_write_is_empty() {
        let (_tx, mut rx) = frame_slots(4);
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn test_write_then_read_returns_exact_bytes() {
        let (mut tx, mut rx) = frame_slots(4);
        let blob = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];

        tx.write(&blob);
        assert_eq!(rx.read(), Some(blob));
        assert_eq!(rx.read(), None);

        // an empty read leaves nothing behind: the next write is the next read
        tx.write(b"next");
        assert_eq!(rx.read(), Some(b"next".to_vec()));
    }

    #[test]
    fn test_overwrite_yields_newest_in_order() {
        let (mut tx, mut rx) = frame_slots(4);
        for blob in [b"A", b"B", b"C", b"D", b"E"] {
            tx.write(blob);
        }
        assert_eq!(tx.overwritten(), 1);
        assert_eq!(tx.written(), 5);

        let reads: Vec<Vec<u8>> = std::iter::from_fn(|| rx.read()).collect();
        assert_eq!(
            reads,
            vec![b"B".to_vec(), b"C".to_vec(), b"D".to_vec(), b"E".to_vec()]
        );
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn test_variable_length_frames_keep_their_boundaries() {
        let (mut tx, mut rx) = frame_slots(8);
        let frames: Vec<Vec<u8>> = (1..=5).map(|n| vec![n as u8; n * 3]).collect();

        for f in &frames {
            tx.write(f);
        }
        for f in &frames {
            assert_eq!(rx.read().as_ref(), Some(f));
        }
    }

    #[test]
    fn test_pending_counts_unread_frames() {
        let (mut tx, mut rx) = frame_slots(3);
        assert_eq!(rx.pending(), 0);
        tx.write(b"1");
        tx.write(b"2");
        assert_eq!(rx.pending(), 2);
        rx.read();
        assert_eq!(rx.pending(), 1);
        for _ in 0..5 {
            tx.write(b"x");
        }
        assert_eq!(rx.pending(), 3);
    }

    #[test]
    fn test_recycled_buffers_are_reused() {
        let (mut tx, mut rx) = frame_slots_sized(2, 64);

        let mut buf = tx.buffer();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        buf.extend_from_slice(b"frame");
        let ptr = buf.as_ptr();
        tx.write_owned(buf);

        let frame = rx.read().unwrap();
        assert_eq!(frame, b"frame");
        rx.recycle(frame);

        // drain the pre-filled pool until the recycled buffer comes back
        let mut reused = false;
        for _ in 0..2 + IN_FLIGHT + 1 {
            let buf = tx.buffer();
            assert!(buf.is_empty());
            if buf.as_ptr() == ptr {
                reused = true;
                break;
            }
        }
        assert!(reused);
    }

    #[test]
    fn test_cross_thread_frames_are_not_torn() {
        let (mut tx, mut rx) = frame_slots(2048);
        let total = 1000usize;

        let writer = std::thread::spawn(move || {
            for i in 0..total {
                let len = 1 + i % 17;
                tx.write(&vec![(i % 251) as u8; len]);
            }
        });

        let mut seen = 0usize;
        while seen < total {
            match rx.read() {
                Some(frame) => {
                    assert_eq!(frame.len(), 1 + seen % 17);
                    assert!(frame.iter().all(|&b| b == (seen % 251) as u8));
                    rx.recycle(frame);
                    seen += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        writer.join().unwrap();
    }

    /// A reader racing a writer that keeps lapping it must never be left
    /// looking at an empty slot while newer frames are queued.
    #[test]
    fn test_lapped_reader_never_strands_frames() {
        for _ in 0..50 {
            let (mut tx, mut rx) = frame_slots(2);
            let total = 20_000u32;

            let writer = std::thread::spawn(move || {
                for seq in 0..total {
                    tx.write(&seq.to_le_bytes());
                }
            });

            let mut last: Option<u32> = None;
            let mut take = |rx: &mut SlotReader| {
                let frame = rx.read()?;
                let seq = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
                if let Some(prev) = last {
                    assert!(seq > prev, "frame {seq} read after {prev}");
                }
                last = Some(seq);
                rx.recycle(frame);
                Some(seq)
            };

            while !writer.is_finished() {
                take(&mut rx);
            }
            writer.join().unwrap();

            while rx.pending() > 0 {
                assert!(take(&mut rx).is_some(), "empty read with frames pending");
            }
            assert_eq!(last, Some(total - 1));
        }
    }
}
