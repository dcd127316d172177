//! Property-based tests for the buffers and the frame accumulator.
//!
//! Run with: cargo test --test buffer_props

use proptest::prelude::*;

use voxlink::buffer::{frame_slots, sample_ring, Underrun};
use voxlink::codec::{FrameDecoder, PcmFrameDecoder, PcmFrameEncoder};
use voxlink::pipeline::{EventSink, FrameAccumulator};

fn chunks() -> impl Strategy<Value = Vec<Vec<i16>>> {
    prop::collection::vec(prop::collection::vec(any::<i16>(), 0..200), 0..20)
}

proptest! {
    /// Samples come back in write order while nothing overflows.
    #[test]
    fn ring_preserves_order_within_capacity(chunks in chunks()) {
        let all: Vec<i16> = chunks.concat();
        let (mut tx, mut rx) = sample_ring(all.len().max(1));

        for chunk in &chunks {
            prop_assert_eq!(tx.write(chunk), 0);
        }

        let (out, starved) = rx.read_vec(all.len());
        prop_assert_eq!(out, all);
        prop_assert!(!starved);
    }

    /// On overflow the newest `capacity` samples survive and every lost
    /// sample is accounted for.
    #[test]
    fn ring_keeps_newest_on_overflow(chunks in chunks(), capacity in 1usize..300) {
        let all: Vec<i16> = chunks.concat();
        let (mut tx, mut rx) = sample_ring(capacity);

        let lost: usize = chunks.iter().map(|c| tx.write(c)).sum();
        prop_assert_eq!(lost, all.len().saturating_sub(capacity));
        prop_assert_eq!(rx.available(), all.len().min(capacity));

        let (out, _) = rx.read_vec(capacity);
        prop_assert_eq!(&out[..], &all[all.len() - out.len()..]);
    }

    /// Silence-fill reads always fill the whole output.
    #[test]
    fn ring_silence_reads_fill_output(held in 0usize..64, want in 1usize..128) {
        let (mut tx, mut rx) = sample_ring(64);
        tx.write(&vec![9i16; held]);

        let mut out = vec![1i16; want];
        let outcome = rx.read(&mut out, Underrun::Silence);

        prop_assert_eq!(outcome.read, held.min(want));
        prop_assert_eq!(outcome.starved, held < want);
        prop_assert!(out[outcome.read..].iter().all(|&s| s == 0));
    }

    /// A reader that falls behind sees the newest `capacity` frames, in order.
    #[test]
    fn slots_return_newest_frames_in_order(count in 0usize..40, capacity in 1usize..16) {
        let (mut tx, mut rx) = frame_slots(capacity);
        for i in 0..count {
            tx.write(&(i as u32).to_le_bytes());
        }

        let mut seen = Vec::new();
        while let Some(blob) = rx.read() {
            seen.push(u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize);
        }

        let first = count.saturating_sub(capacity);
        prop_assert_eq!(seen, (first..count).collect::<Vec<_>>());
    }

    /// However the input is chunked, the accumulator emits floor(T/F) frames
    /// carrying the first floor(T/F)*F samples, and holds T mod F.
    #[test]
    fn accumulator_is_chunking_invariant(chunks in chunks(), frame in 1usize..97) {
        let all: Vec<i16> = chunks.concat();
        let (tx, mut rx) = frame_slots(all.len() / frame + 1);
        let sink = EventSink::detached();
        let encoder = PcmFrameEncoder::new(frame).unwrap();
        let mut acc = FrameAccumulator::new(Box::new(encoder), tx, sink.clone());

        let emitted: usize = chunks.iter().map(|c| acc.feed(c)).sum();
        let whole = all.len() / frame;
        prop_assert_eq!(emitted, whole);
        prop_assert_eq!(acc.pending(), all.len() % frame);
        prop_assert_eq!(sink.stats().snapshot().frames_encoded, whole as u64);

        let mut decoder = PcmFrameDecoder::new(frame).unwrap();
        let mut decoded = Vec::new();
        let mut buf = vec![0i16; frame];
        while let Some(blob) = rx.read() {
            let n = decoder.decode(&blob, &mut buf).unwrap();
            decoded.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(&decoded[..], &all[..whole * frame]);
    }
}
