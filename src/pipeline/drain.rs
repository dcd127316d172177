//! Decoder side: turn queued codec frames into exactly-sized playback periods.
//!
//! Runs inside the playback callback. Each tick pulls frames from the slot
//! buffer until enough PCM is buffered for the request, then copies one
//! period out. A starved drain plays silence; it never blocks and never fails.

use crate::buffer::{sample_ring, RingConsumer, RingProducer, SlotReader, Underrun};
use crate::codec::FrameDecoder;

use super::events::{CodecStage, EventSink};

pub struct FrameDrain {
    decoder: Box<dyn FrameDecoder>,
    slots: SlotReader,
    pcm_in: RingProducer,
    pcm_out: RingConsumer,
    scratch: Vec<i16>,
    sink: EventSink,
}

impl FrameDrain {
    /// `period_samples` is the size of one playback request; the private ring
    /// holds at least one codec frame plus one period.
    pub fn new(
        decoder: Box<dyn FrameDecoder>,
        slots: SlotReader,
        period_samples: usize,
        sink: EventSink,
    ) -> Self {
        let frame = decoder.frame_samples().max(1);
        let (pcm_in, pcm_out) = sample_ring(frame + period_samples.max(1));
        Self {
            decoder,
            slots,
            pcm_in,
            pcm_out,
            scratch: vec![0i16; frame],
            sink,
        }
    }

    /// Fill `out` completely, with decoded audio where available and silence
    /// for the rest.
    pub fn tick(&mut self, out: &mut [i16]) {
        while self.pcm_out.available() < out.len() {
            let Some(blob) = self.slots.read() else {
                break;
            };

            // nothing buffered and the request is exactly one frame: skip the ring
            let direct = self.pcm_out.available() == 0 && out.len() == self.scratch.len();
            let target = if direct { &mut *out } else { &mut self.scratch[..] };
            let decoded = self.decoder.decode(&blob, target);
            self.slots.recycle(blob);

            match decoded {
                Ok(_) if direct => {
                    self.sink.frame_decoded();
                    return;
                }
                Ok(n) => {
                    self.sink.frame_decoded();
                    let lost = self.pcm_in.write(&self.scratch[..n]);
                    if lost > 0 {
                        self.sink.overrun(lost);
                    }
                }
                Err(e) => self.sink.codec_failure(CodecStage::Decode, e),
            }
        }

        let outcome = self.pcm_out.read(out, Underrun::Silence);
        if outcome.starved {
            self.sink.underrun(out.len() - outcome.read);
        }
    }

    /// Decoded samples waiting to be played.
    pub fn buffered(&self) -> usize {
        self.pcm_out.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::frame_slots;
    use crate::codec::{FrameEncoder, PcmFrameDecoder, PcmFrameEncoder};

    fn drain(frame: usize, period: usize) -> (FrameDrain, crate::buffer::SlotWriter, EventSink) {
        let (tx, rx) = frame_slots(8);
        let sink = EventSink::detached();
        let dec = PcmFrameDecoder::new(frame).unwrap();
        (FrameDrain::new(Box::new(dec), rx, period, sink.clone()), tx, sink)
    }

    fn encode(frame: &[i16]) -> Vec<u8> {
        let mut blob = Vec::new();
        PcmFrameEncoder::new(frame.len())
            .unwrap()
            .encode(frame, &mut blob)
            .unwrap();
        blob
    }

    #[test]
    fn test_empty_slots_play_silence() {
        let (mut drain, _tx, sink) = drain(4, 4);
        let mut out = [5i16; 4];

        drain.tick(&mut out);

        assert_eq!(out, [0; 4]);
        assert_eq!(sink.stats().snapshot().underruns, 1);
    }

    #[test]
    fn test_exact_frame_decodes_straight_to_output() {
        let (mut drain, mut tx, sink) = drain(4, 4);
        tx.write(&encode(&[1, 2, 3, 4]));

        let mut out = [0i16; 4];
        drain.tick(&mut out);

        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(drain.buffered(), 0);
        assert_eq!(sink.stats().snapshot().underruns, 0);
    }

    #[test]
    fn test_small_periods_split_a_frame() {
        let (mut drain, mut tx, _) = drain(6, 4);
        tx.write(&encode(&[1, 2, 3, 4, 5, 6]));
        tx.write(&encode(&[7, 8, 9, 10, 11, 12]));

        let mut played = Vec::new();
        let mut out = [0i16; 4];
        for _ in 0..3 {
            drain.tick(&mut out);
            played.extend_from_slice(&out);
        }

        assert_eq!(played, (1..=12).collect::<Vec<i16>>());
    }

    #[test]
    fn test_partial_data_is_padded_with_silence() {
        let (mut drain, mut tx, sink) = drain(2, 4);
        tx.write(&encode(&[7, 8]));

        let mut out = [1i16; 4];
        drain.tick(&mut out);

        assert_eq!(out, [7, 8, 0, 0]);
        assert_eq!(sink.stats().snapshot().underruns, 1);
    }

    #[test]
    fn test_bad_frame_is_skipped() {
        let (mut drain, mut tx, sink) = drain(2, 2);
        tx.write(&[0xff]);
        tx.write(&encode(&[3, 4]));

        let mut out = [0i16; 2];
        drain.tick(&mut out);

        assert_eq!(out, [3, 4]);
        assert_eq!(sink.stats().snapshot().codec_failures, 1);
    }

    #[test]
    fn test_decoded_frames_go_back_to_the_pool() {
        let (mut tx, rx) = crate::buffer::frame_slots_sized(1, 4);
        let dec = PcmFrameDecoder::new(2).unwrap();
        let mut drain = FrameDrain::new(Box::new(dec), rx, 2, EventSink::detached());

        let mut blob = tx.buffer();
        blob.extend_from_slice(&encode(&[1, 2]));
        let ptr = blob.as_ptr();
        tx.write_owned(blob);

        let mut out = [0i16; 2];
        drain.tick(&mut out);
        assert_eq!(out, [1, 2]);

        // capacity 1 plus two in flight: the decoded buffer is third in line
        let mut reused = false;
        for _ in 0..3 {
            reused |= tx.buffer().as_ptr() == ptr;
        }
        assert!(reused);
    }
}
