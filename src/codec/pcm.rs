//! Raw PCM "codec": frames travel as little-endian i16 bytes.
//!
//! Used for the `pcm` stream format and wherever a bit-exact pipeline is
//! wanted (the synthetic engine's end-to-end checks rely on it).

use super::{FrameDecoder, FrameEncoder};
use crate::error::CodecError;

fn check_frame_samples(frame_samples: usize) -> Result<(), CodecError> {
    if frame_samples == 0 {
        return Err(CodecError::EmptyFrame);
    }
    Ok(())
}

pub struct PcmFrameEncoder {
    frame_samples: usize,
}

impl PcmFrameEncoder {
    pub fn new(frame_samples: usize) -> Result<Self, CodecError> {
        check_frame_samples(frame_samples)?;
        Ok(Self { frame_samples })
    }
}

impl FrameEncoder for PcmFrameEncoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn max_frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }

    fn encode(&mut self, pcm: &[i16], out: &mut Vec<u8>) -> Result<(), CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::FrameSize {
                expected: self.frame_samples,
                actual: pcm.len(),
            });
        }
        out.clear();
        for s in pcm {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Ok(())
    }
}

pub struct PcmFrameDecoder {
    frame_samples: usize,
}

impl PcmFrameDecoder {
    pub fn new(frame_samples: usize) -> Result<Self, CodecError> {
        check_frame_samples(frame_samples)?;
        Ok(Self { frame_samples })
    }
}

impl FrameDecoder for PcmFrameDecoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        let samples = data.len() / 2;
        if data.len() % 2 != 0 || samples != self.frame_samples {
            return Err(CodecError::FrameSize {
                expected: self.frame_samples,
                actual: samples,
            });
        }
        if out.len() < samples {
            return Err(CodecError::FrameSize {
                expected: samples,
                actual: out.len(),
            });
        }

        for (dst, bytes) in out.iter_mut().zip(data.chunks_exact(2)) {
            *dst = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_frame_is_bit_exact() {
        let mut enc = PcmFrameEncoder::new(4).unwrap();
        let mut dec = PcmFrameDecoder::new(4).unwrap();

        let mut blob = vec![0xaa; 3];
        enc.encode(&[1, -1, i16::MAX, i16::MIN], &mut blob).unwrap();
        assert_eq!(blob, vec![1, 0, 0xff, 0xff, 0xff, 0x7f, 0x00, 0x80]);

        let mut out = [0i16; 4];
        assert_eq!(dec.decode(&blob, &mut out).unwrap(), 4);
        assert_eq!(out, [1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let mut dec = PcmFrameDecoder::new(4).unwrap();
        let mut out = [0i16; 4];
        assert!(dec.decode(&[1, 2, 3], &mut out).is_err());
        assert!(dec.decode(&[0; 6], &mut out).is_err());
    }

    #[test]
    fn test_zero_frame_rejected() {
        assert_eq!(PcmFrameEncoder::new(0).err(), Some(CodecError::EmptyFrame));
    }

    #[test]
    fn test_encode_into_sized_buffer_keeps_allocation() {
        let mut enc = PcmFrameEncoder::new(160).unwrap();
        let mut out = Vec::with_capacity(enc.max_frame_bytes());
        let ptr = out.as_ptr();

        for _ in 0..3 {
            enc.encode(&[5i16; 160], &mut out).unwrap();
            assert_eq!(out.len(), 320);
        }
        assert_eq!(out.as_ptr(), ptr);
    }
}
