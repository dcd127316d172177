//! Block codecs: fixed-size PCM frames in, variable-length blobs out.
//!
//! Every codec instance fixes its frame size `F` (interleaved samples) at
//! construction from the sample rate, channel count and frame duration.

mod opus_codec;
mod pcm;

use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

pub use opus_codec::{OpusFrameDecoder, OpusFrameEncoder};
pub use pcm::{PcmFrameDecoder, PcmFrameEncoder};

/// Encodes exactly one frame of `frame_samples()` interleaved samples.
pub trait FrameEncoder: Send {
    fn frame_samples(&self) -> usize;

    /// Largest blob one frame can encode to, in bytes.
    fn max_frame_bytes(&self) -> usize;

    /// Encode `pcm` into `out`, replacing its contents. A buffer with
    /// `max_frame_bytes()` of capacity is never reallocated.
    fn encode(&mut self, pcm: &[i16], out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// Decodes one compressed blob back into exactly `frame_samples()` samples.
pub trait FrameDecoder: Send {
    fn frame_samples(&self) -> usize;

    /// Decode `data` into `out` (at least `frame_samples()` long) and return
    /// the number of interleaved samples produced.
    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize, CodecError>;
}

/// Compressed stream format, as named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Opus,
    Pcm,
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opus" => Ok(CodecKind::Opus),
            "pcm" => Ok(CodecKind::Pcm),
            _ => Err(CodecError::UnknownFormat),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Opus => f.write_str("opus"),
            CodecKind::Pcm => f.write_str("pcm"),
        }
    }
}

/// Parameters shared by both directions of a codec.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParams {
    pub kind: CodecKind,
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration_ms: u32,
    /// Target bitrate in bits/s, ignored by PCM
    pub bitrate: i32,
}

impl CodecParams {
    pub fn frame_samples(&self) -> usize {
        frame_samples(self.sample_rate, self.channels, self.frame_duration_ms)
    }
}

/// Interleaved samples in one codec frame.
pub fn frame_samples(sample_rate: u32, channels: u32, frame_duration_ms: u32) -> usize {
    (sample_rate as u64 * frame_duration_ms as u64 / 1000) as usize * channels as usize
}

pub fn create_encoder(params: &CodecParams) -> Result<Box<dyn FrameEncoder>, CodecError> {
    match params.kind {
        CodecKind::Opus => Ok(Box::new(OpusFrameEncoder::new(
            params.sample_rate,
            params.channels,
            params.frame_duration_ms,
            params.bitrate,
        )?)),
        CodecKind::Pcm => Ok(Box::new(PcmFrameEncoder::new(params.frame_samples())?)),
    }
}

pub fn create_decoder(params: &CodecParams) -> Result<Box<dyn FrameDecoder>, CodecError> {
    match params.kind {
        CodecKind::Opus => Ok(Box::new(OpusFrameDecoder::new(
            params.sample_rate,
            params.channels,
            params.frame_duration_ms,
        )?)),
        CodecKind::Pcm => Ok(Box::new(PcmFrameDecoder::new(params.frame_samples())?)),
    }
}
