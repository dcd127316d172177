//! Opus encoder/decoder working on whole frames of interleaved i16 PCM.

use super::{frame_samples, FrameDecoder, FrameEncoder};
use crate::error::CodecError;

/// Largest packet libopus will produce for one frame.
const MAX_PACKET_BYTES: usize = 4000;

const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];
const OPUS_FRAME_DURATIONS_MS: [u32; 5] = [5, 10, 20, 40, 60];

fn opus_channels(channels: u32) -> Result<opus::Channels, CodecError> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        n => Err(CodecError::UnsupportedChannels(n)),
    }
}

fn check_params(sample_rate: u32, duration_ms: u32) -> Result<(), CodecError> {
    if !OPUS_SAMPLE_RATES.contains(&sample_rate) {
        return Err(CodecError::UnsupportedRate(sample_rate));
    }
    if !OPUS_FRAME_DURATIONS_MS.contains(&duration_ms) {
        return Err(CodecError::UnsupportedDuration(duration_ms));
    }
    Ok(())
}

// ======================== Opus Encoder ========================

pub struct OpusFrameEncoder {
    encoder: opus::Encoder,
    frame_samples: usize,
}

impl OpusFrameEncoder {
    /// * `sample_rate` - One of 8000, 12000, 16000, 24000, 48000
    /// * `channels`    - 1 or 2
    /// * `duration_ms` - Frame duration (5, 10, 20, 40 or 60)
    /// * `bitrate`     - Bitrate in bits/s (e.g. 64000)
    pub fn new(
        sample_rate: u32,
        channels: u32,
        duration_ms: u32,
        bitrate: i32,
    ) -> Result<Self, CodecError> {
        check_params(sample_rate, duration_ms)?;

        let mut encoder =
            opus::Encoder::new(sample_rate, opus_channels(channels)?, opus::Application::Voip)?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;

        Ok(Self {
            encoder,
            frame_samples: frame_samples(sample_rate, channels, duration_ms),
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn max_frame_bytes(&self) -> usize {
        MAX_PACKET_BYTES
    }

    fn encode(&mut self, pcm: &[i16], out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.clear();
        if pcm.len() != self.frame_samples {
            return Err(CodecError::FrameSize {
                expected: self.frame_samples,
                actual: pcm.len(),
            });
        }

        out.resize(MAX_PACKET_BYTES, 0);
        match self.encoder.encode(pcm, out) {
            Ok(len) => {
                out.truncate(len);
                Ok(())
            }
            Err(e) => {
                out.clear();
                Err(e.into())
            }
        }
    }
}

// ======================== Opus Decoder ========================

pub struct OpusFrameDecoder {
    decoder: opus::Decoder,
    channels: usize,
    frame_samples: usize,
}

impl OpusFrameDecoder {
    pub fn new(sample_rate: u32, channels: u32, duration_ms: u32) -> Result<Self, CodecError> {
        check_params(sample_rate, duration_ms)?;

        let decoder = opus::Decoder::new(sample_rate, opus_channels(channels)?)?;

        Ok(Self {
            decoder,
            channels: channels as usize,
            frame_samples: frame_samples(sample_rate, channels, duration_ms),
        })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        if out.len() < self.frame_samples {
            return Err(CodecError::FrameSize {
                expected: self.frame_samples,
                actual: out.len(),
            });
        }

        let per_channel = self
            .decoder
            .decode(data, &mut out[..self.frame_samples], false)?;
        let produced = per_channel * self.channels;

        if produced != self.frame_samples {
            return Err(CodecError::FrameSize {
                expected: self.frame_samples,
                actual: produced,
            });
        }
        Ok(produced)
    }
}
