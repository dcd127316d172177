use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;

use crate::audio::StreamSettings;
use crate::codec::{self, CodecKind, CodecParams};

/// Prefix of the environment variables that override built-in defaults.
pub const ENV_PREFIX: &str = "VOXLINK_";

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 设备
    pub capture_device: String,
    pub playback_device: String,

    // 硬件流参数
    pub sample_rate: u32,
    pub channels: u32,
    pub frames_per_buffer: usize,

    // 编解码
    pub stream_format: String,
    pub frame_duration_ms: u32,
    pub bitrate: i32,

    // 缓冲区
    pub slot_frames: usize,
    pub ring_periods: usize,
    pub event_queue: usize,

    pub run_seconds: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            capture_device: env!("CAPTURE_DEVICE").to_string(),
            playback_device: env!("PLAYBACK_DEVICE").to_string(),

            sample_rate: parse("SAMPLE_RATE", env!("SAMPLE_RATE"))?,
            channels: parse("CHANNELS", env!("CHANNELS"))?,
            frames_per_buffer: parse("FRAMES_PER_BUFFER", env!("FRAMES_PER_BUFFER"))?,

            stream_format: env!("STREAM_FORMAT").to_string(),
            frame_duration_ms: parse("FRAME_DURATION_MS", env!("FRAME_DURATION_MS"))?,
            bitrate: parse("CODEC_BITRATE", env!("CODEC_BITRATE"))?,

            slot_frames: parse("SLOT_FRAMES", env!("SLOT_FRAMES"))?,
            ring_periods: parse("RING_PERIODS", env!("RING_PERIODS"))?,
            event_queue: parse("EVENT_QUEUE", env!("EVENT_QUEUE"))?,

            run_seconds: parse("RUN_SECONDS", env!("RUN_SECONDS"))?,
        })
    }

    /// Build-time defaults with `VOXLINK_*` overrides from the process
    /// environment applied on top.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::new()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides looked up by their full variable name
    /// (e.g. `VOXLINK_SAMPLE_RATE`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("CAPTURE_DEVICE") {
            self.capture_device = v;
        }
        if let Some(v) = get("PLAYBACK_DEVICE") {
            self.playback_device = v;
        }
        if let Some(v) = get("SAMPLE_RATE") {
            self.sample_rate = parse("VOXLINK_SAMPLE_RATE", &v)?;
        }
        if let Some(v) = get("CHANNELS") {
            self.channels = parse("VOXLINK_CHANNELS", &v)?;
        }
        if let Some(v) = get("FRAMES_PER_BUFFER") {
            self.frames_per_buffer = parse("VOXLINK_FRAMES_PER_BUFFER", &v)?;
        }
        if let Some(v) = get("FRAME_DURATION_MS") {
            self.frame_duration_ms = parse("VOXLINK_FRAME_DURATION_MS", &v)?;
        }
        if let Some(v) = get("STREAM_FORMAT") {
            self.stream_format = v;
        }
        if let Some(v) = get("RUN_SECONDS") {
            self.run_seconds = parse("VOXLINK_RUN_SECONDS", &v)?;
        }
        Ok(())
    }

    /// Reject values the audio core cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        if self.channels == 0 {
            bail!("channels must be positive");
        }
        if self.frames_per_buffer == 0 {
            bail!("frames_per_buffer must be positive");
        }
        if self.frame_duration_ms == 0 {
            bail!("frame_duration_ms must be positive");
        }
        if self.slot_frames == 0 {
            bail!("slot_frames must be positive");
        }
        if self.ring_periods == 0 {
            bail!("ring_periods must be positive");
        }
        if self.codec_frame_samples() == 0 {
            bail!(
                "a {} ms frame at {} Hz holds no samples",
                self.frame_duration_ms,
                self.sample_rate
            );
        }
        self.codec_kind()?;
        Ok(())
    }

    pub fn codec_kind(&self) -> anyhow::Result<CodecKind> {
        CodecKind::from_str(&self.stream_format)
            .with_context(|| format!("invalid stream_format \"{}\"", self.stream_format))
    }

    /// Interleaved samples in one codec frame.
    pub fn codec_frame_samples(&self) -> usize {
        codec::frame_samples(self.sample_rate, self.channels, self.frame_duration_ms)
    }

    pub fn codec_params(&self) -> anyhow::Result<CodecParams> {
        Ok(CodecParams {
            kind: self.codec_kind()?,
            sample_rate: self.sample_rate,
            channels: self.channels,
            frame_duration_ms: self.frame_duration_ms,
            bitrate: self.bitrate,
        })
    }

    /// Settings for a raw PCM stream.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings::new(self.sample_rate, self.channels, self.frames_per_buffer)
            .with_buffer_periods(self.ring_periods)
    }

    /// Settings for a stream driven by the configured codec.
    pub fn codec_stream_settings(&self) -> StreamSettings {
        self.stream_settings()
            .with_codec_frame(self.codec_frame_samples())
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_secs(self.run_seconds)
    }
}

fn parse<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {name} (\"{value}\")"))
}
