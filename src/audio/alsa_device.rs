//! ALSA PCM helpers: open a configured device, query capabilities, list hints.

use std::time::Duration;

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::ValueOr;

use super::device::{Direction, Endpoint, DEFAULT_DEVICE};
use super::stream::StreamSettings;
use crate::error::{AudioError, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open `device` for `direction` as interleaved S16LE with the given settings.
///
/// Fails if the hardware cannot run at exactly the requested rate.
pub fn open_pcm(
    device: &str,
    direction: Direction,
    settings: &StreamSettings,
    latency: Option<Duration>,
) -> Result<(PCM, AlsaParams)> {
    let open_err = |reason: alsa::Error| AudioError::Open {
        device: device.to_string(),
        direction,
        reason: reason.to_string(),
    };

    let pcm = PCM::new(device, direction.into(), false).map_err(open_err)?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(open_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(open_err)?;
        hwp.set_format(Format::S16LE).map_err(open_err)?;
        hwp.set_channels(settings.channels).map_err(open_err)?;
        hwp.set_rate_near(settings.sample_rate, ValueOr::Nearest)
            .map_err(open_err)?;
        hwp.set_period_size_near(settings.frames_per_buffer as alsa::pcm::Frames, ValueOr::Nearest)
            .map_err(open_err)?;
        if let Some(latency) = latency {
            hwp.set_buffer_time_near(latency.as_micros() as u32, ValueOr::Nearest)
                .map_err(open_err)?;
        }
        pcm.hw_params(&hwp).map_err(open_err)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current().map_err(open_err)?;
        let rate = hwp.get_rate().map_err(open_err)?;
        let ch = hwp.get_channels().map_err(open_err)?;
        let ps = hwp.get_period_size().map_err(open_err)? as usize;
        (rate, ch, ps)
    };

    if actual_rate != settings.sample_rate {
        return Err(AudioError::Open {
            device: device.to_string(),
            direction,
            reason: format!(
                "requested {} Hz, hardware offers {} Hz",
                settings.sample_rate, actual_rate
            ),
        });
    }

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        direction,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// Query what `device` supports in `direction` without configuring it.
pub fn query_endpoint(device: &str, direction: Direction) -> Result<Endpoint> {
    let pcm = PCM::new(device, direction.into(), true)?;
    let hwp = HwParams::any(&pcm)?;

    let max_channels = hwp.get_channels_max()?;
    let rate_min = hwp.get_rate_min()?;
    let rate_max = hwp.get_rate_max()?;
    let buffer_min = hwp.get_buffer_time_min()?;
    let buffer_max = hwp.get_buffer_time_max()?;

    let default_sample_rate = if (rate_min..=rate_max).contains(&48000) {
        48000
    } else {
        rate_max
    };

    Ok(Endpoint {
        name: device.to_string(),
        direction,
        max_channels,
        default_low_latency: Duration::from_micros(buffer_min as u64),
        default_high_latency: Duration::from_micros(buffer_max as u64),
        default_sample_rate,
    })
}

/// PCM names advertised by the ALSA configuration for `direction`,
/// `"default"` first.
pub fn hint_names(direction: Direction) -> Result<Vec<String>> {
    let wanted: alsa::Direction = direction.into();
    let mut names = vec![DEFAULT_DEVICE.to_string()];

    for hint in HintIter::new_str(None, "pcm")? {
        let Some(name) = hint.name else { continue };
        // hints without a direction serve both
        let matches = hint.direction.is_none_or(|d| d == wanted);
        if matches && name != "null" && !names.contains(&name) {
            names.push(name);
        }
    }

    Ok(names)
}
