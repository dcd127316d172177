//! In-process engine that needs no sound hardware.
//!
//! Capture endpoints produce a deterministic ramp `1, 2, .., 1000, 1, 2, ..`
//! and playback endpoints record the most recent samples they were asked to
//! play. Periods are
//! paced by the wall clock (optionally sped up) on the same callback thread
//! the native engine uses, so the rest of the crate cannot tell the two apart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::device::{Direction, Endpoint};
use super::engine::{AudioEngine, NativeStream, Signal, StreamCallback, WorkerStream};
use super::stream::StreamSettings;
use crate::error::{AudioError, Result};
use crate::pipeline::EventSink;

pub const SYNTHETIC_MICROPHONE: &str = "Synthetic Microphone";
pub const SYNTHETIC_SPEAKER: &str = "Synthetic Speaker";

/// Length of the generated capture ramp.
pub const RAMP_PERIOD: u64 = 1000;

/// Samples each playback tap keeps by default: ten seconds of 48 kHz stereo.
pub const DEFAULT_TAP_LIMIT: usize = 48000 * 2 * 10;

const SUPPORTED_RATES: [u32; 6] = [8000, 12000, 16000, 24000, 44100, 48000];

/// Sample `n` of the capture ramp.
pub fn ramp_sample(n: u64) -> i16 {
    ((n % RAMP_PERIOD) + 1) as i16
}

type Tap = Arc<Mutex<VecDeque<i16>>>;

pub struct SyntheticEngine {
    endpoints: Vec<Endpoint>,
    time_scale: f64,
    tap_limit: usize,
    taps: Mutex<HashMap<String, Tap>>,
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticEngine {
    /// One stereo microphone and one stereo speaker, both defaults.
    pub fn new() -> Self {
        Self {
            endpoints: vec![
                synthetic_endpoint(SYNTHETIC_MICROPHONE, Direction::Capture),
                synthetic_endpoint(SYNTHETIC_SPEAKER, Direction::Playback),
            ],
            time_scale: 1.0,
            tap_limit: DEFAULT_TAP_LIMIT,
            taps: Mutex::new(HashMap::new()),
        }
    }

    /// Run periods `scale` times faster than real time.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = if scale > 0.0 { scale } else { 1.0 };
        self
    }

    /// Keep at most `samples` of played audio per device; older samples are
    /// discarded first.
    pub fn with_tap_limit(mut self, samples: usize) -> Self {
        self.tap_limit = samples;
        self
    }

    /// Add an endpoint. The first endpoint of each direction is the default.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// An engine with no endpoints at all.
    pub fn empty() -> Self {
        Self {
            endpoints: Vec::new(),
            ..Self::new()
        }
    }

    /// The most recent samples played on `device`, across all its streams,
    /// oldest first.
    pub fn played(&self, device: &str) -> Vec<i16> {
        let taps = match self.taps.lock() {
            Ok(taps) => taps,
            Err(poisoned) => poisoned.into_inner(),
        };
        taps.get(device)
            .map(|tap| match tap.lock() {
                Ok(samples) => samples.iter().copied().collect(),
                Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
            })
            .unwrap_or_default()
    }

    fn tap(&self, device: &str) -> Tap {
        let mut taps = match self.taps.lock() {
            Ok(taps) => taps,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(taps.entry(device.to_string()).or_default())
    }
}

/// A two-channel endpoint with 48 kHz native rate.
pub fn synthetic_endpoint(name: &str, direction: Direction) -> Endpoint {
    Endpoint {
        name: name.to_string(),
        direction,
        max_channels: 2,
        default_low_latency: Duration::from_millis(10),
        default_high_latency: Duration::from_millis(100),
        default_sample_rate: 48000,
    }
}

impl AudioEngine for SyntheticEngine {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<Endpoint>> {
        Ok(self.endpoints.clone())
    }

    fn default_endpoint(&self, direction: Direction) -> Result<Endpoint> {
        self.endpoints
            .iter()
            .find(|ep| ep.direction == direction)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: super::device::DEFAULT_DEVICE.to_string(),
                direction,
            })
    }

    fn open_callback_stream(
        &self,
        endpoint: &Endpoint,
        settings: &StreamSettings,
        mut callback: StreamCallback,
        _sink: EventSink,
    ) -> Result<Box<dyn NativeStream>> {
        let refuse = |reason: String| AudioError::Open {
            device: endpoint.name.clone(),
            direction: endpoint.direction,
            reason,
        };
        if !SUPPORTED_RATES.contains(&settings.sample_rate) {
            return Err(refuse(format!("unsupported sample rate {}", settings.sample_rate)));
        }
        if settings.channels == 0 || settings.channels > endpoint.max_channels {
            return Err(refuse(format!("unsupported channel count {}", settings.channels)));
        }
        if settings.frames_per_buffer == 0 {
            return Err(refuse("zero frames per buffer".into()));
        }

        let period = settings.period().div_f64(self.time_scale);
        let mut buf = vec![0i16; settings.period_samples()];
        let direction = endpoint.direction;
        let tap_limit = self.tap_limit;
        let tap = match direction {
            Direction::Playback => Some(self.tap(&endpoint.name)),
            Direction::Capture => None,
        };
        let label = format!("{} {}", endpoint.name, direction);
        let thread_name = match direction {
            Direction::Capture => "synthetic-capture",
            Direction::Playback => "synthetic-playback",
        };

        let stream = WorkerStream::spawn(thread_name, label, move |ctx| {
            let mut produced: u64 = 0;
            let mut next_tick: Option<Instant> = None;

            loop {
                match ctx.signal() {
                    Signal::Exit => break,
                    Signal::Idle => {
                        next_tick = None;
                        ctx.park_idle();
                        continue;
                    }
                    Signal::Run => {}
                }

                match &tap {
                    None => {
                        for s in buf.iter_mut() {
                            *s = ramp_sample(produced);
                            produced += 1;
                        }
                        callback(&mut buf);
                    }
                    Some(tap) => {
                        buf.fill(0);
                        callback(&mut buf);
                        if let Ok(mut played) = tap.lock() {
                            played.extend(buf.iter().copied());
                            let excess = played.len().saturating_sub(tap_limit);
                            played.drain(..excess);
                        }
                    }
                }

                let deadline = next_tick.unwrap_or_else(Instant::now) + period;
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                next_tick = Some(deadline.max(now));
            }
        })?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ramp_wraps_after_period() {
        assert_eq!(ramp_sample(0), 1);
        assert_eq!(ramp_sample(999), 1000);
        assert_eq!(ramp_sample(1000), 1);
    }

    #[test]
    fn test_defaults_and_enumeration() {
        let engine = SyntheticEngine::new();
        assert_eq!(engine.enumerate().unwrap().len(), 2);
        assert_eq!(
            engine.default_endpoint(Direction::Playback).unwrap().name,
            SYNTHETIC_SPEAKER
        );
        assert!(matches!(
            SyntheticEngine::empty().default_endpoint(Direction::Capture),
            Err(AudioError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_unsupported_settings() {
        let engine = SyntheticEngine::new();
        let ep = engine.default_endpoint(Direction::Capture).unwrap();

        let bad_rate = StreamSettings::new(11025, 1, 64);
        assert!(matches!(
            engine.open_callback_stream(&ep, &bad_rate, Box::new(|_| {}), EventSink::detached()),
            Err(AudioError::Open { .. })
        ));

        let too_wide = StreamSettings::new(48000, 6, 64);
        assert!(engine
            .open_callback_stream(&ep, &too_wide, Box::new(|_| {}), EventSink::detached())
            .is_err());
    }

    #[test]
    fn test_capture_delivers_ramp_periods() {
        let engine = SyntheticEngine::new().with_time_scale(20.0);
        let ep = engine.default_endpoint(Direction::Capture).unwrap();
        let settings = StreamSettings::new(16000, 1, 160);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut stream = engine
            .open_callback_stream(
                &ep,
                &settings,
                Box::new(move |buf| sink.lock().unwrap().extend_from_slice(buf)),
                EventSink::detached(),
            )
            .unwrap();

        stream.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        stream.close().unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 160);
        assert_eq!(seen.len() % 160, 0);
        assert_eq!(&seen[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_playback_is_recorded() {
        let engine = SyntheticEngine::new().with_time_scale(20.0);
        let ep = engine.default_endpoint(Direction::Playback).unwrap();
        let settings = StreamSettings::new(8000, 1, 80);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut stream = engine
            .open_callback_stream(
                &ep,
                &settings,
                Box::new(move |buf| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    buf.fill(7);
                }),
                EventSink::detached(),
            )
            .unwrap();

        stream.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        stream.close().unwrap();

        let played = engine.played(SYNTHETIC_SPEAKER);
        assert_eq!(played.len(), calls.load(Ordering::Relaxed) * 80);
        assert!(played.iter().all(|&s| s == 7));
    }

    #[test]
    fn test_tap_keeps_only_the_newest_samples() {
        let engine = SyntheticEngine::new()
            .with_time_scale(20.0)
            .with_tap_limit(120);
        let ep = engine.default_endpoint(Direction::Playback).unwrap();
        let settings = StreamSettings::new(8000, 1, 80);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut stream = engine
            .open_callback_stream(
                &ep,
                &settings,
                Box::new(move |buf| {
                    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    buf.fill(n as i16);
                }),
                EventSink::detached(),
            )
            .unwrap();

        stream.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        stream.close().unwrap();

        let calls = calls.load(Ordering::Relaxed) as i16;
        assert!(calls >= 2);
        let played = engine.played(SYNTHETIC_SPEAKER);
        assert_eq!(played.len(), 120);
        // the tail of the second-to-last period, then the whole last one
        assert!(played[..40].iter().all(|&s| s == calls - 1));
        assert!(played[40..].iter().all(|&s| s == calls));
    }
}
