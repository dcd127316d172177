//! Native engine on top of ALSA.
//!
//! Each stream owns one PCM and one named I/O thread. The thread blocks in
//! `readi`/`writei`, so the period size set on the hardware paces the callbacks.

use std::sync::Arc;

use alsa::pcm::PCM;

use super::alsa_device::{self, AlsaParams};
use super::device::{Direction, Endpoint, DEFAULT_DEVICE};
use super::engine::{AudioEngine, NativeStream, Signal, StreamCallback, WorkerContext, WorkerStream};
use super::stream::StreamSettings;
use crate::error::{AudioError, BackendFailure, Result};
use crate::pipeline::{EventSink, FaultKind, PipelineEvent};

/// Consecutive failed recoveries before a stream is declared faulted.
const MAX_RECOVERY_RETRIES: u32 = 3;

pub struct AlsaEngine {
    cards: usize,
}

impl AlsaEngine {
    /// Initialize the engine. Fails when ALSA reports no sound card.
    pub fn new() -> Result<Self> {
        let cards = alsa::card::Iter::new().filter(|c| c.is_ok()).count();
        if cards == 0 {
            return Err(AudioError::Backend("no ALSA sound cards found".into()));
        }
        log::info!("ALSA engine up, {} card(s)", cards);
        Ok(Self { cards })
    }
}

impl Drop for AlsaEngine {
    fn drop(&mut self) {
        log::debug!("ALSA engine released ({} card(s))", self.cards);
    }
}

impl AudioEngine for AlsaEngine {
    fn name(&self) -> &str {
        "alsa"
    }

    fn enumerate(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::new();
        for direction in [Direction::Capture, Direction::Playback] {
            for name in alsa_device::hint_names(direction)? {
                match alsa_device::query_endpoint(&name, direction) {
                    Ok(ep) => endpoints.push(ep),
                    Err(e) => log::debug!("skipping {} ({}): {}", name, direction, e),
                }
            }
        }
        Ok(endpoints)
    }

    fn default_endpoint(&self, direction: Direction) -> Result<Endpoint> {
        alsa_device::query_endpoint(DEFAULT_DEVICE, direction).map_err(|e| {
            log::debug!("default {} endpoint unavailable: {}", direction, e);
            AudioError::DeviceNotFound {
                name: DEFAULT_DEVICE.to_string(),
                direction,
            }
        })
    }

    fn open_callback_stream(
        &self,
        endpoint: &Endpoint,
        settings: &StreamSettings,
        callback: StreamCallback,
        sink: EventSink,
    ) -> Result<Box<dyn NativeStream>> {
        let (pcm, params) = alsa_device::open_pcm(
            &endpoint.name,
            endpoint.direction,
            settings,
            Some(endpoint.default_low_latency),
        )?;

        let thread_name = match endpoint.direction {
            Direction::Capture => "audio-capture",
            Direction::Playback => "audio-playback",
        };
        let label = format!("{} {}", endpoint.name, endpoint.direction);
        let io = PcmIo {
            device: Arc::from(endpoint.name.as_str()),
            direction: endpoint.direction,
            pcm,
            // callbacks always see the requested period, whatever the hardware picked
            period_samples: settings.period_samples(),
            params,
            callback,
            sink,
            capture_failures: 0,
        };

        let stream = WorkerStream::spawn(thread_name, label, move |ctx| io.run(ctx))?;
        Ok(Box::new(stream))
    }
}

/// Everything the I/O thread owns.
struct PcmIo {
    device: Arc<str>,
    direction: Direction,
    pcm: PCM,
    period_samples: usize,
    params: AlsaParams,
    callback: StreamCallback,
    sink: EventSink,
    capture_failures: u32,
}

impl PcmIo {
    fn run(mut self, ctx: WorkerContext) {
        let mut buf = vec![0i16; self.period_samples];
        let mut running = false;

        log::debug!(
            "{} I/O thread ready: device={}, hw period={} frames",
            self.direction,
            self.device,
            self.params.period_size
        );

        loop {
            match ctx.signal() {
                Signal::Exit => break,
                Signal::Idle => {
                    if running {
                        let _ = self.pcm.drop();
                        running = false;
                    }
                    ctx.park_idle();
                    continue;
                }
                Signal::Run if !running => {
                    if let Err(e) = self.pcm.prepare() {
                        self.fault(FaultKind::Prepare, e.into());
                        break;
                    }
                    running = true;
                }
                Signal::Run => {}
            }

            let ok = match self.direction {
                Direction::Capture => self.capture_period(&mut buf),
                Direction::Playback => self.playback_period(&mut buf),
            };
            if !ok {
                break;
            }
        }

        let _ = self.pcm.drop();
        log::debug!("{} I/O thread for {} exited", self.direction, self.device);
    }

    fn capture_period(&mut self, buf: &mut [i16]) -> bool {
        let channels = self.params.channels as usize;
        let result = match self.pcm.io_i16() {
            Ok(io) => io.readi(buf),
            Err(e) => Err(e),
        };

        match result {
            Ok(frames) => {
                self.capture_failures = 0;
                (self.callback)(&mut buf[..frames * channels]);
                true
            }
            Err(e) => {
                self.capture_failures += 1;
                self.recover(e, self.capture_failures)
            }
        }
    }

    fn playback_period(&mut self, buf: &mut [i16]) -> bool {
        let channels = self.params.channels as usize;
        buf.fill(0);
        (self.callback)(buf);

        // Write with a retry loop so short writes and XRUNs do not lose frames.
        let total_frames = buf.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            let result = match self.pcm.io_i16() {
                Ok(io) => io.writei(&buf[offset..]),
                Err(e) => Err(e),
            };
            match result {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    retry_count += 1;
                    if !self.recover(e, retry_count) {
                        return false;
                    }
                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        self.sink.overrun((total_frames - frames_written) * channels);
                        break;
                    }
                }
            }
        }
        true
    }

    /// Try to bring the PCM back after an I/O error. Returns `false` if the
    /// stream is lost.
    fn recover(&mut self, err: alsa::Error, attempt: u32) -> bool {
        let cause = BackendFailure::from(err);
        if attempt > MAX_RECOVERY_RETRIES {
            self.fault(FaultKind::RetriesExhausted, cause);
            return false;
        }

        let recovered = self
            .pcm
            .try_recover(err, true)
            .or_else(|_| self.pcm.prepare());

        match recovered {
            Ok(()) => {
                self.sink.report(PipelineEvent::Recovered {
                    device: Arc::clone(&self.device),
                    cause,
                });
                true
            }
            Err(_) => {
                self.fault(FaultKind::RecoveryFailed, cause);
                false
            }
        }
    }

    fn fault(&self, kind: FaultKind, cause: BackendFailure) {
        self.sink.report(PipelineEvent::StreamFault {
            device: Arc::clone(&self.device),
            kind,
            cause,
        });
    }
}
