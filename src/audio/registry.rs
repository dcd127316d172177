//! Open streams, their lifecycle, and the application side of their buffers.
//!
//! The registry is owned by the control context. Hardware callbacks never touch
//! it: each stream's callback owns its half of the stream's buffers and the
//! registry keeps the other half for `read`/`write` and their blocking
//! counterparts `record`/`play`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::device::{Direction, Endpoint};
use super::engine::{AudioEngine, NativeStream, StreamCallback};
use super::resolver::DeviceResolver;
use super::stream::{StreamHandle, StreamSettings, StreamState};
use crate::buffer::{sample_ring, ReadOutcome, RingConsumer, RingProducer, SlotReader, SlotWriter, Underrun};
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::{AudioError, Result};
use crate::pipeline::{EventSink, FrameAccumulator, FrameDrain};

/// Where a stream's audio goes (capture) or comes from (playback).
pub enum StreamRoute {
    /// Raw PCM through a sample ring the application reads or writes.
    Pcm,
    /// Capture only: encode whole codec frames into `slots`.
    Encode {
        encoder: Box<dyn FrameEncoder>,
        slots: SlotWriter,
    },
    /// Playback only: decode frames from `slots`.
    Decode {
        decoder: Box<dyn FrameDecoder>,
        slots: SlotReader,
    },
}

impl StreamRoute {
    fn name(&self) -> &'static str {
        match self {
            StreamRoute::Pcm => "pcm",
            StreamRoute::Encode { .. } => "encode",
            StreamRoute::Decode { .. } => "decode",
        }
    }
}

/// How long `record`/`play` wait without any samples moving before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Wakes an application thread blocked in `record`/`play` once per period.
///
/// The callback side never takes the lock, and only signals while someone is
/// waiting. A wakeup that slips in between a waiter's check and its wait is
/// picked up one period later by the timed wait.
#[derive(Default)]
struct PeriodSignal {
    waiters: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl PeriodSignal {
    fn tick(&self) {
        if self.waiters.load(Ordering::Acquire) > 0 {
            self.cond.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        let guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = self.cond.wait_timeout(guard, timeout);
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The application's half of a raw PCM stream.
enum AppPort {
    Capture {
        ring: RingConsumer,
        signal: Arc<PeriodSignal>,
    },
    Playback {
        ring: RingProducer,
        signal: Arc<PeriodSignal>,
    },
    Codec,
}

struct StreamEntry {
    endpoint: Endpoint,
    state: StreamState,
    period: Duration,
    native: Box<dyn NativeStream>,
    port: AppPort,
}

pub struct StreamRegistry {
    resolver: DeviceResolver,
    engine: Arc<dyn AudioEngine>,
    sink: EventSink,
    last_id: u64,
    streams: HashMap<StreamHandle, StreamEntry>,
}

impl StreamRegistry {
    pub fn new(engine: Arc<dyn AudioEngine>, sink: EventSink) -> Self {
        Self {
            resolver: DeviceResolver::new(Arc::clone(&engine)),
            engine,
            sink,
            last_id: 0,
            streams: HashMap::new(),
        }
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Open a raw PCM stream.
    pub fn open(
        &mut self,
        direction: Direction,
        endpoint: &Endpoint,
        settings: StreamSettings,
    ) -> Result<StreamHandle> {
        self.open_with(direction, endpoint, settings, StreamRoute::Pcm)
    }

    /// Open a stream with an explicit route. The stream starts in `Created`;
    /// no callback fires until `start`.
    pub fn open_with(
        &mut self,
        direction: Direction,
        endpoint: &Endpoint,
        settings: StreamSettings,
        route: StreamRoute,
    ) -> Result<StreamHandle> {
        self.last_id += 1;
        let handle = StreamHandle(self.last_id);

        validate(direction, endpoint, &settings, &route)?;

        let sink = self.sink.for_stream(handle);
        let (callback, port) = build_callback(direction, &settings, route, sink.clone());
        let native = self
            .engine
            .open_callback_stream(endpoint, &settings, callback, sink)?;

        log::info!(
            "stream {} opened: {} on \"{}\", {} Hz x{}, {} frames/buffer",
            handle,
            direction,
            endpoint.name,
            settings.sample_rate,
            settings.channels,
            settings.frames_per_buffer
        );

        self.streams.insert(
            handle,
            StreamEntry {
                endpoint: endpoint.clone(),
                state: StreamState::Created,
                period: settings.period(),
                native,
                port,
            },
        );
        Ok(handle)
    }

    pub fn start(&mut self, handle: StreamHandle) -> Result<()> {
        self.transition(handle, "start", StreamState::Created, StreamState::Started)
    }

    pub fn pause(&mut self, handle: StreamHandle) -> Result<()> {
        self.transition(handle, "pause", StreamState::Started, StreamState::Paused)
    }

    pub fn resume(&mut self, handle: StreamHandle) -> Result<()> {
        self.transition(handle, "resume", StreamState::Paused, StreamState::Started)
    }

    /// Stop callbacks, release the native stream and forget `handle`.
    ///
    /// Native shutdown failures are logged; the handle is invalid afterwards
    /// either way.
    pub fn close(&mut self, handle: StreamHandle) -> Result<()> {
        let mut entry = self
            .streams
            .remove(&handle)
            .ok_or(AudioError::InvalidHandle(handle))?;
        shutdown(handle, &mut entry);
        Ok(())
    }

    pub fn state(&self, handle: StreamHandle) -> Result<StreamState> {
        self.entry(handle).map(|e| e.state)
    }

    pub fn endpoint(&self, handle: StreamHandle) -> Result<&Endpoint> {
        self.entry(handle).map(|e| &e.endpoint)
    }

    /// Queue samples on a raw PCM playback stream. Returns how many queued but
    /// not yet played samples were overwritten to make room.
    pub fn write(&mut self, handle: StreamHandle, samples: &[i16]) -> Result<usize> {
        let entry = self.entry_mut(handle)?;
        match &mut entry.port {
            AppPort::Playback { ring, .. } => {
                let lost = ring.write(samples);
                if lost > 0 {
                    log::debug!("stream {}: {} queued samples overwritten", handle, lost);
                }
                Ok(lost)
            }
            _ => Err(AudioError::Unsupported { handle, op: "write" }),
        }
    }

    /// Take captured samples from a raw PCM capture stream. Never blocks; a
    /// short read is flagged in the outcome.
    pub fn read(&mut self, handle: StreamHandle, out: &mut [i16]) -> Result<ReadOutcome> {
        let entry = self.entry_mut(handle)?;
        match &mut entry.port {
            AppPort::Capture { ring, .. } => Ok(ring.read(out, Underrun::Partial)),
            _ => Err(AudioError::Unsupported { handle, op: "read" }),
        }
    }

    /// Fill `out` completely with captured samples, blocking the calling
    /// thread until enough periods have arrived.
    ///
    /// The stream must be started. Fails with [`AudioError::Stalled`] if the
    /// callbacks stop delivering; samples already copied are then lost.
    pub fn record(&mut self, handle: StreamHandle, out: &mut [i16]) -> Result<usize> {
        let entry = self.entry_mut(handle)?;
        require_started(handle, entry, "record")?;
        let period = entry.period;
        let AppPort::Capture { ring, signal } = &mut entry.port else {
            return Err(AudioError::Unsupported { handle, op: "record" });
        };

        let mut filled = 0;
        let mut progress = Instant::now();
        while filled < out.len() {
            let n = ring.available().min(out.len() - filled);
            if n > 0 {
                filled += ring.read(&mut out[filled..filled + n], Underrun::Partial).read;
                progress = Instant::now();
                continue;
            }
            if progress.elapsed() >= STALL_TIMEOUT {
                return Err(AudioError::Stalled {
                    handle,
                    op: "record",
                    waited: STALL_TIMEOUT,
                });
            }
            signal.wait(period);
        }
        Ok(filled)
    }

    /// Queue all of `samples` for playback without overwriting anything,
    /// blocking the calling thread while the stream's ring is full.
    ///
    /// The stream must be started. Fails with [`AudioError::Stalled`] if the
    /// callbacks stop consuming.
    pub fn play(&mut self, handle: StreamHandle, samples: &[i16]) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        require_started(handle, entry, "play")?;
        let period = entry.period;
        let AppPort::Playback { ring, signal } = &mut entry.port else {
            return Err(AudioError::Unsupported { handle, op: "play" });
        };

        let mut queued = 0;
        let mut progress = Instant::now();
        while queued < samples.len() {
            let room = ring.capacity() - ring.available();
            let n = room.min(samples.len() - queued);
            if n > 0 {
                ring.write(&samples[queued..queued + n]);
                queued += n;
                progress = Instant::now();
                continue;
            }
            if progress.elapsed() >= STALL_TIMEOUT {
                return Err(AudioError::Stalled {
                    handle,
                    op: "play",
                    waited: STALL_TIMEOUT,
                });
            }
            signal.wait(period);
        }
        Ok(())
    }

    /// Handles of every open stream, oldest first.
    pub fn handles(&self) -> Vec<StreamHandle> {
        let mut handles: Vec<_> = self.streams.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Close every open stream.
    pub fn close_all(&mut self) {
        for handle in self.handles() {
            if let Some(mut entry) = self.streams.remove(&handle) {
                shutdown(handle, &mut entry);
            }
        }
    }

    fn entry(&self, handle: StreamHandle) -> Result<&StreamEntry> {
        self.streams
            .get(&handle)
            .ok_or(AudioError::InvalidHandle(handle))
    }

    fn entry_mut(&mut self, handle: StreamHandle) -> Result<&mut StreamEntry> {
        self.streams
            .get_mut(&handle)
            .ok_or(AudioError::InvalidHandle(handle))
    }

    fn transition(
        &mut self,
        handle: StreamHandle,
        op: &'static str,
        from: StreamState,
        to: StreamState,
    ) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        if entry.state != from {
            return Err(AudioError::State {
                handle,
                op,
                state: entry.state,
            });
        }

        match to {
            StreamState::Started => entry.native.start()?,
            StreamState::Paused => entry.native.stop()?,
            _ => {}
        }
        entry.state = to;
        log::debug!("stream {}: {} -> {}", handle, from, to);
        Ok(())
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        if !self.streams.is_empty() {
            log::debug!("closing {} stream(s) on registry drop", self.streams.len());
        }
        self.close_all();
    }
}

fn require_started(handle: StreamHandle, entry: &StreamEntry, op: &'static str) -> Result<()> {
    if entry.state != StreamState::Started {
        return Err(AudioError::State {
            handle,
            op,
            state: entry.state,
        });
    }
    Ok(())
}

fn shutdown(handle: StreamHandle, entry: &mut StreamEntry) {
    if entry.state == StreamState::Started {
        if let Err(e) = entry.native.stop() {
            log::warn!("stream {}: stop failed during close: {}", handle, e);
        }
    }
    if let Err(e) = entry.native.close() {
        log::warn!("stream {}: close failed: {}", handle, e);
    }
    entry.state = StreamState::Closed;
    log::info!("stream {} closed", handle);
}

fn validate(
    direction: Direction,
    endpoint: &Endpoint,
    settings: &StreamSettings,
    route: &StreamRoute,
) -> Result<()> {
    let refuse = |reason: String| {
        Err(AudioError::Open {
            device: endpoint.name.clone(),
            direction,
            reason,
        })
    };

    if endpoint.direction != direction {
        return refuse(format!("endpoint is a {} device", endpoint.direction));
    }
    if settings.sample_rate == 0 || settings.channels == 0 || settings.frames_per_buffer == 0 {
        return refuse("sample rate, channels and frames per buffer must be positive".into());
    }
    if settings.channels > endpoint.max_channels {
        return refuse(format!(
            "{} channels requested, device supports {}",
            settings.channels, endpoint.max_channels
        ));
    }

    let codec_frame = match (route, direction) {
        (StreamRoute::Pcm, _) => None,
        (StreamRoute::Encode { encoder, .. }, Direction::Capture) => Some(encoder.frame_samples()),
        (StreamRoute::Decode { decoder, .. }, Direction::Playback) => Some(decoder.frame_samples()),
        (route, direction) => {
            return refuse(format!("a {} route cannot drive a {} stream", route.name(), direction));
        }
    };

    if let (Some(actual), Some(expected)) = (codec_frame, settings.codec_frame_samples) {
        if actual != expected {
            return refuse(format!(
                "codec frame is {actual} samples, settings expect {expected}"
            ));
        }
    }
    if codec_frame == Some(0) {
        return refuse("codec frame size is zero".into());
    }

    Ok(())
}

/// Encoding state owned by a capture callback. Dropping it (the callback
/// thread exits on close) pads and emits a partially filled final frame.
struct EncodeTail(FrameAccumulator);

impl EncodeTail {
    fn feed(&mut self, input: &[i16]) {
        self.0.feed(input);
    }
}

impl Drop for EncodeTail {
    fn drop(&mut self) {
        let held = self.0.pending();
        if self.0.flush() {
            log::debug!("flushed final frame with {} captured samples", held);
        }
    }
}

/// Build the hardware callback for a stream, returning the application's port.
fn build_callback(
    direction: Direction,
    settings: &StreamSettings,
    route: StreamRoute,
    sink: EventSink,
) -> (StreamCallback, AppPort) {
    match (route, direction) {
        (StreamRoute::Pcm, Direction::Capture) => {
            let (mut producer, consumer) = sample_ring(settings.ring_capacity());
            let signal = Arc::new(PeriodSignal::default());
            let period_done = Arc::clone(&signal);
            let callback: StreamCallback = Box::new(move |input| {
                let lost = producer.write(input);
                if lost > 0 {
                    sink.overrun(lost);
                }
                period_done.tick();
            });
            let port = AppPort::Capture {
                ring: consumer,
                signal,
            };
            (callback, port)
        }
        (StreamRoute::Pcm, Direction::Playback) => {
            let (producer, mut consumer) = sample_ring(settings.ring_capacity());
            let signal = Arc::new(PeriodSignal::default());
            let period_done = Arc::clone(&signal);
            let callback: StreamCallback = Box::new(move |output| {
                let outcome = consumer.read(output, Underrun::Silence);
                if outcome.starved {
                    sink.underrun(output.len() - outcome.read);
                }
                period_done.tick();
            });
            let port = AppPort::Playback {
                ring: producer,
                signal,
            };
            (callback, port)
        }
        (StreamRoute::Encode { encoder, slots }, _) => {
            let mut tail = EncodeTail(FrameAccumulator::new(encoder, slots, sink));
            let callback: StreamCallback = Box::new(move |input| tail.feed(input));
            (callback, AppPort::Codec)
        }
        (StreamRoute::Decode { decoder, slots }, _) => {
            let mut drain = FrameDrain::new(decoder, slots, settings.period_samples(), sink);
            let callback: StreamCallback = Box::new(move |output| drain.tick(output));
            (callback, AppPort::Codec)
        }
    }
}
