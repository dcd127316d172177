//! The audio-engine capability and the callback thread both engines run on.
//!
//! Engines deliver audio by calling a per-stream callback once per period on
//! a dedicated OS thread (not a tokio task, to keep real-time I/O away from
//! async work). The thread's run state lives in an atomic; it parks while idle
//! so the I/O loop never takes a lock.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::device::{Direction, Endpoint};
use super::stream::StreamSettings;
use crate::error::{AudioError, Result};
use crate::pipeline::EventSink;

/// Called once per period with `channels * frames_per_buffer` interleaved
/// samples: the captured audio for capture streams, the buffer to fill for
/// playback streams. Must not block.
pub type StreamCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// A hardware (or simulated) audio backend.
pub trait AudioEngine: Send + Sync {
    fn name(&self) -> &str;

    /// All endpoints, both directions.
    fn enumerate(&self) -> Result<Vec<Endpoint>>;

    fn default_endpoint(&self, direction: Direction) -> Result<Endpoint>;

    /// Prepare a callback-driven stream. Callbacks begin only after `start`.
    fn open_callback_stream(
        &self,
        endpoint: &Endpoint,
        settings: &StreamSettings,
        callback: StreamCallback,
        sink: EventSink,
    ) -> Result<Box<dyn NativeStream>>;
}

/// One backend stream. After `close` returns no further callback fires.
pub trait NativeStream: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

const IDLE: u8 = 0;
const RUN: u8 = 1;
const EXIT: u8 = 2;

/// How long an idle worker sleeps before re-checking its flag on its own.
const IDLE_PARK: Duration = Duration::from_millis(50);
/// Upper bound on waiting for a worker to acknowledge a stop or to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Idle,
    Run,
    Exit,
}

#[derive(Default)]
struct RunFlag {
    requested: AtomicU8,
    idle_ack: AtomicBool,
}

/// The worker thread's view of its control flag.
pub(crate) struct WorkerContext {
    flag: Arc<RunFlag>,
}

impl WorkerContext {
    pub(crate) fn signal(&self) -> Signal {
        match self.flag.requested.load(Ordering::Acquire) {
            RUN => {
                self.flag.idle_ack.store(false, Ordering::Release);
                Signal::Run
            }
            EXIT => Signal::Exit,
            _ => Signal::Idle,
        }
    }

    /// Acknowledge the idle state and sleep until woken (or a short timeout).
    pub(crate) fn park_idle(&self) {
        self.flag.idle_ack.store(true, Ordering::Release);
        thread::park_timeout(IDLE_PARK);
    }
}

/// A [`NativeStream`] backed by one named worker thread.
pub(crate) struct WorkerStream {
    label: String,
    flag: Arc<RunFlag>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl WorkerStream {
    pub(crate) fn spawn<F>(thread_name: &str, label: String, body: F) -> Result<Self>
    where
        F: FnOnce(WorkerContext) + Send + 'static,
    {
        let flag = Arc::new(RunFlag::default());
        let ctx = WorkerContext {
            flag: Arc::clone(&flag),
        };

        let handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || body(ctx))
            .map_err(|e| AudioError::Backend(format!("failed to spawn {thread_name}: {e}")))?;

        Ok(Self {
            label,
            flag,
            handle: Some(handle),
            timeout: STOP_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn live_handle(&self) -> Result<&JoinHandle<()>> {
        match &self.handle {
            Some(h) if !h.is_finished() => Ok(h),
            Some(_) => Err(AudioError::Backend(format!(
                "{}: callback thread has stopped after a fault",
                self.label
            ))),
            None => Err(AudioError::Backend(format!("{}: stream closed", self.label))),
        }
    }

    fn request(&self, state: u8) {
        self.flag.requested.store(state, Ordering::Release);
        if let Some(h) = &self.handle {
            h.thread().unpark();
        }
    }
}

impl NativeStream for WorkerStream {
    fn start(&mut self) -> Result<()> {
        self.live_handle()?;
        self.request(RUN);
        log::debug!("{}: started", self.label);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.live_handle()?;
        self.flag.idle_ack.store(false, Ordering::Release);
        self.request(IDLE);

        let deadline = Instant::now() + self.timeout;
        while !self.flag.idle_ack.load(Ordering::Acquire) {
            if Instant::now() >= deadline || self.live_handle().is_err() {
                log::warn!("{}: stop not acknowledged in {:?}", self.label, self.timeout);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        log::debug!("{}: stopped", self.label);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.flag.requested.store(EXIT, Ordering::Release);
        handle.thread().unpark();

        // a thread stuck in a blocking device call is left behind, not joined
        let deadline = Instant::now() + self.timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(AudioError::Backend(format!(
                    "{}: callback thread did not exit within {:?}, detached",
                    self.label, self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }

        handle
            .join()
            .map_err(|_| AudioError::Backend(format!("{}: callback thread panicked", self.label)))?;
        log::debug!("{}: closed", self.label);
        Ok(())
    }
}

impl Drop for WorkerStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{}", e);
        }
    }
}
