//! Asynchronous observability sink for callback contexts.
//!
//! Nothing running inside a hardware callback may block or return an error to
//! a caller, so overruns, underruns, codec failures and device faults are
//! counted in atomics and offered to a bounded channel with `try_send`. A
//! logger task on the tokio runtime drains the channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::StreamHandle;
use crate::error::{BackendFailure, CodecError};

/// Which side of the codec failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    Encode,
    Decode,
}

/// Why a backend stream gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The device could not be prepared for I/O.
    Prepare,
    /// An I/O error could not be recovered from.
    RecoveryFailed,
    /// Recovery kept succeeding but I/O kept failing.
    RetriesExhausted,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::Prepare => "prepare failed",
            FaultKind::RecoveryFailed => "recovery failed",
            FaultKind::RetriesExhausted => "too many consecutive errors",
        };
        f.write_str(s)
    }
}

/// Something that happened in a callback context. Building one never
/// allocates: device names are shared, everything else is `Copy`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A codec call failed; the frame was dropped.
    CodecFailure {
        stream: Option<StreamHandle>,
        stage: CodecStage,
        error: CodecError,
    },
    /// Unread samples were overwritten.
    Overrun {
        stream: Option<StreamHandle>,
        lost: usize,
    },
    /// A consumer asked for more than was buffered.
    Underrun {
        stream: Option<StreamHandle>,
        missing: usize,
    },
    /// The backend hit a glitch (e.g. an XRUN) and recovered.
    Recovered {
        device: Arc<str>,
        cause: BackendFailure,
    },
    /// The backend failed; the stream needs to be closed and reopened.
    StreamFault {
        device: Arc<str>,
        kind: FaultKind,
        cause: BackendFailure,
    },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn tag(stream: &Option<StreamHandle>) -> String {
            stream.map(|h| h.to_string()).unwrap_or_else(|| "-".into())
        }

        match self {
            PipelineEvent::CodecFailure {
                stream,
                stage,
                error,
            } => write!(f, "stream {}: {:?} failed, frame dropped: {}", tag(stream), stage, error),
            PipelineEvent::Overrun { stream, lost } => {
                write!(f, "stream {}: overrun, {} samples overwritten", tag(stream), lost)
            }
            PipelineEvent::Underrun { stream, missing } => {
                write!(f, "stream {}: underrun, {} samples short", tag(stream), missing)
            }
            PipelineEvent::Recovered { device, cause } => {
                write!(f, "device {}: recovered from {}", device, cause)
            }
            PipelineEvent::StreamFault {
                device,
                kind,
                cause,
            } => write!(f, "device {}: stream fault, {}: {}", device, kind, cause),
        }
    }
}

/// Running totals, readable from any thread.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_encoded: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub codec_failures: AtomicU64,
    pub samples_overwritten: AtomicU64,
    pub underruns: AtomicU64,
    pub faults: AtomicU64,
    pub events_dropped: AtomicU64,
}

/// Plain copy of [`PipelineStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_encoded: u64,
    pub frames_decoded: u64,
    pub codec_failures: u64,
    pub samples_overwritten: u64,
    pub underruns: u64,
    pub faults: u64,
    pub events_dropped: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
            samples_overwritten: self.samples_overwritten.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Cheap, cloneable handle for reporting from callback contexts.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
    stats: Arc<PipelineStats>,
    stream: Option<StreamHandle>,
}

impl EventSink {
    /// Create a sink with a bounded queue of `capacity` events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                stats: Arc::new(PipelineStats::default()),
                stream: None,
            },
            rx,
        )
    }

    /// A sink that only keeps counters.
    pub fn detached() -> Self {
        Self {
            tx: None,
            stats: Arc::new(PipelineStats::default()),
            stream: None,
        }
    }

    /// Same queue and counters, events tagged with `handle`.
    pub fn for_stream(&self, handle: StreamHandle) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
            stream: Some(handle),
        }
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn frame_encoded(&self) {
        self.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self) {
        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn codec_failure(&self, stage: CodecStage, error: CodecError) {
        self.report(PipelineEvent::CodecFailure {
            stream: self.stream,
            stage,
            error,
        });
    }

    pub fn overrun(&self, lost: usize) {
        self.report(PipelineEvent::Overrun {
            stream: self.stream,
            lost,
        });
    }

    pub fn underrun(&self, missing: usize) {
        self.report(PipelineEvent::Underrun {
            stream: self.stream,
            missing,
        });
    }

    /// Count `event` and offer it to the queue without waiting.
    pub fn report(&self, event: PipelineEvent) {
        let stats = &self.stats;
        match &event {
            PipelineEvent::CodecFailure { .. } => {
                stats.codec_failures.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::Overrun { lost, .. } => {
                stats
                    .samples_overwritten
                    .fetch_add(*lost as u64, Ordering::Relaxed);
            }
            PipelineEvent::Underrun { .. } => {
                stats.underruns.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::StreamFault { .. } => {
                stats.faults.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::Recovered { .. } => {}
        }

        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Log every event received on `rx` until all senders are gone.
pub fn spawn_event_logger(mut rx: mpsc::Receiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                PipelineEvent::StreamFault { .. } => log::error!("{}", event),
                PipelineEvent::CodecFailure { .. } | PipelineEvent::Overrun { .. } => {
                    log::warn!("{}", event)
                }
                PipelineEvent::Underrun { .. } | PipelineEvent::Recovered { .. } => {
                    log::debug!("{}", event)
                }
            }
        }
        log::debug!("event logger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_counted_and_queued() {
        let (sink, mut rx) = EventSink::new(8);
        let tagged = sink.for_stream(StreamHandle(3));

        tagged.overrun(12);
        tagged.underrun(4);
        tagged.codec_failure(
            CodecStage::Decode,
            CodecError::Backend {
                function: "opus_decode",
                reason: "corrupted stream",
            },
        );

        let stats = sink.stats().snapshot();
        assert_eq!(stats.samples_overwritten, 12);
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.codec_failures, 1);

        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::Overrun {
                stream: Some(StreamHandle(3)),
                lost: 12
            }
        );
    }

    #[test]
    fn test_faults_are_counted_and_described() {
        let (sink, mut rx) = EventSink::new(4);
        let device: Arc<str> = Arc::from("hw:0,0");
        let cause = BackendFailure {
            op: "snd_pcm_writei",
            errno: 32,
        };

        sink.report(PipelineEvent::Recovered {
            device: Arc::clone(&device),
            cause,
        });
        sink.report(PipelineEvent::StreamFault {
            device,
            kind: FaultKind::RecoveryFailed,
            cause,
        });
        assert_eq!(sink.stats().snapshot().faults, 1);

        let recovered = rx.try_recv().unwrap().to_string();
        assert!(recovered.starts_with("device hw:0,0: recovered from snd_pcm_writei failed"));
        let fault = rx.try_recv().unwrap().to_string();
        assert!(fault.contains("stream fault, recovery failed"));
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (sink, _rx) = EventSink::new(1);
        sink.underrun(1);
        sink.underrun(1);
        sink.underrun(1);

        let stats = sink.stats().snapshot();
        assert_eq!(stats.underruns, 3);
        assert_eq!(stats.events_dropped, 2);
    }

    #[test]
    fn test_detached_sink_only_counts() {
        let sink = EventSink::detached();
        sink.frame_encoded();
        sink.underrun(10);
        assert_eq!(sink.stats().snapshot().frames_encoded, 1);
        assert_eq!(sink.stats().snapshot().events_dropped, 0);
    }

    #[tokio::test]
    async fn test_logger_exits_when_senders_drop() {
        let (sink, rx) = EventSink::new(4);
        sink.overrun(1);
        let logger = spawn_event_logger(rx);
        drop(sink);
        logger.await.unwrap();
    }
}
