//! Sample ring buffer bridging hardware periods and arbitrary-sized requests.
//!
//! The ring is split into a [`RingProducer`] and a [`RingConsumer`] so that
//! exactly one context writes and exactly one context reads. Samples live in
//! atomics and the cursors are monotonically increasing counters, so neither
//! side ever takes a lock or allocates; this is what lets one half sit inside a
//! hardware callback.
//!
//! Overflow is not an error: a write that does not fit overwrites the oldest
//! unread samples and reports how many were lost. A consumer that was lapped
//! skips forward to the oldest sample still retained.

use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;

/// What a read does when fewer samples are available than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Underrun {
    /// Zero-fill the rest of the output (playback callbacks).
    Silence,
    /// Leave the rest untouched and report starvation (application readers).
    Partial,
}

/// Result of a [`RingConsumer::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Samples copied out of the ring
    pub read: usize,
    /// True when the ring held fewer samples than requested
    pub starved: bool,
}

/// Counters kept for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub written: u64,
    pub overwritten: u64,
    pub starved_reads: u64,
}

struct Shared {
    samples: Box<[AtomicI16]>,
    written: AtomicU64,
    read: AtomicU64,
    overwritten: AtomicU64,
    starved_reads: AtomicU64,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    fn slot(&self, pos: u64) -> &AtomicI16 {
        &self.samples[(pos % self.samples.len() as u64) as usize]
    }

    fn unread(&self, written: u64, read: u64) -> usize {
        (written.saturating_sub(read) as usize).min(self.capacity())
    }

    fn stats(&self) -> RingStats {
        RingStats {
            written: self.written.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
            starved_reads: self.starved_reads.load(Ordering::Relaxed),
        }
    }
}

/// Create a ring of `capacity` samples and split it into its two halves.
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        samples: (0..capacity).map(|_| AtomicI16::new(0)).collect(),
        written: AtomicU64::new(0),
        read: AtomicU64::new(0),
        overwritten: AtomicU64::new(0),
        starved_reads: AtomicU64::new(0),
    });

    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

/// Writing half of a sample ring.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Append `samples`, overwriting the oldest unread data when full.
    ///
    /// Returns the number of unread samples lost to the overwrite. Only the last
    /// `capacity` samples of an oversized chunk are kept.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let shared = &*self.shared;
        let cap = shared.capacity();
        let w = shared.written.load(Ordering::Relaxed);
        let r = shared.read.load(Ordering::Acquire);
        let unread = shared.unread(w, r);

        let skip = samples.len().saturating_sub(cap);
        let mut pos = w + skip as u64;
        for &s in &samples[skip..] {
            shared.slot(pos).store(s, Ordering::Relaxed);
            pos += 1;
        }
        shared.written.store(pos, Ordering::Release);

        let lost = (unread + samples.len()).saturating_sub(cap);
        if lost > 0 {
            shared.overwritten.fetch_add(lost as u64, Ordering::Relaxed);
        }
        lost
    }

    /// Unread samples currently held.
    pub fn available(&self) -> usize {
        let w = self.shared.written.load(Ordering::Relaxed);
        let r = self.shared.read.load(Ordering::Acquire);
        self.shared.unread(w, r)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Reading half of a sample ring.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Copy up to `out.len()` samples, oldest first.
    pub fn read(&mut self, out: &mut [i16], policy: Underrun) -> ReadOutcome {
        let shared = &*self.shared;
        let cap = shared.capacity() as u64;
        let w = shared.written.load(Ordering::Acquire);
        let mut r = shared.read.load(Ordering::Relaxed);

        // lapped by the producer: everything before w - cap is gone
        if w - r > cap {
            r = w - cap;
        }

        let n = ((w - r) as usize).min(out.len());
        for (i, dst) in out[..n].iter_mut().enumerate() {
            *dst = shared.slot(r + i as u64).load(Ordering::Relaxed);
        }
        shared.read.store(r + n as u64, Ordering::Release);

        let starved = n < out.len();
        if starved {
            if policy == Underrun::Silence {
                out[n..].fill(0);
            }
            shared.starved_reads.fetch_add(1, Ordering::Relaxed);
        }

        ReadOutcome { read: n, starved }
    }

    /// Convenience for application readers: allocate and return up to `count`
    /// samples together with the starvation flag.
    pub fn read_vec(&mut self, count: usize) -> (Vec<i16>, bool) {
        let mut out = vec![0i16; count];
        let outcome = self.read(&mut out, Underrun::Partial);
        out.truncate(outcome.read);
        (out, outcome.starved)
    }

    /// Unread samples currently held.
    pub fn available(&self) -> usize {
        let w = self.shared.written.load(Ordering::Acquire);
        let r = self.shared.read.load(Ordering::Relaxed);
        self.shared.unread(w, r)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}
