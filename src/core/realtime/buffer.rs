//! Jitter buffers for session audio.
//!
//! One `AudioFrameBuffer` exists per direction. Producers never block: a full
//! buffer drops its oldest frame. Consumers wait with [`AudioFrameBuffer::wait_ready`]
//! and drain with [`AudioFrameBuffer::pop`].
//!
//! # Playout
//!
//! A buffer starts unprimed and releases nothing until it holds `target_fill_ms`
//! of audio, or until [`AudioFrameBuffer::mark_end`] flushes a short tail. Once
//! primed, falling below `low_water_ms` yields synthesized silence until either
//! audio arrives or `max_silence_frames` have been produced, after which the
//! buffer goes idle and must prime again.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

use super::base::{AudioFormat, BufferConfig};

/// Direction an audio frame travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Caller to remote model
    Ingress,
    /// Remote model to caller
    Egress,
}

/// A chunk of audio in the session's negotiated format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub direction: Direction,
    /// Monotonic per direction
    pub seq: u64,
    /// Milliseconds since session start
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(direction: Direction, seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            direction,
            seq,
            timestamp_ms: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Result of pushing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted after evicting the oldest buffered frame
    DroppedOldest,
    /// Sequence number not newer than the last accepted frame
    Rejected,
    /// The buffer has been closed
    Closed,
}

/// Result of pulling from the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Playout {
    Frame(AudioFrame),
    /// Filler for an underflow, `silence_frame_ms` long
    Silence(Bytes),
    /// Nothing to release right now
    Empty,
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub silence_frames: u64,
    pub buffered_frames: usize,
    pub buffered_bytes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    frames: VecDeque<AudioFrame>,
    buffered_bytes: usize,
    last_seq: Option<u64>,
    primed: bool,
    ended: bool,
    silence_run: u32,
}

/// Fixed-capacity jitter buffer for one direction.
#[derive(Debug)]
pub struct AudioFrameBuffer {
    direction: Direction,
    capacity: usize,
    target_fill_bytes: usize,
    low_water_bytes: usize,
    max_silence_frames: u32,
    silence: Bytes,
    inner: Mutex<Inner>,
    ready: Notify,
    closed: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    silence_frames: AtomicU64,
}

impl AudioFrameBuffer {
    pub fn new(direction: Direction, config: &BufferConfig, format: &AudioFormat) -> Self {
        Self {
            direction,
            capacity: config.capacity_frames.max(1),
            target_fill_bytes: format.bytes_for(config.target_fill_ms),
            low_water_bytes: format.bytes_for(config.low_water_ms),
            max_silence_frames: config.max_silence_frames,
            silence: Bytes::from(vec![0u8; format.bytes_for(config.silence_frame_ms)]),
            inner: Mutex::new(Inner::default()),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            silence_frames: AtomicU64::new(0),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a frame without blocking.
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut inner = self.inner.lock();
            if inner.last_seq.is_some_and(|last| frame.seq <= last) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Rejected;
            }
            inner.last_seq = Some(frame.seq);
            inner.ended = false;

            let mut outcome = PushOutcome::Accepted;
            if inner.frames.len() >= self.capacity
                && let Some(evicted) = inner.frames.pop_front()
            {
                inner.buffered_bytes -= evicted.data.len();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                outcome = PushOutcome::DroppedOldest;
            }

            inner.buffered_bytes += frame.data.len();
            inner.frames.push_back(frame);
            outcome
        };

        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_waiters();
        outcome
    }

    /// Pull the next unit of playout.
    pub fn pop(&self) -> Playout {
        let mut inner = self.inner.lock();

        if !inner.primed {
            if inner.buffered_bytes >= self.target_fill_bytes.max(1) {
                inner.primed = true;
            } else if !(inner.ended && !inner.frames.is_empty()) {
                return Playout::Empty;
            }
        }

        let starved = !inner.ended
            && inner.primed
            && (inner.frames.is_empty() || inner.buffered_bytes < self.low_water_bytes);

        if !starved && let Some(frame) = inner.frames.pop_front() {
            inner.buffered_bytes -= frame.data.len();
            inner.silence_run = 0;
            self.popped.fetch_add(1, Ordering::Relaxed);
            return Playout::Frame(frame);
        }

        if inner.ended || inner.silence_run >= self.max_silence_frames {
            // End of stream or silence limit reached: go idle until primed again.
            inner.primed = false;
            inner.ended = false;
            inner.silence_run = 0;
            return Playout::Empty;
        }

        inner.silence_run += 1;
        self.silence_frames.fetch_add(1, Ordering::Relaxed);
        Playout::Silence(self.silence.clone())
    }

    /// Flush whatever is buffered once the current stream of audio ends.
    pub fn mark_end(&self) {
        self.inner.lock().ended = true;
        self.ready.notify_waiters();
    }

    /// Take every buffered frame's payload, concatenated.
    pub fn drain(&self) -> Bytes {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.buffered_bytes);
        let count = inner.frames.len() as u64;
        for frame in inner.frames.drain(..) {
            out.extend_from_slice(&frame.data);
        }
        self.popped.fetch_add(count, Ordering::Relaxed);
        inner.buffered_bytes = 0;
        inner.primed = false;
        inner.silence_run = 0;
        Bytes::from(out)
    }

    /// Wait until `pop` has something to release, or the buffer is closed.
    pub async fn wait_ready(&self) {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() || self.is_ready() {
                return;
            }
            notified.await;
        }
    }

    fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        if inner.frames.is_empty() {
            return false;
        }
        inner.primed || inner.ended || inner.buffered_bytes >= self.target_fill_bytes
    }

    /// Stop accepting frames and wake waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    /// Whether playout is active (primed).
    pub fn is_primed(&self) -> bool {
        self.inner.lock().primed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            silence_frames: self.silence_frames.load(Ordering::Relaxed),
            buffered_frames: inner.frames.len(),
            buffered_bytes: inner.buffered_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    // 20ms of PCM16 @ 24kHz mono
    const FRAME_BYTES: usize = 960;

    fn buffer(capacity: usize) -> AudioFrameBuffer {
        let config = BufferConfig {
            capacity_frames: capacity,
            target_fill_ms: 60,
            low_water_ms: 20,
            silence_frame_ms: 20,
            max_silence_frames: 3,
        };
        AudioFrameBuffer::new(Direction::Egress, &config, &AudioFormat::default())
    }

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(Direction::Egress, seq, vec![seq as u8; FRAME_BYTES])
    }

    fn expect_frame(playout: Playout) -> AudioFrame {
        match playout {
            Playout::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_not_primed_until_target_fill() {
        let buf = buffer(16);
        buf.push(frame(1));
        buf.push(frame(2));
        assert_eq!(buf.pop(), Playout::Empty);
        assert!(!buf.is_primed());

        buf.push(frame(3));
        assert_eq!(expect_frame(buf.pop()).seq, 1);
        assert!(buf.is_primed());
    }

    #[test]
    fn test_overflow_drops_exactly_the_oldest() {
        let buf = buffer(4);
        for seq in 1..=4 {
            assert_eq!(buf.push(frame(seq)), PushOutcome::Accepted);
        }
        assert_eq!(buf.push(frame(5)), PushOutcome::DroppedOldest);
        assert_eq!(buf.push(frame(6)), PushOutcome::DroppedOldest);

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.dropped(), 2);

        let seqs: Vec<u64> = (0..4).map(|_| expect_frame(buf.pop()).seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_capacity_never_exceeded_and_drops_monotonic() {
        let buf = buffer(8);
        let mut last_dropped = 0;
        for seq in 1..=100 {
            buf.push(frame(seq));
            assert!(buf.len() <= 8);
            let dropped = buf.dropped();
            assert!(dropped >= last_dropped);
            last_dropped = dropped;
        }
        assert_eq!(last_dropped, 92);
    }

    #[test]
    fn test_duplicate_and_out_of_order_rejected() {
        let buf = buffer(8);
        assert_eq!(buf.push(frame(5)), PushOutcome::Accepted);
        assert_eq!(buf.push(frame(5)), PushOutcome::Rejected);
        assert_eq!(buf.push(frame(3)), PushOutcome::Rejected);
        assert_eq!(buf.push(frame(6)), PushOutcome::Accepted);

        let stats = buf.stats();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.buffered_frames, 2);
    }

    #[test]
    fn test_underflow_emits_silence_then_goes_idle() {
        let buf = buffer(16);
        for seq in 1..=3 {
            buf.push(frame(seq));
        }
        for _ in 0..3 {
            expect_frame(buf.pop());
        }

        for _ in 0..3 {
            match buf.pop() {
                Playout::Silence(data) => assert_eq!(data.len(), FRAME_BYTES),
                other => panic!("expected silence, got {other:?}"),
            }
        }
        assert_eq!(buf.pop(), Playout::Empty);
        assert!(!buf.is_primed());
        assert_eq!(buf.stats().silence_frames, 3);
    }

    #[test]
    fn test_audio_after_silence_resumes_playout() {
        let buf = buffer(16);
        for seq in 1..=3 {
            buf.push(frame(seq));
        }
        for _ in 0..3 {
            expect_frame(buf.pop());
        }
        assert!(matches!(buf.pop(), Playout::Silence(_)));

        buf.push(frame(4));
        assert_eq!(expect_frame(buf.pop()).seq, 4);
    }

    #[test]
    fn test_mark_end_flushes_short_tail() {
        let buf = buffer(16);
        buf.push(frame(1));
        assert_eq!(buf.pop(), Playout::Empty);

        buf.mark_end();
        assert_eq!(expect_frame(buf.pop()).seq, 1);
        assert_eq!(buf.pop(), Playout::Empty);
        assert_eq!(buf.stats().silence_frames, 0);
    }

    #[test]
    fn test_drain_returns_remainder() {
        let buf = buffer(16);
        buf.push(frame(1));
        buf.push(frame(2));
        let rest = buf.drain();
        assert_eq!(rest.len(), FRAME_BYTES * 2);
        assert!(buf.is_empty());
        assert_eq!(buf.drain().len(), 0);
    }

    #[test]
    fn test_closed_buffer_refuses_frames() {
        let buf = buffer(4);
        buf.close();
        assert_eq!(buf.push(frame(1)), PushOutcome::Closed);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_on_target_fill() {
        let buf = Arc::new(buffer(16));
        let waiter = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.wait_ready().await })
        };

        buf.push(frame(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        buf.push(frame(2));
        buf.push(frame(3));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_ready should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_returns_on_close() {
        let buf = Arc::new(buffer(16));
        let waiter = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.wait_ready().await })
        };
        tokio::task::yield_now().await;
        buf.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_ready should resolve on close")
            .unwrap();
    }
}
