//! Bounded frame queue between the capture thread and the writer.
//!
//! The queue never blocks the producer: when it is full the offered frame is
//! discarded and counted, so the camera driver keeps being polled at its own
//! pace regardless of how fast frames reach the disk.

use crate::traits::Frame;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default queue depth.
pub const DEFAULT_CAPACITY: usize = 128;

/// Outcome of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The frame was enqueued.
    Queued,
    /// The queue was full and the frame was discarded.
    Dropped,
    /// The consumer is gone.
    Closed,
}

/// Result of polling the queue from the consumer side.
#[derive(Debug)]
pub enum Poll {
    /// Next frame in arrival order.
    Frame(Frame),
    /// Nothing arrived within the wait.
    Empty,
    /// The producer has finished and every queued frame has been taken.
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted into the queue.
    pub queued: u64,
    /// Frames discarded because the queue was full.
    pub dropped: u64,
}

/// Producer half of the frame queue.
#[derive(Debug)]
pub struct FrameSender {
    tx: Sender<Frame>,
    counters: Arc<Counters>,
}

/// Consumer half of the frame queue.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    counters: Arc<Counters>,
}

/// Create a bounded single-producer/single-consumer frame queue.
///
/// A capacity of zero is raised to one so the queue can hold a frame.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let counters = Arc::new(Counters::default());
    (
        FrameSender {
            tx,
            counters: Arc::clone(&counters),
        },
        FrameReceiver { rx, counters },
    )
}

impl FrameSender {
    /// Enqueue a frame if there is room, otherwise discard it.
    pub fn offer(&self, frame: Frame) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Offer::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    /// Frames currently waiting.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Maximum number of waiting frames.
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(DEFAULT_CAPACITY)
    }
}

impl FrameReceiver {
    /// Take the oldest frame without waiting.
    pub fn try_next(&self) -> Poll {
        match self.rx.try_recv() {
            Ok(frame) => Poll::Frame(frame),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    /// Take the oldest frame, waiting at most `wait` for one to arrive.
    pub fn next_timeout(&self, wait: Duration) -> Poll {
        if wait.is_zero() {
            return self.try_next();
        }
        match self.rx.recv_timeout(wait) {
            Ok(frame) => Poll::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Poll::Empty,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }

    /// Frames currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Counter snapshot shared with the producer half.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
