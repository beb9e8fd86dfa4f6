//! Capture loop run on the dedicated producer thread.

use crate::queue::{FrameSender, Offer};
use crate::traits::CaptureStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Why the capture loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProducerEnd {
    /// The running flag was cleared.
    #[default]
    Stopped,
    /// A frame read failed; treated as end of stream.
    ReadFailed(String),
    /// The consumer side of the queue went away.
    ConsumerGone,
}

impl fmt::Display for ProducerEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::ReadFailed(reason) => write!(f, "read failed: {reason}"),
            Self::ConsumerGone => write!(f, "consumer gone"),
        }
    }
}

/// What the producer did before it returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Frames read from the camera, queued or not.
    pub captured: u64,
    /// Frames discarded because the queue was full.
    pub dropped: u64,
    /// How the loop ended.
    pub end: ProducerEnd,
}

/// Pulls frames from a capture stream into the frame queue.
pub struct FrameProducer<S> {
    stream: S,
    queue: FrameSender,
}

impl<S: CaptureStream> FrameProducer<S> {
    /// Create a producer for an opened, configured stream.
    pub const fn new(stream: S, queue: FrameSender) -> Self {
        Self { stream, queue }
    }

    /// Read frames until `running` is cleared or the stream fails.
    ///
    /// The flag is checked before each read, so a read already in progress
    /// when the flag flips still completes and its frame is offered.
    /// Consumes the producer; dropping the queue half on return tells the
    /// consumer no more frames will come.
    pub fn run(mut self, running: &AtomicBool) -> ProducerReport {
        let mut report = ProducerReport::default();

        while running.load(Ordering::Acquire) {
            let frame = match self.stream.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, captured = report.captured, "camera read failed, ending capture");
                    report.end = ProducerEnd::ReadFailed(err.to_string());
                    break;
                }
            };
            report.captured += 1;

            let sequence = frame.metadata.sequence;
            match self.queue.offer(frame) {
                Offer::Queued => {}
                Offer::Dropped => {
                    report.dropped += 1;
                    trace!(sequence, "queue full, frame dropped");
                }
                Offer::Closed => {
                    report.end = ProducerEnd::ConsumerGone;
                    break;
                }
            }
        }

        debug!(
            captured = report.captured,
            dropped = report.dropped,
            end = ?report.end,
            "producer finished"
        );
        report
    }
}
