//! Live preview hook.

use crate::traits::{Format, Frame};

/// Receives a subset of recorded frames for on-screen display.
pub trait PreviewSink {
    /// Show one frame. Must return quickly; recording waits on it.
    fn show(&mut self, frame: &Frame, format: &Format);

    /// Tear down any window or surface.
    fn close(&mut self) {}
}

/// Headless preview: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreview;

impl PreviewSink for NoPreview {
    fn show(&mut self, _frame: &Frame, _format: &Format) {}
}
