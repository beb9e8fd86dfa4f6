//! Operator cancel requests.

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Source of "stop recording now" requests, polled once per loop iteration.
pub trait CancelSignal {
    /// Whether a cancel was requested since the last call. Must not block.
    fn cancel_requested(&mut self) -> bool;
}

/// Never requests a cancel.
#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl CancelSignal for Never {
    fn cancel_requested(&mut self) -> bool {
        false
    }
}

/// Shared flag, set from anywhere (tests, signal handlers).
impl CancelSignal for Arc<AtomicBool> {
    fn cancel_requested(&mut self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Cancels when the operator presses `q` (or Esc) in the terminal.
///
/// The terminal is left in cooked mode, so on most setups the key is only
/// delivered after Enter.
#[derive(Debug, Clone, Copy)]
pub struct KeyPress {
    key: char,
}

impl Default for KeyPress {
    fn default() -> Self {
        Self { key: 'q' }
    }
}

impl CancelSignal for KeyPress {
    fn cancel_requested(&mut self) -> bool {
        loop {
            match event::poll(Duration::ZERO) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    warn!(%err, "terminal input unavailable");
                    return false;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                    if key.code == KeyCode::Char(self.key) || key.code == KeyCode::Esc {
                        info!(key = ?key.code, "cancel requested");
                        return true;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "failed to read terminal input");
                    return false;
                }
            }
        }
    }
}
