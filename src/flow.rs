//! Flow-control window accounting (RFC 9113 Section 5.2).
//!
//! Windows are signed: a SETTINGS_INITIAL_WINDOW_SIZE reduction can push a
//! send window below zero, after which nothing may be sent until enough
//! WINDOW_UPDATE credit arrives.

use crate::frame::MAX_WINDOW_SIZE;

/// Window arithmetic failure. The caller decides whether it is connection
/// or stream scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("flow-control window exceeded")]
    Underflow,
    #[error("flow-control window overflow")]
    Overflow,
}

/// Tracks one send or receive window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControl {
    window: i64,
}

impl FlowControl {
    pub fn new(initial: u32) -> Self {
        Self {
            window: i64::from(initial),
        }
    }

    /// Current window size (may be negative after SETTINGS change).
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Bytes that may be sent or received right now.
    pub fn available(&self) -> u32 {
        self.window.clamp(0, i64::from(MAX_WINDOW_SIZE)) as u32
    }

    /// Consume `amount` bytes. Fails, leaving the window untouched, if the
    /// window would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), FlowError> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(FlowError::Underflow);
        }
        self.window = new;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn increase(&mut self, increment: u32) -> Result<(), FlowError> {
        self.adjust(i64::from(increment))
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE change.
    /// `delta` is (new_initial - old_initial), which can be negative.
    pub fn adjust(&mut self, delta: i64) -> Result<(), FlowError> {
        let new = self.window + delta;
        if new > i64::from(MAX_WINDOW_SIZE) {
            return Err(FlowError::Overflow);
        }
        self.window = new;
        Ok(())
    }

    /// Return bytes that were reserved with `consume` but never sent.
    pub fn release(&mut self, amount: u32) {
        self.window = (self.window + i64::from(amount)).min(i64::from(MAX_WINDOW_SIZE));
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(crate::frame::DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

/// Receive-side bookkeeping that batches WINDOW_UPDATE frames.
///
/// Bytes handed to the application accumulate until they reach `threshold`,
/// then the whole amount is returned to the peer at once.
#[derive(Debug, Clone)]
pub(crate) struct PendingRefund {
    unacked: u32,
    threshold: u32,
}

impl PendingRefund {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            unacked: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record consumed bytes. Returns the increment to announce, if due.
    pub(crate) fn add(&mut self, n: u32) -> Option<u32> {
        self.unacked = self.unacked.saturating_add(n);
        if self.unacked >= self.threshold {
            Some(std::mem::take(&mut self.unacked))
        } else {
            None
        }
    }
}
