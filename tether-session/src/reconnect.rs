//! Reconnect backoff and the single-shot retry timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::Input;

/// Longest wait between reconnect attempts, in seconds.
pub const MAX_DELAY_SECS: u64 = 300;

/// Exponential reconnect delay: 1, 2, 4, ... 128, then 300 from there on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    current: Option<u64>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the delay for the next attempt.
    pub fn next_delay(&mut self) -> u64 {
        let next = match self.current {
            None => 1,
            Some(d) if d >= MAX_DELAY_SECS / 2 => MAX_DELAY_SECS,
            Some(d) => (d * 2).min(MAX_DELAY_SECS),
        };
        self.current = Some(next);
        next
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Cancelable one-shot timer that posts [`Input::ReconnectTimerFired`].
///
/// Every schedule or cancel bumps the generation, so a tick that was already
/// queued before a cancel is recognizably stale.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    backoff: Backoff,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending tick and arm a new one after the next backoff
    /// delay. Returns the delay in seconds.
    pub fn schedule(&mut self, tx: &mpsc::UnboundedSender<Input>) -> u64 {
        self.cancel();
        let delay = self.backoff.next_delay();
        let generation = self.generation;
        let tx = tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            let _ = tx.send(Input::ReconnectTimerFired { generation });
        }));
        delay
    }

    /// Stop the pending tick, keeping the current delay.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Cancel and forget the backoff progression.
    pub fn reset(&mut self) {
        self.cancel();
        self.backoff.reset();
    }

    /// Consume a tick. True if it belongs to the armed schedule.
    pub fn fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.pending.is_none() {
            return false;
        }
        self.pending = None;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_delay(&self) -> Option<u64> {
        self.backoff.current()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
