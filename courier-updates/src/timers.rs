//! Per-channel single-shot gap timers on Tokio.
//!
//! [`PtsWaiter`](crate::PtsWaiter) expresses all waits as "call me back
//! later" through [`UpdateHost::start_timer_for`](crate::UpdateHost::start_timer_for);
//! this module supplies that primitive for Tokio hosts.  Each channel gets
//! at most one armed timer (re-arming replaces it) and expiry is delivered
//! as the channel's id on an unbounded channel the dispatch loop selects on.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::waiter::ChannelId;

// ─── GapTimers ────────────────────────────────────────────────────────────────

/// A bank of single-shot timers, one per channel.
///
/// Must be created and driven inside a Tokio runtime.
pub struct GapTimers {
    expired: mpsc::UnboundedSender<ChannelId>,
    armed:   HashMap<ChannelId, JoinHandle<()>>,
}

impl GapTimers {
    /// Create a timer bank.  Expiries arrive on the returned receiver in
    /// firing order.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { expired: tx, armed: HashMap::new() }, rx)
    }

    /// Arm (or restart) the timer for `channel`; `None` cancels it.
    pub fn schedule(&mut self, channel: ChannelId, timeout: Option<Duration>) {
        if let Some(handle) = self.armed.remove(&channel) {
            handle.abort();
        }
        let Some(timeout) = timeout else { return };
        let expired = self.expired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired.send(channel);
        });
        self.armed.insert(channel, handle);
    }

    /// Whether the timer for `channel` is armed and has not fired yet.
    pub fn armed(&self, channel: ChannelId) -> bool {
        self.armed.get(&channel).is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for GapTimers {
    fn drop(&mut self) {
        for handle in self.armed.values() {
            handle.abort();
        }
    }
}
