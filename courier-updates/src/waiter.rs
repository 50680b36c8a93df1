//! Per-channel gap detection and buffered replay.
//!
//! The waiter keeps three counters: `good` (highest confirmed contiguous
//! pts), `last` (highest pts seen, possibly ahead of `good`) and `count`
//! (the running total of increments).  An update is contiguous exactly when
//! `last == count` after accounting for it; `last > count` means updates
//! were skipped and must arrive out-of-band, `last < count` means more
//! increments were reported than the counter advanced.  While a gap is
//! open, payload-carrying updates are buffered keyed by `(last, count)` at
//! the time of arrival and replayed in that key order once the gap
//! resolves.

use std::collections::BTreeMap;
use std::mem;
use std::time::Duration;

/// Identifies the sequence a waiter reconciles: a channel's id, or `0` for
/// the account-wide update feed.
pub type ChannelId = i64;

/// How long to wait for skipped updates to arrive out-of-band before the
/// host should fall back to an explicit difference fetch.
pub const WAIT_FOR_SKIPPED_TIMEOUT: Duration = Duration::from_millis(1000);

/// Near-zero delay armed when more increments were reported than the
/// counter advanced; the condition is treated as transient and rechecked
/// almost immediately.
pub const RECHECK_OVERLAP_TIMEOUT: Duration = Duration::from_millis(1);

// ─── UpdateHost ───────────────────────────────────────────────────────────────

/// The waiter's collaborator: the update-dispatch layer.
///
/// Re-delivery callbacks receive the waiter back, so the host's normal
/// dispatch path (which consults the waiter for every update) can run
/// unchanged during replay; the waiter's replay depth counter makes those
/// nested consultations report "applied" without re-entering gap detection.
pub trait UpdateHost: Sized {
    /// A single buffered update payload.
    type Update;
    /// A buffered update-batch container.
    type Updates;

    /// Re-deliver one buffered update during replay.
    fn feed_update(&mut self, waiter: &mut PtsWaiter<Self>, channel: ChannelId, update: Self::Update);

    /// Re-deliver one buffered batch during replay.
    fn feed_updates(&mut self, waiter: &mut PtsWaiter<Self>, channel: ChannelId, updates: Self::Updates);

    /// Arm (`Some`) or cancel (`None`) the single-shot gap timer for
    /// `channel`.  Arming an already-armed timer restarts it.
    fn start_timer_for(&mut self, channel: ChannelId, timeout: Option<Duration>);
}

/// Payload buffered while a gap is open.
enum Skipped<U, B> {
    Update(U),
    Updates(B),
}

/// Buffered entries sort by `(last, count)` at arrival time; both counters
/// are non-decreasing while a gap is open, so key order is arrival order.
fn pts_key(last: i32, count: i32) -> u64 {
    ((last as u32 as u64) << 32) | (count as u32 as u64)
}

// ─── PtsWaiter ────────────────────────────────────────────────────────────────

/// Sequence-number reconciliation engine for one channel.
///
/// Call one of the [`updated`](PtsWaiter::updated) methods for every
/// incoming update; the return value says whether the caller should apply
/// it now.  Buffered payloads come back through
/// [`UpdateHost::feed_update`] / [`UpdateHost::feed_updates`] when
/// [`apply_skipped_updates`](PtsWaiter::apply_skipped_updates) runs, which
/// the dispatch layer triggers on gap resolution, gap-timer expiry, or
/// resync completion.
pub struct PtsWaiter<H: UpdateHost> {
    queue:                  BTreeMap<u64, Skipped<H::Update, H::Updates>>,
    good:                   i32,
    last:                   i32,
    count:                  i32,
    inited:                 bool,
    requesting:             bool,
    waiting_for_skipped:    bool,
    waiting_for_short_poll: bool,
    apply_skipped_level:    u32,
}

impl<H: UpdateHost> Default for PtsWaiter<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: UpdateHost> PtsWaiter<H> {
    /// A waiter with no confirmed state; the first update initializes it.
    pub fn new() -> Self {
        Self {
            queue:                  BTreeMap::new(),
            good:                   0,
            last:                   0,
            count:                  0,
            inited:                 false,
            requesting:             false,
            waiting_for_skipped:    false,
            waiting_for_short_poll: false,
            apply_skipped_level:    0,
        }
    }

    /// Adopt `pts` as the confirmed state, either server-provided or taken
    /// from the first update seen (nothing to reconcile against yet).
    pub fn init(&mut self, pts: i32) {
        self.good = pts;
        self.last = pts;
        self.count = pts;
        self.inited = true;
    }

    /// Whether a confirmed state has been established.
    pub fn inited(&self) -> bool {
        self.inited
    }

    /// The highest confirmed contiguous pts value.
    pub fn current(&self) -> i32 {
        self.good
    }

    /// Whether an explicit difference fetch is in flight.
    pub fn requesting(&self) -> bool {
        self.requesting
    }

    /// Enter or leave unconditional-accept mode for the duration of an
    /// explicit difference fetch.  Entering it drops the buffered queue:
    /// the fetched difference supersedes everything buffered.
    pub fn set_requesting(&mut self, requesting: bool) {
        self.requesting = requesting;
        if requesting {
            self.clear_skipped_updates();
        }
    }

    /// Whether a gap is open and the skipped-updates timer is running.
    pub fn waiting_for_skipped(&self) -> bool {
        self.waiting_for_skipped
    }

    /// Whether the waiter is passively waiting on an external poll cycle.
    pub fn waiting_for_short_poll(&self) -> bool {
        self.waiting_for_short_poll
    }

    /// Start (`Some`) or stop (`None`) waiting for skipped updates.
    /// Stopping cancels the channel's timer if no wait condition remains.
    pub fn set_waiting_for_skipped(&mut self, host: &mut H, channel: ChannelId, timeout: Option<Duration>) {
        match timeout {
            Some(timeout) => {
                host.start_timer_for(channel, Some(timeout));
                self.waiting_for_skipped = true;
            }
            None => {
                self.waiting_for_skipped = false;
                self.check_for_waiting(host, channel);
            }
        }
    }

    /// Start (`Some`) or stop (`None`) waiting on an external short-poll
    /// cycle.  Stopping cancels the channel's timer if no wait condition
    /// remains.
    pub fn set_waiting_for_short_poll(&mut self, host: &mut H, channel: ChannelId, timeout: Option<Duration>) {
        match timeout {
            Some(timeout) => {
                host.start_timer_for(channel, Some(timeout));
                self.waiting_for_short_poll = true;
            }
            None => {
                self.waiting_for_short_poll = false;
                self.check_for_waiting(host, channel);
            }
        }
    }

    fn check_for_waiting(&mut self, host: &mut H, channel: ChannelId) {
        if !self.waiting_for_skipped && !self.waiting_for_short_poll {
            host.start_timer_for(channel, None);
        }
    }

    /// Record an update carrying no payload the waiter would need to buffer.
    ///
    /// Returns `true` if the caller should apply the update now, `false` if
    /// it must be dropped (stale duplicate) or has been accounted as part
    /// of an open gap.
    pub fn updated(&mut self, host: &mut H, channel: ChannelId, pts: i32, count: i32) -> bool {
        if self.requesting || self.apply_skipped_level > 0 {
            return true;
        } else if pts <= self.good && count > 0 {
            return false;
        }
        self.check(host, channel, pts, count)
    }

    /// Record a single update; on `false` the payload has been buffered for
    /// replay and must not be applied by the caller.
    pub fn updated_with_update(
        &mut self,
        host:    &mut H,
        channel: ChannelId,
        pts:     i32,
        count:   i32,
        update:  H::Update,
    ) -> bool {
        if self.requesting || self.apply_skipped_level > 0 {
            return true;
        } else if pts <= self.good && count > 0 {
            return false;
        } else if self.check(host, channel, pts, count) {
            return true;
        }
        self.queue.insert(pts_key(self.last, self.count), Skipped::Update(update));
        false
    }

    /// Record an update-batch; on `false` the batch has been buffered for
    /// replay and must not be applied by the caller.
    pub fn updated_with_updates(
        &mut self,
        host:    &mut H,
        channel: ChannelId,
        pts:     i32,
        count:   i32,
        updates: H::Updates,
    ) -> bool {
        if self.requesting || self.apply_skipped_level > 0 {
            return true;
        } else if pts <= self.good && count > 0 {
            return false;
        } else if self.check(host, channel, pts, count) {
            return true;
        }
        self.queue.insert(pts_key(self.last, self.count), Skipped::Updates(updates));
        false
    }

    /// Returns `false` if the update must be buffered and applied later.
    fn check(&mut self, host: &mut H, channel: ChannelId, pts: i32, count: i32) -> bool {
        if !self.inited {
            self.init(pts);
            return true;
        }

        self.last = self.last.max(pts);
        self.count += count;
        if self.last == self.count {
            self.good = self.last;
            return true;
        } else if self.last < self.count {
            // More increments reported than the counter advanced; transient,
            // recheck almost immediately.
            self.set_waiting_for_skipped(host, channel, Some(RECHECK_OVERLAP_TIMEOUT));
        } else {
            tracing::debug!(
                "[pts] gap on channel {channel}: last={} accounted={} — waiting for skipped updates",
                self.last,
                self.count,
            );
            self.set_waiting_for_skipped(host, channel, Some(WAIT_FOR_SKIPPED_TIMEOUT));
        }
        // A zero-increment probe (keepalive) never blocks on an open gap.
        count == 0
    }

    /// Replay everything buffered, in arrival order, through the host's
    /// re-delivery entry points, then clear the buffer.
    ///
    /// The waiting flag is cleared first and a depth counter is held across
    /// the re-delivery calls, so the host's dispatch path can consult the
    /// waiter as usual while replaying: every nested call reports
    /// "applied".  No-op unless a gap was open.
    pub fn apply_skipped_updates(&mut self, host: &mut H, channel: ChannelId) {
        if !self.waiting_for_skipped {
            return;
        }

        self.set_waiting_for_skipped(host, channel, None);

        if self.queue.is_empty() {
            return;
        }

        tracing::debug!("[pts] replaying {} skipped entries on channel {channel}", self.queue.len());
        self.apply_skipped_level += 1;
        let queue = mem::take(&mut self.queue);
        for (_, skipped) in queue {
            match skipped {
                Skipped::Update(update)   => host.feed_update(self, channel, update),
                Skipped::Updates(updates) => host.feed_updates(self, channel, updates),
            }
        }
        // Saturating: a host may have already cleared the buffer (and the
        // depth counter with it) from inside a re-delivery callback.
        self.apply_skipped_level = self.apply_skipped_level.saturating_sub(1);
        self.clear_skipped_updates();
    }

    /// Drop all buffered payloads and reset the replay depth counter.
    pub fn clear_skipped_updates(&mut self) {
        self.queue.clear();
        self.apply_skipped_level = 0;
    }

    /// How many payloads are currently buffered for replay.
    pub fn skipped_len(&self) -> usize {
        self.queue.len()
    }
}
