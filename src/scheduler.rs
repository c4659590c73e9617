//! Timing helpers for the task loops.
//!
//! ```text
//!   acquisition:   ├── sweep ──┤·········sleep·········├── sweep ──┤····
//!                  ▲                                   ▲
//!                  start                               start + period
//!
//!   advertising:   restart at most once per interval while idle with
//!                  unsent data; a disconnect re-arms it immediately
//! ```
//!
//! Both types are plain state machines over a millisecond clock value,
//! so they are tested without sleeping.

use log::debug;

// ═══════════════════════════════════════════════════════════════
//  Periodic timer
// ═══════════════════════════════════════════════════════════════

/// Start-to-start period. A cycle that runs long shortens the following
/// sleep instead of pushing every later cycle back. A cycle that overruns
/// a whole period re-anchors at the current time rather than bursting to
/// catch up.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    period_ms: u64,
    deadline: Option<u64>,
}

impl PeriodicTimer {
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            deadline: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Mark the start of a cycle and return its start time.
    pub fn begin_cycle(&mut self, now_ms: u64) -> u64 {
        let start = match self.deadline {
            Some(d) if now_ms >= d && now_ms - d < self.period_ms => d,
            Some(d) => {
                if now_ms >= d {
                    debug!("Scheduler: overran by {}ms, re-anchoring", now_ms - d);
                }
                now_ms
            }
            None => now_ms,
        };
        self.deadline = Some(start + self.period_ms);
        start
    }

    /// Time left until the next cycle should begin.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline.map_or(0, |d| d.saturating_sub(now_ms))
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }
}

// ═══════════════════════════════════════════════════════════════
//  Advertising gate
// ═══════════════════════════════════════════════════════════════

/// Rate limit for advertising restarts.
#[derive(Debug, Clone, Copy)]
pub struct AdvertiseGate {
    interval_ms: u64,
    last: Option<u64>,
}

impl AdvertiseGate {
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last: None,
        }
    }

    pub fn ready(&self, now_ms: u64) -> bool {
        self.last
            .is_none_or(|t| now_ms.saturating_sub(t) >= self.interval_ms)
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last = Some(now_ms);
    }

    /// Allow the next restart straight away.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
