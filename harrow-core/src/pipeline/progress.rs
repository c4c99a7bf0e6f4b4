//! Progress estimates. These are monitoring signals, not completion
//! fractions: discovery divides by an assumed cap rather than a known total.

use std::time::Duration;
use tokio::time::Instant;

/// Recompute discovery progress on every Nth unique URL.
pub const DISCOVERY_STRIDE: usize = 10;
/// Recompute vulnerability progress on every Nth finding.
pub const FINDING_STRIDE: usize = 5;

pub const DISCOVERY_START: u8 = 10;
pub const DISCOVERY_CEILING: u8 = 60;
pub const DISCOVERY_COMPLETE: u8 = 65;
pub const VULNERABILITY_START: u8 = 70;
pub const VULNERABILITY_INITIALIZING: u8 = 71;
pub const VULNERABILITY_CEILING: u8 = 90;
pub const VULNERABILITY_COMPLETE: u8 = 94;
pub const NO_TARGETS: u8 = 95;

/// `10 + floor(50 * discovered / cap)`, clamped to 60.
pub fn discovery_progress(discovered: usize, cap: usize) -> u8 {
    let raw = 10 + 50 * discovered / cap.max(1);
    raw.min(DISCOVERY_CEILING as usize) as u8
}

/// `71 + floor(19 * findings / targets)`, clamped to 90.
pub fn vulnerability_progress(findings: usize, targets: usize) -> u8 {
    let raw = 71 + 19 * findings / targets.max(1);
    raw.min(VULNERABILITY_CEILING as usize) as u8
}

/// Map a tool-reported completion percentage onto the 71..=90 band.
pub fn tool_percent_progress(percent: f64) -> u8 {
    let percent = percent.clamp(0.0, 100.0);
    let raw = 71.0 + 19.0 * percent / 100.0;
    (raw.floor() as u8).min(VULNERABILITY_CEILING)
}

/// Decides when a counter-driven progress value is worth rebroadcasting:
/// on every `stride`-th item, or when `interval` has passed since the last
/// recomputation.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    stride: usize,
    interval: Duration,
    last: Instant,
}

impl ProgressThrottle {
    pub fn new(stride: usize, interval: Duration, now: Instant) -> Self {
        Self {
            stride: stride.max(1),
            interval,
            last: now,
        }
    }

    pub fn should_recompute(&mut self, count: usize, now: Instant) -> bool {
        let due = count % self.stride == 0
            || now.saturating_duration_since(self.last) >= self.interval;
        if due {
            self.last = now;
        }
        due
    }
}
