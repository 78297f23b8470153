//! Dual sliding-window quota tracking.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Quota ceilings and window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Maximum calls admitted within `request_window`.
    pub max_requests: u64,
    /// Length of the request-count window.
    pub request_window: Duration,
    /// Maximum tokens admitted within `token_window`.
    pub max_tokens: u64,
    /// Length of the token window.
    pub token_window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            request_window: Duration::from_secs(70),
            max_tokens: 6_000,
            token_window: Duration::from_secs(60),
        }
    }
}

/// Which quota dimension is holding a call back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Call-count window.
    Requests,
    /// Token window.
    Tokens,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requests => write!(f, "requests"),
            Self::Tokens => write!(f, "tokens"),
        }
    }
}

#[derive(Debug)]
struct SlidingWindow {
    length: Duration,
    ceiling: u64,
    entries: VecDeque<(Instant, u64)>,
    total: u64,
}

impl SlidingWindow {
    const fn new(length: Duration, ceiling: u64) -> Self {
        Self {
            length,
            ceiling,
            entries: VecDeque::new(),
            total: 0,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&(at, cost)) = self.entries.front() {
            if now.saturating_duration_since(at) < self.length {
                break;
            }
            self.entries.pop_front();
            self.total = self.total.saturating_sub(cost);
        }
    }

    const fn fits(&self, cost: u64) -> bool {
        self.total.saturating_add(cost) <= self.ceiling
    }

    fn push(&mut self, now: Instant, cost: u64) {
        self.entries.push_back((now, cost));
        self.total = self.total.saturating_add(cost);
    }

    /// Time until enough of the oldest entries expire for `cost` to fit.
    fn wait_for(&self, cost: u64, now: Instant) -> Duration {
        if self.fits(cost) {
            return Duration::ZERO;
        }
        let mut released = 0u64;
        for &(at, entry_cost) in &self.entries {
            released = released.saturating_add(entry_cost);
            if (self.total - released.min(self.total)).saturating_add(cost) <= self.ceiling {
                return (at + self.length).saturating_duration_since(now);
            }
        }
        // Cost alone is above the ceiling: stay finite, the caller reports it.
        self.entries.front().map_or(Duration::ZERO, |&(at, _)| {
            (at + self.length).saturating_duration_since(now)
        })
    }
}

/// Admission oracle over a request-count window and a token window.
///
/// Every query first evicts entries older than the window length. The
/// tracker never sleeps; callers loop on [`QuotaTracker::admit`] and wait
/// [`QuotaTracker::time_until_available`] in between. State lives in memory
/// only and starts empty after a restart.
#[derive(Debug)]
pub struct QuotaTracker {
    config: QuotaConfig,
    requests: SlidingWindow,
    tokens: SlidingWindow,
}

impl QuotaTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            requests: SlidingWindow::new(config.request_window, config.max_requests),
            tokens: SlidingWindow::new(config.token_window, config.max_tokens),
            config,
        }
    }

    /// Configured ceilings.
    #[must_use]
    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn evict(&mut self, now: Instant) {
        self.requests.evict_expired(now);
        self.tokens.evict_expired(now);
    }

    /// True iff one more call costing `cost` tokens keeps both windows at or
    /// under their ceilings.
    pub fn admit(&mut self, cost: u64, now: Instant) -> bool {
        self.blocking_window(cost, now).is_none()
    }

    /// The first window that would be pushed over its ceiling, if any.
    pub fn blocking_window(&mut self, cost: u64, now: Instant) -> Option<WindowKind> {
        self.evict(now);
        if !self.requests.fits(1) {
            Some(WindowKind::Requests)
        } else if !self.tokens.fits(cost) {
            Some(WindowKind::Tokens)
        } else {
            None
        }
    }

    /// Appends a completed call to both windows.
    pub fn record(&mut self, cost: u64, now: Instant) {
        self.evict(now);
        self.requests.push(now, 1);
        self.tokens.push(now, cost);
    }

    /// Minimum wait before a call of `cost` could be admitted.
    ///
    /// Zero when [`QuotaTracker::admit`] would succeed. Always finite, even
    /// when `cost` alone exceeds the token ceiling (see
    /// [`QuotaTracker::exceeds_ceiling`]).
    pub fn time_until_available(&mut self, cost: u64, now: Instant) -> Duration {
        self.evict(now);
        self.requests
            .wait_for(1, now)
            .max(self.tokens.wait_for(cost, now))
    }

    /// Whether `cost` can never be admitted, no matter how long one waits.
    #[must_use]
    pub const fn exceeds_ceiling(&self, cost: u64) -> bool {
        cost > self.config.max_tokens || self.config.max_requests == 0
    }

    /// Remaining `(requests, tokens)` budget at `now`.
    pub fn remaining(&mut self, now: Instant) -> (u64, u64) {
        self.evict(now);
        (
            self.config.max_requests.saturating_sub(self.requests.total),
            self.config.max_tokens.saturating_sub(self.tokens.total),
        )
    }

    /// Calls currently inside the request window.
    pub fn requests_in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.requests.entries.len()
    }
}
