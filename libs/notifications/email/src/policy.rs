//! Retry and timeout policy for a dispatch.
//!
//! One dispatcher serves both delivery styles; they differ only in the
//! [`DeliveryPolicy`] preset it is given:
//!
//! | | simple | persistent |
//! |---|---|---|
//! | verify timeout | 10s | 30s |
//! | verify attempts | 1 | 3, 5s apart |
//! | send timeout | 30s | 120s |
//! | send retries | 0 | 3, linear 5s × n |
//! | deadline | 90s | 10 min |

use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Delay before the n-th retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base × retry`, so 1×, 2×, 3× ... the base delay.
    Linear(Duration),
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear(base) => base.saturating_mul(retry.max(1)),
        }
    }
}

/// How many times one step is tried against one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetrySchedule {
    /// Try exactly once.
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// First attempt plus `retries` more, waiting `backoff` in between.
    pub const fn with_retries(retries: u32, backoff: Backoff) -> Self {
        Self {
            attempts: retries + 1,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Timeouts, retry schedules and overall budget for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub name: &'static str,
    pub verify_timeout: Duration,
    pub verify: RetrySchedule,
    pub send_timeout: Duration,
    pub send: RetrySchedule,
    /// Wall-clock cap for the whole dispatch across all providers and retries.
    pub deadline: Duration,
}

impl DeliveryPolicy {
    /// One verify and one send per provider, short timeouts.
    pub fn simple() -> Self {
        Self {
            name: "simple",
            verify_timeout: Duration::from_secs(10),
            verify: RetrySchedule::once(),
            send_timeout: Duration::from_secs(30),
            send: RetrySchedule::once(),
            deadline: Duration::from_secs(90),
        }
    }

    /// Retries verification and sends before moving on, longer timeouts.
    pub fn persistent() -> Self {
        Self {
            name: "persistent",
            verify_timeout: Duration::from_secs(30),
            verify: RetrySchedule {
                attempts: 3,
                backoff: Backoff::Fixed(Duration::from_secs(5)),
            },
            send_timeout: Duration::from_secs(120),
            send: RetrySchedule::with_retries(3, Backoff::Linear(Duration::from_secs(5))),
            deadline: Duration::from_secs(600),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_verify(mut self, timeout: Duration, schedule: RetrySchedule) -> Self {
        self.verify_timeout = timeout;
        self.verify = schedule;
        self
    }

    pub fn with_send(mut self, timeout: Duration, schedule: RetrySchedule) -> Self {
        self.send_timeout = timeout;
        self.send = schedule;
        self
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::simple()
    }
}

impl FromStr for DeliveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::simple()),
            "persistent" => Ok(Self::persistent()),
            other => Err(format!(
                "unknown delivery policy '{}' (expected 'simple' or 'persistent')",
                other
            )),
        }
    }
}

/// Longest wall-clock budget a dispatch may be given.
pub const MAX_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Absolute end time of a dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    ends: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock. Budgets above [`MAX_DEADLINE`] are capped to it.
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        let budget = budget.min(MAX_DEADLINE);
        let ends = started.checked_add(budget).unwrap_or(started);
        Self { started, ends, budget }
    }

    /// The budget this deadline was started with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.ends.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Clamp a step timeout to what is left of the budget.
    ///
    /// Returns `None` once the budget is spent.
    pub fn clamp(&self, timeout: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            None
        } else {
            Some(timeout.min(remaining))
        }
    }
}
