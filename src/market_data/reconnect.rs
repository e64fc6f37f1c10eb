use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Sleep, sleep};
use tracing::{debug, info};

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// `delay = min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let multiplier = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(multiplier);
        Duration::from_millis(ms).min(self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed(Duration),
    Firing,
}

/// Backoff timer for the connection supervisor.
///
/// The pending fire is an owned `Sleep`, so cancelling it (re-arm, manual
/// reconnect, teardown) is just dropping it; nothing can fire afterwards.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    attempts: u32,
    state: SchedulerState,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: SchedulerState::Idle,
            timer: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Unexpected close (or failed open): replaces any pending timer with a
    /// new one and returns its delay.
    pub fn arm(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempts);
        self.timer = Some(Box::pin(sleep(delay)));
        self.state = SchedulerState::Armed(delay);
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempts + 1,
            "reconnect scheduled"
        );
        crate::metrics::record_reconnect_scheduled(delay.as_millis() as u64);
        delay
    }

    /// Drops the pending timer, if any. The attempt counter is untouched.
    pub fn cancel(&mut self) {
        if self.timer.take().is_some() {
            debug!("pending reconnect cancelled");
        }
        if matches!(self.state, SchedulerState::Armed(_)) {
            self.state = SchedulerState::Idle;
        }
    }

    /// Connection opened: back to a clean slate.
    pub fn on_open(&mut self) {
        self.timer = None;
        self.attempts = 0;
        self.state = SchedulerState::Idle;
    }

    /// Resolves when the armed timer expires; pending forever while unarmed.
    /// Cancel-safe, so it can sit in a `select!` arm.
    pub async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.await,
            None => pending::<()>().await,
        }
        self.timer = None;
        self.attempts = self.attempts.saturating_add(1);
        self.state = SchedulerState::Firing;
    }
}
