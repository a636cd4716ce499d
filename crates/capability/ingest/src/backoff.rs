//! 重连退避与失败日志限频。

use std::time::Duration;
use tokio::time::Instant;

/// 重连参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次重试前的等待时间。
    pub initial_delay: Duration,
    /// 等待时间上限。
    pub max_delay: Duration,
    /// 持续失败期间两次失败日志之间的最小间隔。
    pub report_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            report_interval: Duration::from_secs(60),
        }
    }
}

/// 指数退避：每次翻倍，不超过上限，不限制次数。
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            attempt: 0,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.initial_delay, policy.max_delay)
    }

    /// 返回本次等待时间并推进到下一档。
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let sleep = self.current_delay;
        self.current_delay = self
            .current_delay
            .checked_mul(2)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        sleep
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

/// 失败日志限频：首次失败立即记录，之后每个间隔最多记录一次。
#[derive(Debug)]
pub struct FailureLog {
    interval: Duration,
    failures: u32,
    last_report: Option<Instant>,
}

impl FailureLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            failures: 0,
            last_report: None,
        }
    }

    /// 记录一次失败，返回本次是否应输出日志。
    pub fn failed(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        let now = Instant::now();
        let due = match self.last_report {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due {
            self.last_report = Some(now);
        }
        due
    }

    /// 连接恢复；返回恢复前累计的失败次数（无失败时为 None）。
    pub fn recovered(&mut self) -> Option<u32> {
        let failures = self.failures;
        self.failures = 0;
        self.last_report = None;
        (failures > 0).then_some(failures)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
