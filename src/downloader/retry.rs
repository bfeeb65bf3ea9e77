//! 失败重试的等待时间表

use std::time::Duration;

/// 固定递增的重试等待时间，超出长度后停在最后一档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(&[1_000, 5_000, 15_000, 30_000])
    }
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// 第 attempt 次重试前的等待时间，attempt 从 1 开始
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.schedule.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt as usize).min(self.schedule.len()) - 1;
        self.schedule[index]
    }
}
