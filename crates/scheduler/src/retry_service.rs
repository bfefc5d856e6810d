use std::time::Duration;

use chrono::{DateTime, Utc};
use controlplane_config::RetryPolicyConfig;
use controlplane_core::to_chrono;

/// 失败任务的退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    /// 第 `retry_count` 次重试前的等待时间，从 1 开始计数
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_interval = self.config.base_delay_ms as f64;
        if base_interval <= 0.0 {
            return Duration::ZERO;
        }
        let multiplier = self.config.backoff_multiplier;
        let max_interval = self.config.max_delay_ms as f64;
        let jitter_factor = self.config.jitter_factor;

        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_interval = base_interval * multiplier.powi(exponent);
        let capped_interval = exponential_interval.min(max_interval);

        // 随机抖动，避免同一批失败任务同时重试
        let jitter = capped_interval * jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_interval = (capped_interval + jitter).max(base_interval);

        Duration::from_millis(final_interval as u64)
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        now + to_chrono(self.delay_for(retry_count))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default())
    }
}
