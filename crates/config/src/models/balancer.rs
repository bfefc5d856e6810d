use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub enabled: bool,
    pub balance_interval_seconds: u64,
    /// 低于该负载视为 healthy
    pub target_load: f64,
    /// 达到该负载视为 overloaded，扩缩容后的负载也不超过该值
    pub max_load: f64,
    /// 分布平滑系数 α
    pub smoothing_factor: f64,
    /// 空载时的基准响应时间（毫秒）
    pub base_response_time_ms: f64,
    pub history_size: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            balance_interval_seconds: 30,
            target_load: 0.7,
            max_load: 0.9,
            smoothing_factor: 0.3,
            base_response_time_ms: 10.0,
            history_size: 1000,
        }
    }
}

impl BalancerConfig {
    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_interval_seconds)
    }

    /// 超过该时长未收到心跳的节点视为离线
    pub fn offline_after(&self) -> Duration {
        self.balance_interval() * 2
    }
}

impl ConfigValidator for BalancerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_positive_duration(
            self.balance_interval_seconds,
            "balancer.balance_interval_seconds",
        )?;
        ValidationUtils::validate_ratio(self.target_load, "balancer.target_load")?;
        ValidationUtils::validate_ratio(self.max_load, "balancer.max_load")?;
        if self.target_load >= self.max_load {
            return Err(crate::ConfigError::Validation(
                "balancer.target_load must be less than balancer.max_load".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.smoothing_factor, "balancer.smoothing_factor")?;
        ValidationUtils::validate_positive(
            self.base_response_time_ms,
            "balancer.base_response_time_ms",
        )?;
        ValidationUtils::validate_count(self.history_size, "balancer.history_size", 1_000_000)?;
        Ok(())
    }
}
