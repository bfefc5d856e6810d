use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 任务调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 优先级层数，优先级取值 0..priority_levels，0 最高
    pub priority_levels: usize,
    /// 每个优先级队列的容量
    pub queue_capacity: usize,
    /// 所有队列中排队任务总数上限
    pub max_tasks: usize,
    /// 达到该次数的失败后任务进入 failed
    pub retry_limit: u32,
    /// 执行器平均负载超过该比例时拒绝新任务
    pub admission_load_limit: f64,
    pub execute_interval_ms: u64,
    pub history_size: usize,
    /// 执行器滚动表现的时间窗口
    pub performance_window_seconds: u64,
    /// 判定执行器降级前窗口内至少需要的样本数
    pub degradation_min_samples: usize,
    /// 模拟执行耗时
    pub simulated_work_ms: u64,
    pub retry: RetryPolicyConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority_levels: 3,
            queue_capacity: 1000,
            max_tasks: 5000,
            retry_limit: 3,
            admission_load_limit: 0.9,
            execute_interval_ms: 1000,
            history_size: 1000,
            performance_window_seconds: 300,
            degradation_min_samples: 10,
            simulated_work_ms: 0,
            retry: RetryPolicyConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn execute_interval(&self) -> Duration {
        Duration::from_millis(self.execute_interval_ms)
    }

    pub fn performance_window(&self) -> Duration {
        Duration::from_secs(self.performance_window_seconds)
    }

    pub fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.priority_levels, "scheduler.priority_levels", 256)?;
        ValidationUtils::validate_count(self.queue_capacity, "scheduler.queue_capacity", 1_000_000)?;
        ValidationUtils::validate_count(self.max_tasks, "scheduler.max_tasks", 10_000_000)?;
        ValidationUtils::validate_count(self.retry_limit as usize, "scheduler.retry_limit", 100)?;
        ValidationUtils::validate_ratio(self.admission_load_limit, "scheduler.admission_load_limit")?;
        ValidationUtils::validate_positive_duration(
            self.execute_interval_ms,
            "scheduler.execute_interval_ms",
        )?;
        ValidationUtils::validate_count(self.history_size, "scheduler.history_size", 1_000_000)?;
        ValidationUtils::validate_positive_duration(
            self.performance_window_seconds,
            "scheduler.performance_window_seconds",
        )?;
        ValidationUtils::validate_count(
            self.degradation_min_samples,
            "scheduler.degradation_min_samples",
            100_000,
        )?;
        self.retry.validate()?;
        Ok(())
    }
}

/// 失败任务的重试退避策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// 基础重试间隔（毫秒），0 表示下一周期即可重试
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl ConfigValidator for RetryPolicyConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(crate::ConfigError::Validation(
                "scheduler.retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(crate::ConfigError::Validation(
                "scheduler.retry.max_delay_ms must not be less than base_delay_ms".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.jitter_factor, "scheduler.retry.jitter_factor")?;
        Ok(())
    }
}
