use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 背压治理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub monitor_interval_ms: u64,
    /// 滑动窗口长度（秒）
    pub window_seconds: u64,
    /// 压力阈值，high/critical 的分界
    pub pressure_threshold: f64,
    pub history_size: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor_interval_ms: 1000,
            window_seconds: 60,
            pressure_threshold: 0.8,
            history_size: 1000,
        }
    }
}

impl GovernorConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl ConfigValidator for GovernorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_positive_duration(
            self.monitor_interval_ms,
            "governor.monitor_interval_ms",
        )?;
        ValidationUtils::validate_positive_duration(self.window_seconds, "governor.window_seconds")?;
        ValidationUtils::validate_ratio(self.pressure_threshold, "governor.pressure_threshold")?;
        ValidationUtils::validate_count(self.history_size, "governor.history_size", 1_000_000)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_config_default() {
        let config = GovernorConfig::default();
        assert_eq!(config.pressure_threshold, 0.8);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = GovernorConfig {
            pressure_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
