use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 共识协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub enabled: bool,
    pub coordinate_interval_ms: u64,
    pub quorum_size: usize,
    pub max_participants: usize,
    /// 会话截止时间，同时也是进程心跳超时
    pub consensus_timeout_seconds: u64,
    /// 决议视为已完成所需的最少票数
    pub decision_min_votes: usize,
    pub history_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            coordinate_interval_ms: 1000,
            quorum_size: 2,
            max_participants: 16,
            consensus_timeout_seconds: 30,
            decision_min_votes: 2,
            history_size: 1000,
        }
    }
}

impl ConsensusConfig {
    pub fn coordinate_interval(&self) -> Duration {
        Duration::from_millis(self.coordinate_interval_ms)
    }

    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_secs(self.consensus_timeout_seconds)
    }
}

impl ConfigValidator for ConsensusConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_positive_duration(
            self.coordinate_interval_ms,
            "consensus.coordinate_interval_ms",
        )?;
        ValidationUtils::validate_count(self.quorum_size, "consensus.quorum_size", 1024)?;
        ValidationUtils::validate_count(self.max_participants, "consensus.max_participants", 1024)?;
        if self.quorum_size > self.max_participants {
            return Err(crate::ConfigError::Validation(
                "consensus.quorum_size must not exceed consensus.max_participants".to_string(),
            ));
        }
        ValidationUtils::validate_positive_duration(
            self.consensus_timeout_seconds,
            "consensus.consensus_timeout_seconds",
        )?;
        ValidationUtils::validate_count(self.decision_min_votes, "consensus.decision_min_votes", 1024)?;
        ValidationUtils::validate_count(self.history_size, "consensus.history_size", 1_000_000)?;
        Ok(())
    }
}

/// 冲突解决器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// 登记冲突时是否自动发起后台解决
    pub auto_resolve: bool,
    pub max_attempts: u32,
    /// 第 n 次失败后等待 n × backoff_base_ms
    pub backoff_base_ms: u64,
    pub resolution_timeout_seconds: u64,
    pub min_confidence: f64,
    /// 后台解决任务的并发上限
    pub worker_pool_size: usize,
    pub history_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_resolve: true,
            max_attempts: 3,
            backoff_base_ms: 1000,
            resolution_timeout_seconds: 30,
            min_confidence: 0.8,
            worker_pool_size: 4,
            history_size: 1000,
        }
    }
}

impl ResolverConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_seconds)
    }
}

impl ConfigValidator for ResolverConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.max_attempts as usize, "resolver.max_attempts", 100)?;
        ValidationUtils::validate_positive_duration(
            self.resolution_timeout_seconds,
            "resolver.resolution_timeout_seconds",
        )?;
        ValidationUtils::validate_ratio(self.min_confidence, "resolver.min_confidence")?;
        ValidationUtils::validate_count(self.worker_pool_size, "resolver.worker_pool_size", 1024)?;
        ValidationUtils::validate_count(self.history_size, "resolver.history_size", 1_000_000)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_config_default() {
        let config = ConsensusConfig::default();
        assert_eq!(config.quorum_size, 2);
        assert_eq!(config.decision_min_votes, 2);
        assert_eq!(config.consensus_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quorum_larger_than_participants() {
        let config = ConsensusConfig {
            quorum_size: 10,
            max_participants: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolver_config_default() {
        let config = ResolverConfig::default();
        assert!(config.auto_resolve);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolver_invalid_confidence() {
        let config = ResolverConfig {
            min_confidence: 2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
