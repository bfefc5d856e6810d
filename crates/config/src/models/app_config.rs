use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    balancer::BalancerConfig,
    consensus::{ConsensusConfig, ResolverConfig},
    governor::GovernorConfig,
    logging::LogConfig,
    metrics::MetricsConfig,
    scheduler::SchedulerConfig,
};
use crate::validation::ConfigValidator;

/// 环境变量前缀，例如 CONTROLPLANE__SCHEDULER__RETRY_LIMIT=5
pub const ENV_PREFIX: &str = "CONTROLPLANE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub balancer: BalancerConfig,
    pub governor: GovernorConfig,
    pub consensus: ConsensusConfig,
    pub resolver: ResolverConfig,
    pub logging: LogConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// 按 默认值 → 配置文件 → 环境变量 的顺序叠加配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(
            ConfigBuilder::try_from(&AppConfig::default()).context("加载默认配置失败")?,
        );

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.scheduler.validate()?;
        self.balancer.validate()?;
        self.governor.validate()?;
        self.consensus.validate()?;
        self.resolver.validate()?;
        self.logging.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogFormat;
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.priority_levels, 3);
        assert_eq!(config.balancer.target_load, 0.7);
        assert_eq!(config.governor.pressure_threshold, 0.8);
        assert_eq!(config.consensus.quorum_size, 2);
        assert!(config.resolver.auto_resolve);
    }

    #[test]
    fn test_app_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_serialization() {
        let config = AppConfig::default();
        let serialized = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: AppConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(
            config.scheduler.queue_capacity,
            deserialized.scheduler.queue_capacity
        );
        assert_eq!(
            config.balancer.balance_interval_seconds,
            deserialized.balancer.balance_interval_seconds
        );
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[scheduler]
priority_levels = 5
retry_limit = 2

[balancer]
target_load = 0.6

[logging]
level = "debug"
format = "json"
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.scheduler.priority_levels, 5);
        assert_eq!(config.scheduler.retry_limit, 2);
        assert_eq!(config.scheduler.queue_capacity, 1000);
        assert_eq!(config.balancer.target_load, 0.6);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.governor.window_seconds, 60);
    }

    #[test]
    fn test_app_config_from_invalid_toml() {
        let toml_str = r#"
[balancer]
target_load = 0.95
max_load = 0.9
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().expect("Failed to serialize");
        let parsed = AppConfig::from_toml(&toml_str).expect("Failed to parse");
        assert_eq!(parsed.resolver.max_attempts, config.resolver.max_attempts);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp file");
        writeln!(
            file,
            "[governor]\npressure_threshold = 0.75\n\n[resolver]\nworker_pool_size = 8"
        )
        .expect("Failed to write config");

        let path = file.path().to_str().expect("utf-8 path");
        let config = AppConfig::load(Some(path)).expect("Failed to load config");
        assert_eq!(config.governor.pressure_threshold, 0.75);
        assert_eq!(config.resolver.worker_pool_size, 8);
        assert_eq!(config.consensus.quorum_size, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load(Some("/nonexistent/controlplane.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load(None).expect("Failed to load defaults");
        assert_eq!(config.scheduler.max_tasks, 5000);
    }
}
