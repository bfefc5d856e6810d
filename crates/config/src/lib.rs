//! 控制平面配置
//!
//! 每个组件一个配置段，全部可序列化并带默认值。加载顺序见 [`AppConfig::load`]。

pub mod models;
pub mod validation;

pub use models::{
    AppConfig, BalancerConfig, ConsensusConfig, GovernorConfig, LogConfig, LogFormat, LogLevel,
    MetricsConfig, ResolverConfig, RetryPolicyConfig, SchedulerConfig, ENV_PREFIX,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置校验错误
///
/// 文件读取和解析错误由 `anyhow` 携带上下文返回，这里只描述取值不合法。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    /// 出错的配置项说明
    pub fn message(&self) -> &str {
        match self {
            ConfigError::Validation(message) => message,
        }
    }
}
