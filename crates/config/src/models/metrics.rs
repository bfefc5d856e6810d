use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 指标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus 抓取端点监听地址，None 时不启动导出器
    pub prometheus_listen: Option<String>,
    /// 进程内保留的指标点数量
    pub history_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_listen: None,
            history_size: 1000,
        }
    }
}

impl ConfigValidator for MetricsConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(listen) = &self.prometheus_listen {
            listen.parse::<std::net::SocketAddr>().map_err(|e| {
                crate::ConfigError::Validation(format!(
                    "metrics.prometheus_listen is not a valid socket address: {listen} ({e})"
                ))
            })?;
        }
        ValidationUtils::validate_count(self.history_size, "metrics.history_size", 1_000_000)?;
        Ok(())
    }
}
