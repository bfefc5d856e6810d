use std::net::SocketAddr;

use anyhow::{Context, Result};
use controlplane_config::{LogConfig, LogFormat, MetricsConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化结构化日志
///
/// RUST_LOG 存在时优先使用，否则使用配置中的级别和过滤指令。
/// 全局订阅者已经安装时返回错误。
pub fn init_structured_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))
        .context("解析日志过滤指令失败")?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
    }
    .context("安装日志订阅者失败")?;

    info!(
        logging.format = %config.format,
        logging.level = %config.level,
        logging.location = config.include_location,
        "Structured logging initialized"
    );

    Ok(())
}

/// 安装 Prometheus 导出器
///
/// 配置了监听地址时启动 HTTP 抓取端点，否则只安装进程内记录器，
/// 通过返回的句柄渲染指标文本。
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        info!("Metrics disabled");
        return Ok(None);
    }

    match &config.prometheus_listen {
        Some(listen) => {
            let addr: SocketAddr = listen
                .parse()
                .with_context(|| format!("无效的指标监听地址: {listen}"))?;
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;
            info!(metrics.listen = %addr, "Prometheus exporter listening");
            Ok(None)
        }
        None => {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;
            info!("Prometheus recorder installed without HTTP listener");
            Ok(Some(handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_disabled() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let handle = init_metrics(&config).expect("disabled metrics should not fail");
        assert!(handle.is_none());
    }

    #[test]
    fn test_init_metrics_invalid_listen() {
        let config = MetricsConfig {
            prometheus_listen: Some("bogus".to_string()),
            ..Default::default()
        };
        assert!(init_metrics(&config).is_err());
    }
}
