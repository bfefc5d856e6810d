use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// 错误类别
///
/// 与具体变体无关的错误分类，经过上下文包装后保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Resource,
    Timeout,
    Consensus,
    Dependency,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Resource => "RESOURCE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Consensus => "CONSENSUS",
            ErrorKind::Dependency => "DEPENDENCY",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("{entity}未找到: {id}")]
    NotFound { entity: String, id: String },
    #[error("资源不足: {0}")]
    Resource(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("未达成共识: {0}")]
    Consensus(String),
    #[error("依赖未满足: {0}")]
    Dependency(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
    #[error("[{layer}] {source}{}", format_annotations(.annotations))]
    Context {
        layer: String,
        annotations: BTreeMap<String, String>,
        #[source]
        source: Box<ControlPlaneError>,
    },
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

fn format_annotations(annotations: &BTreeMap<String, String>) -> String {
    if annotations.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = annotations
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!(" ({})", pairs.join(", "))
}

impl ControlPlaneError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn not_found<E: Into<String>, I: Into<String>>(entity: E, id: I) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
    pub fn resource<S: Into<String>>(msg: S) -> Self {
        Self::Resource(msg.into())
    }
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn consensus<S: Into<String>>(msg: S) -> Self {
        Self::Consensus(msg.into())
    }
    pub fn dependency<S: Into<String>>(msg: S) -> Self {
        Self::Dependency(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 错误类别，穿透上下文包装
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::Validation(_) => ErrorKind::Validation,
            ControlPlaneError::NotFound { .. } => ErrorKind::NotFound,
            ControlPlaneError::Resource(_) => ErrorKind::Resource,
            ControlPlaneError::Timeout(_) => ErrorKind::Timeout,
            ControlPlaneError::Consensus(_) => ErrorKind::Consensus,
            ControlPlaneError::Dependency(_) => ErrorKind::Dependency,
            ControlPlaneError::Configuration(_) => ErrorKind::Configuration,
            ControlPlaneError::Serialization(_) | ControlPlaneError::Internal(_) => {
                ErrorKind::Internal
            }
            ControlPlaneError::Context { source, .. } => source.kind(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// 最内层的原始错误
    pub fn root(&self) -> &ControlPlaneError {
        match self {
            ControlPlaneError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// 添加所在层的上下文
    pub fn with_context<L: Into<String>>(self, layer: L) -> Self {
        ControlPlaneError::Context {
            layer: layer.into(),
            annotations: BTreeMap::new(),
            source: Box::new(self),
        }
    }

    /// 添加键值注解；未包装的错误会先以 `unknown` 层包装
    pub fn with_annotation<K: Into<String>, V: ToString>(self, key: K, value: V) -> Self {
        match self {
            ControlPlaneError::Context {
                layer,
                mut annotations,
                source,
            } => {
                annotations.insert(key.into(), value.to_string());
                ControlPlaneError::Context {
                    layer,
                    annotations,
                    source,
                }
            }
            other => other
                .with_context("unknown")
                .with_annotation(key, value),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal | ErrorKind::Configuration)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Resource | ErrorKind::Consensus
        )
    }

    pub fn user_message(&self) -> &str {
        match self.kind() {
            ErrorKind::Validation => "输入数据验证失败",
            ErrorKind::NotFound => "请求的对象不存在",
            ErrorKind::Resource => "系统资源不足，请稍后重试",
            ErrorKind::Timeout => "操作超时，请稍后重试",
            ErrorKind::Consensus => "参与者未能达成一致",
            ErrorKind::Dependency => "前置依赖尚未满足",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(err: serde_json::Error) -> Self {
        ControlPlaneError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ControlPlaneError {
    fn from(err: anyhow::Error) -> Self {
        ControlPlaneError::Internal(err.to_string())
    }
}

/// 为 `Result` 提供上下文包装
pub trait ResultExt<T> {
    fn context_layer<L: Into<String>>(self, layer: L) -> ControlPlaneResult<T>;
    fn annotate<K: Into<String>, V: ToString>(self, key: K, value: V) -> ControlPlaneResult<T>;
}

impl<T> ResultExt<T> for ControlPlaneResult<T> {
    fn context_layer<L: Into<String>>(self, layer: L) -> ControlPlaneResult<T> {
        self.map_err(|e| e.with_context(layer))
    }

    fn annotate<K: Into<String>, V: ToString>(self, key: K, value: V) -> ControlPlaneResult<T> {
        self.map_err(|e| e.with_annotation(key, value))
    }
}
