//! 错误类型定义
//!
//! 解析和测速的失败都以数据形式返回，这里的错误类型只在内部传递原因，
//! 或者用于配置、订阅这类确实需要中止的场景。

use thiserror::Error;

/// 节点链接解析失败的原因（对外只表现为 `None`，原因写入日志）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unsupported link scheme")]
    UnsupportedScheme,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid vmess json: {0}")]
    InvalidJson(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// 配置与凭据错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingSecret(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// 订阅获取错误
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscription request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("subscription blocked by remote firewall (HTTP 403)")]
    Blocked,

    #[error("subscription returned HTTP {0}")]
    Status(u16),
}
