//! 错误类型定义
//!
//! 分层错误：适配器 / 仲裁器 / 配置 / 持久化，统一包装为 [`AppError`]。
//!
//! 注意：条目级别的失败（重复、瞬时错误、致命错误）不是错误，
//! 而是 [`crate::models::ItemOutcome`] 值；只有契约违反才会以 `Err` 返回。

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 目标适配器错误
    #[error("目标适配器错误: {0}")]
    Adapter(#[from] AdapterError),
    /// 并发仲裁错误
    #[error("并发仲裁错误: {0}")]
    Arbiter(#[from] ArbiterError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 持久化错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 条目不合法（契约违反）
    #[error("条目 {index} 不合法: {reason}")]
    InvalidItem { index: usize, reason: String },
    /// 表单计划不合法（契约违反）
    #[error("表单计划不合法: {0}")]
    InvalidPlan(String),
}

/// 目标适配器错误
///
/// 需要 `Clone`：同一个错误既要写进失败信号，也要写进诊断信息。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// 打开会话失败
    #[error("打开会话失败: {0}")]
    SessionOpen(String),
    /// 会话已失效（被关闭、被踢出、上下文销毁）
    #[error("会话已失效: {0}")]
    SessionInvalidated(String),
    /// 控件未找到
    #[error("控件未找到: {0}")]
    NotFound(String),
    /// 调用超时
    #[error("调用超时: {0}")]
    Timeout(String),
    /// 连接断开
    #[error("连接断开: {0}")]
    Disconnected(String),
    /// 脚本执行失败
    #[error("脚本执行失败: {0}")]
    Script(String),
}

impl AdapterError {
    /// 错误种类（用于分类规则表）
    pub fn kind(&self) -> FaultKind {
        match self {
            AdapterError::SessionOpen(_) => FaultKind::SessionOpen,
            AdapterError::SessionInvalidated(_) => FaultKind::SessionInvalidated,
            AdapterError::NotFound(_) => FaultKind::NotFound,
            AdapterError::Timeout(_) => FaultKind::Timeout,
            AdapterError::Disconnected(_) => FaultKind::Disconnected,
            AdapterError::Script(_) => FaultKind::Script,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for AdapterError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;

        let text = err.to_string();
        match err {
            CdpError::Timeout => AdapterError::Timeout(text),
            CdpError::Ws(_) | CdpError::NoResponse => AdapterError::Disconnected(text),
            _ => {
                let lower = text.to_lowercase();
                if lower.contains("context") && (lower.contains("destroyed") || lower.contains("not found")) {
                    AdapterError::SessionInvalidated(text)
                } else if lower.contains("closed") || lower.contains("disconnected") {
                    AdapterError::Disconnected(text)
                } else {
                    AdapterError::Script(text)
                }
            }
        }
    }
}

/// 适配器错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    SessionOpen,
    SessionInvalidated,
    NotFound,
    Timeout,
    Disconnected,
    Script,
}

/// 并发仲裁错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    /// 槽位超过硬时限，被强制回收
    #[error("操作 {operation_id} 超过槽位时限 {timeout:?}，槽位已被强制回收")]
    SlotTimeout {
        operation_id: String,
        timeout: Duration,
    },
    /// 同一个 operation_id 被用于不同类型的操作
    #[error("操作 {operation_id} 的共享结果类型不匹配")]
    OutcomeTypeMismatch { operation_id: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置值不合法: {0}")]
    Invalid(String),
}

/// 持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 文件读写失败
    #[error("快照文件读写失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON 编解码失败
    #[error("快照 JSON 编解码失败 ({path}): {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
