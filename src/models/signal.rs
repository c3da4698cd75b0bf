//! 目标系统信号与错误分类结果
//!
//! - [`TargetSignal`]：适配器在提交后观察到的原始信号（横幅、最后错误、响应状态）
//! - [`FailureSignal`]：交给分类器的输入，在原始信号之外还带上适配器异常和契约违反
//! - [`ErrorClassification`]：分类结果，每次观察都重新计算，不持久化

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// 横幅级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerLevel {
    Success,
    #[default]
    Info,
    Warning,
    Error,
}

/// 页面上的提示横幅
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub text: String,
    #[serde(default)]
    pub level: BannerLevel,
}

impl Banner {
    pub fn new(text: impl Into<String>, level: BannerLevel) -> Self {
        Self {
            text: text.into(),
            level,
        }
    }
}

/// 适配器在提交后观察到的信号
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSignal {
    #[serde(default)]
    pub banner: Option<Banner>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub response_status: Option<u16>,
}

impl TargetSignal {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_banner(text: impl Into<String>, level: BannerLevel) -> Self {
        Self {
            banner: Some(Banner::new(text, level)),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.response_status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// 契约违反：重试也不会好转的情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// 所有已知策略都用尽，控件始终没有出现
    StrategiesExhausted { control_id: String },
    /// 名称解析器在目标提供的选项里找不到匹配
    NoMatchingOption { control_id: String, wanted: String },
    /// 条目缺少表单需要的属性
    MissingAttribute { control_id: String, attribute: String },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::StrategiesExhausted { control_id } => {
                write!(f, "控件 {} 在所有定位策略下都未出现", control_id)
            }
            ContractViolation::NoMatchingOption { control_id, wanted } => {
                write!(f, "控件 {} 没有与 '{}' 匹配的选项", control_id, wanted)
            }
            ContractViolation::MissingAttribute {
                control_id,
                attribute,
            } => {
                write!(f, "控件 {} 需要的属性 '{}' 缺失", control_id, attribute)
            }
        }
    }
}

/// 分类器输入
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSignal {
    pub banner: Option<Banner>,
    pub error_text: Option<String>,
    pub response_status: Option<u16>,
    pub fault: Option<AdapterError>,
    pub violation: Option<ContractViolation>,
}

impl FailureSignal {
    pub fn from_fault(fault: AdapterError) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    pub fn from_violation(violation: ContractViolation) -> Self {
        Self {
            violation: Some(violation),
            ..Self::default()
        }
    }

    /// 信号本身是否表明失败
    ///
    /// 没有异常、没有错误文本、状态码不是 4xx/5xx、横幅不是警告/错误 → 视为成功。
    pub fn indicates_failure(&self) -> bool {
        self.fault.is_some()
            || self.violation.is_some()
            || self.error_text.is_some()
            || self.response_status.is_some_and(|status| status >= 400)
            || self
                .banner
                .as_ref()
                .is_some_and(|b| matches!(b.level, BannerLevel::Warning | BannerLevel::Error))
    }

    /// 所有可供文本匹配的内容
    pub fn texts(&self) -> Vec<String> {
        let mut texts = Vec::new();
        if let Some(banner) = &self.banner {
            texts.push(banner.text.clone());
        }
        if let Some(error) = &self.error_text {
            texts.push(error.clone());
        }
        if let Some(fault) = &self.fault {
            texts.push(fault.to_string());
        }
        texts
    }

    /// 人类可读的诊断文本
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(violation) = &self.violation {
            parts.push(violation.to_string());
        }
        if let Some(fault) = &self.fault {
            parts.push(fault.to_string());
        }
        if let Some(banner) = &self.banner {
            parts.push(format!("横幅: {}", banner.text));
        }
        if let Some(error) = &self.error_text {
            parts.push(format!("错误: {}", error));
        }
        if let Some(status) = self.response_status {
            parts.push(format!("状态码: {}", status));
        }
        if parts.is_empty() {
            "无信号".to_string()
        } else {
            parts.join("; ")
        }
    }
}

impl From<TargetSignal> for FailureSignal {
    fn from(signal: TargetSignal) -> Self {
        Self {
            banner: signal.banner,
            error_text: signal.last_error,
            response_status: signal.response_status,
            fault: None,
            violation: None,
        }
    }
}

/// 错误类别（封闭分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 已存在，良性结果
    Duplicate,
    /// 可重试（目标侧或网络侧的暂时问题）
    Transient,
    /// 条目级致命错误，不重试
    Fatal,
    /// 无法识别，按有上限的瞬时错误处理
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::Unknown)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Duplicate => "重复",
            ErrorCategory::Transient => "瞬时错误",
            ErrorCategory::Fatal => "致命错误",
            ErrorCategory::Unknown => "未知错误",
        };
        f.write_str(name)
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    /// 原始诊断文本
    pub diagnostic: String,
}

impl ErrorClassification {
    pub fn new(category: ErrorCategory, diagnostic: impl Into<String>) -> Self {
        Self {
            category,
            diagnostic: diagnostic.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_signal_is_not_failure() {
        assert!(!FailureSignal::from(TargetSignal::ok()).indicates_failure());
        assert!(!FailureSignal::from(TargetSignal::ok().with_status(200)).indicates_failure());
        assert!(!FailureSignal::from(TargetSignal::with_banner(
            "保存成功",
            BannerLevel::Success
        ))
        .indicates_failure());
    }

    #[test]
    fn test_error_banner_and_status_indicate_failure() {
        assert!(FailureSignal::from(TargetSignal::with_banner("出错了", BannerLevel::Error))
            .indicates_failure());
        assert!(FailureSignal::from(TargetSignal::ok().with_status(502)).indicates_failure());
    }

    #[test]
    fn test_deserialize_adapter_payload() {
        let signal: TargetSignal = serde_json::from_str(
            r#"{"banner":{"text":"用户已存在","level":"warning"},"last_error":null,"response_status":409}"#,
        )
        .unwrap();
        assert_eq!(signal.banner.unwrap().level, BannerLevel::Warning);
        assert_eq!(signal.response_status, Some(409));
    }
}
