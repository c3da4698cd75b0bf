//! 定位策略描述
//!
//! `StrategySpec` 描述"如何找到一个控件"，文本形式为 `kind=value`：
//! - `css=#submit`
//! - `xpath=//button[text()='提交']`
//! - `text=提交`
//! - `label=角色`
//!
//! 没有前缀时按 CSS 选择器处理。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 定位方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocatorKind {
    Css,
    XPath,
    Text,
    Label,
}

impl LocatorKind {
    pub fn prefix(self) -> &'static str {
        match self {
            LocatorKind::Css => "css",
            LocatorKind::XPath => "xpath",
            LocatorKind::Text => "text",
            LocatorKind::Label => "label",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.trim().to_ascii_lowercase().as_str() {
            "css" => Some(LocatorKind::Css),
            "xpath" => Some(LocatorKind::XPath),
            "text" => Some(LocatorKind::Text),
            "label" => Some(LocatorKind::Label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("无法解析定位策略 '{spec}': {reason}")]
pub struct LocatorParseError {
    pub spec: String,
    pub reason: String,
}

/// 定位策略
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StrategySpec {
    kind: LocatorKind,
    value: String,
}

impl StrategySpec {
    pub fn new(kind: LocatorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorKind::Css, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(LocatorKind::XPath, value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(LocatorKind::Text, value)
    }

    pub fn label(value: impl Into<String>) -> Self {
        Self::new(LocatorKind::Label, value)
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for StrategySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind.prefix(), self.value)
    }
}

impl FromStr for StrategySpec {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| LocatorParseError {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        // 选择器里本身可能有 '='（如 [name=role]），只有已知前缀才拆分
        let (kind, value) = match s.split_once('=') {
            Some((prefix, rest)) => match LocatorKind::from_prefix(prefix) {
                Some(kind) => (kind, rest),
                None => (LocatorKind::Css, s),
            },
            None => (LocatorKind::Css, s),
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(fail("定位值为空"));
        }

        Ok(Self::new(kind, value))
    }
}

impl TryFrom<String> for StrategySpec {
    type Error = LocatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategySpec> for String {
    fn from(spec: StrategySpec) -> Self {
        spec.to_string()
    }
}
