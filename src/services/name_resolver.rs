//! 名称解析服务 - 业务能力层
//!
//! 决定"在目标当前提供的选项里选哪一个"。编排层只把它当黑盒：
//! 要么返回选中的选项，要么返回"无匹配"。

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::models::ItemAttributes;

/// 无匹配
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("在 {offered} 个选项中没有找到 '{wanted}'")]
pub struct NoMatch {
    pub wanted: String,
    pub offered: usize,
}

/// 名称解析器
pub trait NameResolver: Send + Sync {
    /// # 参数
    /// - `wanted`: 条目属性里的期望值
    /// - `attributes`: 条目全部属性（供需要上下文的解析器使用）
    /// - `offered`: 目标当前提供的选项
    fn resolve(
        &self,
        wanted: &str,
        attributes: &ItemAttributes,
        offered: &[String],
    ) -> Result<String, NoMatch>;
}

/// 基于规范化文本的解析器
///
/// 规范化：去首尾空白、转小写、合并空白、去掉标点。
/// 先找完全相等的选项，再找唯一的包含关系，都没有则无匹配。
pub struct NormalizedNameResolver {
    punctuation: Regex,
    whitespace: Regex,
}

impl NormalizedNameResolver {
    pub fn new() -> Self {
        Self {
            punctuation: Regex::new(r"[\p{P}\p{S}]").expect("valid punctuation regex"),
            whitespace: Regex::new(r"\s+").expect("valid whitespace regex"),
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let lower = text.trim().to_lowercase();
        let stripped = self.punctuation.replace_all(&lower, "");
        self.whitespace.replace_all(stripped.trim(), " ").into_owned()
    }
}

impl Default for NormalizedNameResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver for NormalizedNameResolver {
    fn resolve(
        &self,
        wanted: &str,
        _attributes: &ItemAttributes,
        offered: &[String],
    ) -> Result<String, NoMatch> {
        let no_match = || NoMatch {
            wanted: wanted.to_string(),
            offered: offered.len(),
        };

        let target = self.normalize(wanted);
        if target.is_empty() {
            return Err(no_match());
        }

        let normalized: Vec<String> = offered.iter().map(|o| self.normalize(o)).collect();

        if let Some(pos) = normalized.iter().position(|o| *o == target) {
            debug!("名称解析: '{}' 精确匹配 '{}'", wanted, offered[pos]);
            return Ok(offered[pos].clone());
        }

        let containing: Vec<usize> = normalized
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.is_empty() && (o.contains(&target) || target.contains(o.as_str())))
            .map(|(i, _)| i)
            .collect();

        match containing.as_slice() {
            [only] => {
                debug!("名称解析: '{}' 包含匹配 '{}'", wanted, offered[*only]);
                Ok(offered[*only].clone())
            }
            _ => Err(no_match()),
        }
    }
}
