//! 批次报告
//!
//! 每个条目产生恰好一个 [`ItemResult`]，按输入顺序追加到 [`BatchReport`]，
//! 创建后不再修改。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{ErrorCategory, Item};

/// 条目最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// 注册成功
    Success,
    /// 已存在，跳过（不是失败）
    Duplicate,
    /// 失败
    Error,
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemOutcome::Success => "成功",
            ItemOutcome::Duplicate => "跳过(重复)",
            ItemOutcome::Error => "失败",
        };
        f.write_str(name)
    }
}

/// 单个条目的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// 条目在批次中的位置（从 0 开始）
    pub index: usize,
    pub item: Item,
    pub outcome: ItemOutcome,
    /// 实际尝试次数（未尝试即为 0）
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// 最后一次失败的分类
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ItemResult {
    pub fn new(
        index: usize,
        item: Item,
        outcome: ItemOutcome,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            item,
            outcome,
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
            category: None,
            diagnostic: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// 批次提前终止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoffReason {
    /// 会话丢失且重新打开失败
    SessionLost,
    /// 必须重试时等待目标恢复超时
    TargetUnavailable,
    /// 调用方取消
    Cancelled,
}

impl fmt::Display for CutoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CutoffReason::SessionLost => "会话丢失",
            CutoffReason::TargetUnavailable => "目标系统不可用",
            CutoffReason::Cancelled => "已取消",
        };
        f.write_str(name)
    }
}

/// 批次截断点
///
/// `index` 是第一个没有得到明确结果的条目，调用方可以从这里续跑。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCutoff {
    pub index: usize,
    pub reason: CutoffReason,
}

/// 批次报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<BatchCutoff>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            results: Vec::with_capacity(total),
            duration_ms: 0,
            cutoff: None,
        }
    }

    /// 追加结果并更新计数
    pub fn push(&mut self, result: ItemResult) {
        match result.outcome {
            ItemOutcome::Success => self.succeeded += 1,
            ItemOutcome::Duplicate => self.skipped += 1,
            ItemOutcome::Error => self.failed += 1,
        }
        self.results.push(result);
    }

    pub fn set_cutoff(&mut self, index: usize, reason: CutoffReason) {
        self.cutoff = Some(BatchCutoff { index, reason });
    }

    pub fn finish(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
    }

    /// 第一个未处理的条目（续跑起点）
    pub fn resume_index(&self) -> Option<usize> {
        self.cutoff.map(|cutoff| cutoff.index)
    }

    pub fn is_complete(&self) -> bool {
        self.cutoff.is_none() && self.results.len() == self.total
    }
}
