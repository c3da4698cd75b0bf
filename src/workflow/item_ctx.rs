//! 条目处理上下文
//!
//! 封装"我正在处理哪一批的第几个条目"这一信息

use std::fmt::Display;

/// 条目处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 批次编号（从1开始，仅用于日志显示）
    pub batch_index: usize,

    /// 条目在批次中的位置（从0开始）
    pub index: usize,

    /// 批次条目总数
    pub total: usize,

    /// 条目标签
    pub label: String,
}

impl ItemCtx {
    pub fn new(batch_index: usize, index: usize, total: usize, label: impl Into<String>) -> Self {
        Self {
            batch_index,
            index,
            total,
            label: label.into(),
        }
    }

    /// 提交操作在仲裁器中的 id（同一条目的重复提交会合并）
    pub fn submit_operation_id(&self, session_id: u64) -> String {
        format!("submit:{}:{}:{}", session_id, self.batch_index, self.index)
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[批次 {}] [条目 {}/{} {}]",
            self.batch_index,
            self.index + 1,
            self.total,
            self.label
        )
    }
}
