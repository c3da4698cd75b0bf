//! 可用性状态
//!
//! 进程内唯一一份，只由 [`crate::resilience::AvailabilityMonitor`] 修改。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::resilience::BackoffPolicy;

/// 目标系统可用性状态
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceState {
    pub is_target_available: bool,
    /// 最后一次真实探测的时间（从未探测为 `None`）
    pub last_checked_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub current_backoff: Duration,
}

impl ResilienceState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            is_target_available: true,
            last_checked_at: None,
            consecutive_failures: 0,
            current_backoff: policy.base,
        }
    }

    /// 记录一次探测结果
    ///
    /// 失败：连续失败数 +1，退避按策略增长。
    /// 成功：连续失败数清零，退避回到基础值。
    pub fn record_probe(&mut self, available: bool, policy: &BackoffPolicy, at: Instant) {
        self.is_target_available = available;
        self.last_checked_at = Some(at);
        if available {
            self.consecutive_failures = 0;
            self.current_backoff = policy.base;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.current_backoff = policy.next(self.current_backoff);
        }
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        ResilienceSnapshot {
            consecutive_failures: self.consecutive_failures,
            current_backoff_ms: self.current_backoff.as_millis() as u64,
        }
    }

    /// 从快照恢复（退避限制在策略范围内）
    pub fn restore(&mut self, snapshot: &ResilienceSnapshot, policy: &BackoffPolicy) {
        self.consecutive_failures = snapshot.consecutive_failures;
        self.current_backoff = Duration::from_millis(snapshot.current_backoff_ms)
            .clamp(policy.base, policy.max.max(policy.base));
        self.is_target_available = snapshot.consecutive_failures == 0;
        self.last_checked_at = None;
    }
}

/// 可持久化的部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceSnapshot {
    pub consecutive_failures: u32,
    pub current_backoff_ms: u64,
}
