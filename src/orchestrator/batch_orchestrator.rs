//! 批次编排器 - 编排层
//!
//! ## 职责
//!
//! 把一个批次的条目按输入顺序交给 [`ItemFlow`]，汇总成 [`BatchReport`]。
//!
//! ## 批次级规则
//!
//! - 条目之间：短暂稳定等待 → 刷新活动时钟 → 确认会话（必要时重新打开一次）
//! - 会话无法恢复 / 必须重试时目标长时间不可用：剩余条目标记失败，批次提前终止
//! - 取消只在条目之间检查，进行中的提交允许完成；未开始的条目不记录结果
//! - 单个条目的致命错误只影响它自己
//!
//! 预期内的运行失败永远体现在报告里，只有契约违反（条目或表单计划不合法）才返回 `Err`。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::{EngineConfig, RetryConfig, SessionPolicy};
use crate::error::{AppError, AppResult};
use crate::infrastructure::TargetAdapter;
use crate::models::{CutoffReason, FormPlan, Item, ItemOutcome, ItemResult, BatchReport};
use crate::resilience::{AvailabilityMonitor, ConcurrencyArbiter};
use crate::services::{
    ErrorClassifier, NameResolver, NormalizedNameResolver, SharedStrategyCache, StrategyCache,
};
use crate::workflow::{ItemCtx, ItemFlow, SessionKeeper};

/// 进程内批次序号，提交操作 id 依赖它在共享仲裁器里保持唯一
static NEXT_BATCH: AtomicUsize = AtomicUsize::new(1);

/// 协作式取消
#[derive(Debug, Clone, Default)]
pub struct BatchCancellation {
    flag: Arc<AtomicBool>,
}

impl BatchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 批次编排器
pub struct BatchOrchestrator {
    adapter: Arc<dyn TargetAdapter>,
    resolver: Arc<dyn NameResolver>,
    classifier: ErrorClassifier,
    cache: SharedStrategyCache,
    monitor: Arc<AvailabilityMonitor>,
    arbiter: ConcurrencyArbiter,
    plan: FormPlan,
    retry: RetryConfig,
    max_wait: Duration,
    cancellation: BatchCancellation,
}

impl BatchOrchestrator {
    /// 创建编排器
    ///
    /// 默认使用 [`NormalizedNameResolver`]、默认规则表和按配置新建的策略缓存。
    pub fn new(
        adapter: Arc<dyn TargetAdapter>,
        arbiter: ConcurrencyArbiter,
        monitor: Arc<AvailabilityMonitor>,
        plan: FormPlan,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            adapter,
            resolver: Arc::new(NormalizedNameResolver::new()),
            classifier: ErrorClassifier::new(),
            cache: StrategyCache::from_config(&engine.cache).into_shared(),
            monitor,
            arbiter,
            plan,
            retry: engine.retry.clone(),
            max_wait: engine.backoff.max_wait(),
            cancellation: BatchCancellation::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// 使用外部共享的策略缓存（跨批次、跨进程快照）
    pub fn with_cache(mut self, cache: SharedStrategyCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cancellation(mut self, cancellation: BatchCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cache(&self) -> &SharedStrategyCache {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    pub fn cancellation(&self) -> BatchCancellation {
        self.cancellation.clone()
    }

    /// 处理一个批次
    ///
    /// # 参数
    /// - `items`: 按顺序处理的条目
    /// - `policy`: 会话策略
    ///
    /// # 返回
    /// 批次报告；只有条目或表单计划不合法时返回 `Err`
    pub async fn run_batch(&self, items: &[Item], policy: &SessionPolicy) -> AppResult<BatchReport> {
        self.plan.validate().map_err(AppError::InvalidPlan)?;
        for (index, item) in items.iter().enumerate() {
            item.validate()
                .map_err(|reason| AppError::InvalidItem { index, reason })?;
        }

        let batch_index = NEXT_BATCH.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let mut report = BatchReport::new(items.len());
        info!("[批次 {}] 开始处理 {} 个条目", batch_index, items.len());

        let mut keeper = SessionKeeper::new(self.adapter.as_ref(), policy);
        if let Err(e) = keeper.open().await {
            error!("[批次 {}] ❌ 无法打开会话: {}", batch_index, e);
            fail_remaining(&mut report, items, 0, CutoffReason::SessionLost, &e.to_string());
            report.finish(started.elapsed());
            return Ok(report);
        }

        let flow = ItemFlow {
            adapter: self.adapter.as_ref(),
            resolver: self.resolver.as_ref(),
            classifier: &self.classifier,
            cache: &self.cache,
            monitor: self.monitor.as_ref(),
            arbiter: &self.arbiter,
            plan: &self.plan,
            retry: &self.retry,
            max_wait: self.max_wait,
        };

        for (index, item) in items.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                warn!(
                    "[批次 {}] 🛑 已取消，剩余 {} 个条目未处理",
                    batch_index,
                    items.len() - index
                );
                report.set_cutoff(index, CutoffReason::Cancelled);
                break;
            }

            if index > 0 {
                sleep(policy.settle()).await;
                self.monitor.mark_activity();
                if let Err(e) = keeper.ensure_open().await {
                    fail_remaining(&mut report, items, index, CutoffReason::SessionLost, &e.to_string());
                    break;
                }
            }

            let ctx = ItemCtx::new(batch_index, index, items.len(), item.label.as_str());
            let run = flow.run(item, &ctx, &mut keeper).await;
            let diagnostic = run.result.diagnostic.clone().unwrap_or_default();
            report.push(run.result);

            if let Some(reason) = run.cutoff {
                report.set_cutoff(index, reason);
                fail_remaining(&mut report, items, index + 1, reason, &diagnostic);
                break;
            }
        }

        if policy.close_on_finish {
            keeper.close().await;
        }
        StrategyCache::lock(&self.cache).reorder();

        report.finish(started.elapsed());
        info!(
            "[批次 {}] 完成: 成功 {} / 跳过 {} / 失败 {}，耗时 {} ms",
            batch_index, report.succeeded, report.skipped, report.failed, report.duration_ms
        );
        Ok(report)
    }
}

/// 从 `from` 开始的条目全部按批次级原因记为失败
fn fail_remaining(
    report: &mut BatchReport,
    items: &[Item],
    from: usize,
    reason: CutoffReason,
    detail: &str,
) {
    if report.cutoff.is_none() {
        report.set_cutoff(from, reason);
    }
    for (index, item) in items.iter().enumerate().skip(from) {
        let diagnostic = if detail.is_empty() {
            format!("批次终止: {}", reason)
        } else {
            format!("批次终止: {} ({})", reason, detail)
        };
        report.push(
            ItemResult::new(index, item.clone(), ItemOutcome::Error, 0, Duration::ZERO)
                .with_diagnostic(diagnostic),
        );
    }
}
