//! 条目处理流程 - 流程层
//!
//! 核心职责：定义"一个条目"的完整处理流程
//!
//! 状态机：
//!
//! ```text
//! Pending → Selecting → Submitting → Classifying → { Succeeded | Skipped | RetryPending | Failed }
//!                ↑                                        │
//!                └──── 可用性检查 + 退避 + 会话确认 ─────┘
//! ```
//!
//! - Selecting：按"缓存提示 → 缓存排名 → 表单计划"的顺序尝试定位策略，成功的写回缓存
//! - Submitting：唯一的高风险步骤，经过仲裁器
//! - Classifying：交给分类器，重复 → 跳过，致命 → 失败，瞬时/未知 → 预算内重试

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::AdapterError;
use crate::infrastructure::{Action, ActionResult, ControlHandle, SessionHandle, TargetAdapter};
use crate::models::{
    ContractViolation, ControlStep, CutoffReason, ErrorCategory, ErrorClassification,
    FailureSignal, FormPlan, Item, ItemOutcome, ItemResult, StepAction, StrategySpec, TargetSignal,
};
use crate::resilience::{AvailabilityMonitor, ConcurrencyArbiter, Priority};
use crate::services::{ErrorClassifier, NameResolver, SharedStrategyCache, StrategyCache, Verdict};
use crate::utils::logging;
use crate::workflow::{ItemCtx, SessionKeeper};

/// 条目所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    Pending,
    Selecting,
    Submitting,
    Classifying,
    RetryPending,
    Succeeded,
    Skipped,
    Failed,
}

/// 一个条目的处理结果
///
/// `cutoff` 不为空表示批次必须在这里终止（会话丢失、目标长时间不可用）。
#[derive(Debug, Clone)]
pub struct ItemRun {
    pub result: ItemResult,
    pub cutoff: Option<CutoffReason>,
}

/// 条目处理流程
///
/// - 编排单个条目的选择、提交、分类与重试
/// - 不持有任何资源，依赖全部以引用注入
pub struct ItemFlow<'a> {
    pub adapter: &'a dyn TargetAdapter,
    pub resolver: &'a dyn NameResolver,
    pub classifier: &'a ErrorClassifier,
    pub cache: &'a SharedStrategyCache,
    pub monitor: &'a AvailabilityMonitor,
    pub arbiter: &'a ConcurrencyArbiter,
    pub plan: &'a FormPlan,
    pub retry: &'a RetryConfig,
    /// 必须重试时等待目标恢复的上限
    pub max_wait: Duration,
}

impl ItemFlow<'_> {
    pub async fn run(
        &self,
        item: &Item,
        ctx: &ItemCtx,
        keeper: &mut SessionKeeper<'_>,
    ) -> ItemRun {
        let started = Instant::now();
        let deadline = started + self.retry.item_timeout();
        let mut attempts: u32 = 0;
        let mut last: Option<ErrorClassification> = None;

        logging::log_item_start(ctx);
        self.enter(ctx, ItemPhase::Pending);

        loop {
            if attempts > 0 && Instant::now() >= deadline {
                warn!("{} ⏱️ 条目累计超时 ({:?})", ctx, self.retry.item_timeout());
                self.enter(ctx, ItemPhase::Failed);
                let diagnostic = format!(
                    "条目累计超时 ({:?}); 最后错误: {}",
                    self.retry.item_timeout(),
                    describe(last.as_ref())
                );
                return ItemRun::done(
                    conclude(ctx, item, ItemOutcome::Error, attempts, started, last.as_ref())
                        .with_diagnostic(diagnostic),
                );
            }

            let Some(session) = keeper.current().cloned() else {
                return self.cut_off(ctx, item, attempts, started, last.as_ref(), CutoffReason::SessionLost);
            };

            attempts += 1;
            if attempts > 1 {
                info!("{} 🔄 第 {} 次尝试", ctx, attempts);
            }

            let classification = match self.attempt(item, ctx, &session).await {
                Verdict::Succeeded => {
                    self.enter(ctx, ItemPhase::Succeeded);
                    info!("{} ✅ 注册成功 (第 {} 次尝试)", ctx, attempts);
                    return ItemRun::done(conclude(
                        ctx,
                        item,
                        ItemOutcome::Success,
                        attempts,
                        started,
                        None,
                    ));
                }
                Verdict::Failed(classification) => classification,
            };

            match classification.category {
                ErrorCategory::Duplicate => {
                    self.enter(ctx, ItemPhase::Skipped);
                    info!("{} ⏭️ 已存在，跳过: {}", ctx, classification.diagnostic);
                    return ItemRun::done(conclude(
                        ctx,
                        item,
                        ItemOutcome::Duplicate,
                        attempts,
                        started,
                        Some(&classification),
                    ));
                }
                ErrorCategory::Fatal => {
                    self.enter(ctx, ItemPhase::Failed);
                    error!("{} ❌ 致命错误，不重试: {}", ctx, classification.diagnostic);
                    return ItemRun::done(conclude(
                        ctx,
                        item,
                        ItemOutcome::Error,
                        attempts,
                        started,
                        Some(&classification),
                    ));
                }
                ErrorCategory::Transient | ErrorCategory::Unknown => {
                    let budget = self.budget_for(classification.category);
                    if attempts >= budget {
                        self.enter(ctx, ItemPhase::Failed);
                        error!(
                            "{} ❌ {}，已用完 {} 次尝试: {}",
                            ctx, classification.category, budget, classification.diagnostic
                        );
                        return ItemRun::done(conclude(
                            ctx,
                            item,
                            ItemOutcome::Error,
                            attempts,
                            started,
                            Some(&classification),
                        ));
                    }

                    self.enter(ctx, ItemPhase::RetryPending);
                    warn!(
                        "{} ⚠️ {} (第 {}/{} 次): {}",
                        ctx, classification.category, attempts, budget, classification.diagnostic
                    );
                    last = Some(classification);

                    // 先做一次真实探测，刚失败过的目标不信任缓存结果
                    if !self.monitor.wait_for_availability(self.max_wait).await {
                        return self.cut_off(
                            ctx,
                            item,
                            attempts,
                            started,
                            last.as_ref(),
                            CutoffReason::TargetUnavailable,
                        );
                    }

                    let policy = self.monitor.policy();
                    let delay = policy.jittered(policy.delay_for_attempt(attempts));
                    info!("{} ⏳ {:?} 后重试", ctx, delay);
                    time::sleep(delay).await;

                    if keeper.ensure_open().await.is_err() {
                        return self.cut_off(
                            ctx,
                            item,
                            attempts,
                            started,
                            last.as_ref(),
                            CutoffReason::SessionLost,
                        );
                    }
                }
            }
        }
    }

    /// 一次完整尝试：所有步骤 → 提交 → 解读
    async fn attempt(&self, item: &Item, ctx: &ItemCtx, session: &SessionHandle) -> Verdict {
        self.enter(ctx, ItemPhase::Selecting);
        for step in &self.plan.steps {
            if let Err(signal) = self.drive_step(item, ctx, session, step).await {
                return Verdict::Failed(self.classifier.classify(&signal));
            }
        }

        self.enter(ctx, ItemPhase::Submitting);
        let signal = match self.submit(ctx, session).await {
            Ok(signal) => FailureSignal::from(signal),
            Err(signal) => signal,
        };

        self.enter(ctx, ItemPhase::Classifying);
        self.classifier.interpret(&signal)
    }

    async fn drive_step(
        &self,
        item: &Item,
        ctx: &ItemCtx,
        session: &SessionHandle,
        step: &ControlStep,
    ) -> Result<(), FailureSignal> {
        let (control, spec) = self.resolve_control(ctx, session, step).await?;

        let action = match &step.action {
            StepAction::Click => Action::Click,
            StepAction::Fill { attribute } => {
                Action::Fill(required_attribute(item, step, attribute)?.to_string())
            }
            StepAction::Select { attribute } => {
                let wanted = required_attribute(item, step, attribute)?;
                let offered = match self
                    .call("列出选项", self.adapter.act(session, &control, &Action::ListOptions))
                    .await
                    .map_err(FailureSignal::from_fault)?
                {
                    ActionResult::Options(options) => options,
                    ActionResult::Done => Vec::new(),
                };

                let chosen = self
                    .resolver
                    .resolve(wanted, &item.attributes, &offered)
                    .map_err(|no_match| {
                        debug!("{} {}", ctx, no_match);
                        FailureSignal::from_violation(ContractViolation::NoMatchingOption {
                            control_id: step.control_id.clone(),
                            wanted: wanted.to_string(),
                        })
                    })?;
                debug!("{} {} 选择 '{}'", ctx, step.control_id, chosen);
                Action::Select(chosen)
            }
        };

        self.call("操作控件", self.adapter.act(session, &control, &action))
            .await
            .map_err(FailureSignal::from_fault)?;

        StrategyCache::lock(self.cache).record_success(&step.control_id, &spec);
        Ok(())
    }

    /// 提交（经过仲裁器），返回提交后观察到的信号
    async fn submit(
        &self,
        ctx: &ItemCtx,
        session: &SessionHandle,
    ) -> Result<TargetSignal, FailureSignal> {
        let step = &self.plan.submit;
        let (control, spec) = self.resolve_control(ctx, session, step).await?;

        info!("{} 📤 正在提交...", ctx);
        let operation_id = ctx.submit_operation_id(session.id());
        let outcome = self
            .arbiter
            .run(&operation_id, Priority::Normal, || async {
                self.call("提交", self.adapter.act(session, &control, &Action::Click))
                    .await?;
                self.call("读取提交结果", self.adapter.observe_signal(session))
                    .await
            })
            .await;

        match outcome {
            Ok(Ok(signal)) => {
                StrategyCache::lock(self.cache).record_success(&step.control_id, &spec);
                Ok(signal)
            }
            Ok(Err(fault)) => Err(FailureSignal::from_fault(fault)),
            // 槽位被回收按瞬时错误处理
            Err(e) => Err(FailureSignal::from_fault(AdapterError::Timeout(e.to_string()))),
        }
    }

    /// 按候选顺序定位控件
    async fn resolve_control(
        &self,
        ctx: &ItemCtx,
        session: &SessionHandle,
        step: &ControlStep,
    ) -> Result<(ControlHandle, StrategySpec), FailureSignal> {
        for spec in self.candidates(step) {
            match self.call("定位控件", self.adapter.locate(session, &spec)).await {
                Ok(control) => return Ok((control, spec)),
                Err(AdapterError::NotFound(_)) => {
                    debug!("{} {} 策略未命中: {}", ctx, step.control_id, spec);
                    StrategyCache::lock(self.cache).record_failure(&step.control_id, &spec);
                }
                Err(fault) => return Err(FailureSignal::from_fault(fault)),
            }
        }

        Err(FailureSignal::from_violation(
            ContractViolation::StrategiesExhausted {
                control_id: step.control_id.clone(),
            },
        ))
    }

    /// 候选策略：缓存提示 → 缓存排名 → 表单计划（去重，保持顺序）
    fn candidates(&self, step: &ControlStep) -> Vec<StrategySpec> {
        let (hint, ranked) = {
            let mut cache = StrategyCache::lock(self.cache);
            let hint = cache.get(&step.control_id).map(|strategy| strategy.spec);
            (hint, cache.ranked(&step.control_id))
        };

        let mut candidates: Vec<StrategySpec> = Vec::new();
        for spec in hint
            .into_iter()
            .chain(ranked)
            .chain(step.strategies.iter().cloned())
        {
            if !candidates.contains(&spec) {
                candidates.push(spec);
            }
        }
        candidates
    }

    /// 尝试次数上限（含第一次）
    fn budget_for(&self, category: ErrorCategory) -> u32 {
        match category {
            ErrorCategory::Unknown => self
                .retry
                .unknown_retry_budget
                .min(self.retry.retry_budget)
                .max(1),
            _ => self.retry.retry_budget.max(1),
        }
    }

    /// 单次适配器调用超时
    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, AdapterError> {
        let limit = self.retry.attempt_timeout();
        match time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(format!("{}超过 {:?}", what, limit))),
        }
    }

    fn cut_off(
        &self,
        ctx: &ItemCtx,
        item: &Item,
        attempts: u32,
        started: Instant,
        last: Option<&ErrorClassification>,
        reason: CutoffReason,
    ) -> ItemRun {
        self.enter(ctx, ItemPhase::Failed);
        error!("{} ❌ {}，批次将在此终止", ctx, reason);
        let diagnostic = format!("{}; 最后错误: {}", reason, describe(last));
        ItemRun {
            result: conclude(ctx, item, ItemOutcome::Error, attempts, started, last)
                .with_diagnostic(diagnostic),
            cutoff: Some(reason),
        }
    }

    fn enter(&self, ctx: &ItemCtx, phase: ItemPhase) {
        debug!("{} → {:?}", ctx, phase);
    }
}

impl ItemRun {
    fn done(result: ItemResult) -> Self {
        Self {
            result,
            cutoff: None,
        }
    }
}

fn required_attribute<'i>(
    item: &'i Item,
    step: &ControlStep,
    attribute: &str,
) -> Result<&'i str, FailureSignal> {
    item.attribute(attribute).ok_or_else(|| {
        FailureSignal::from_violation(ContractViolation::MissingAttribute {
            control_id: step.control_id.clone(),
            attribute: attribute.to_string(),
        })
    })
}

fn conclude(
    ctx: &ItemCtx,
    item: &Item,
    outcome: ItemOutcome,
    attempts: u32,
    started: Instant,
    classification: Option<&ErrorClassification>,
) -> ItemResult {
    let result = ItemResult::new(ctx.index, item.clone(), outcome, attempts, started.elapsed());
    match classification {
        Some(c) => result
            .with_category(c.category)
            .with_diagnostic(c.diagnostic.clone()),
        None => result,
    }
}

fn describe(last: Option<&ErrorClassification>) -> String {
    last.map(|c| format!("{} ({})", c.diagnostic, c.category))
        .unwrap_or_else(|| "无".to_string())
}
