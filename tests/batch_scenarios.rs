//! 批次端到端场景：内存目标系统 + 暂停的 tokio 时钟

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use batch_register::config::SessionPolicy;
use batch_register::error::AdapterError;
use batch_register::models::{CutoffReason, ErrorCategory, Item, ItemOutcome, StrategySpec, TargetSignal};
use batch_register::resilience::BackoffPolicy;
use batch_register::services::StrategyCache;
use batch_register::{AppError, AvailabilityMonitor, BatchCancellation, ConcurrencyArbiter};
use tokio::time::{self, Instant};

use common::{items, transient, Harness, InFlight, Scripted, ScriptedAdapter, ScriptedProber, SUBMIT_SPEC};

fn policy() -> SessionPolicy {
    SessionPolicy::default()
}

#[tokio::test(start_paused = true)]
async fn test_all_items_succeed_in_input_order() {
    let h = Harness::new(ScriptedAdapter::new(), ScriptedProber::new(&[], true));
    let batch = items(&["张三", "李四", "王五"]);

    let report = tokio_test::assert_ok!(h.orchestrator.run_batch(&batch, &policy()).await);

    assert_eq!(report.total, 3);
    assert_eq!((report.succeeded, report.skipped, report.failed), (3, 0, 0));
    assert!(report.is_complete());
    let labels: Vec<&str> = report.results.iter().map(|r| r.item.label.as_str()).collect();
    assert_eq!(labels, vec!["张三", "李四", "王五"]);
    assert!(report.results.iter().all(|r| r.attempts == 1));
    assert_eq!(h.adapter.count_calls("open"), 1, "批次内复用同一个会话");
    assert_eq!(h.adapter.count_calls("select 学生"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_is_skipped_not_failed() {
    let h = Harness::new(
        ScriptedAdapter::new().with_registered(&["李四"]),
        ScriptedProber::new(&[], true),
    );
    let batch = items(&["张三", "李四", "王五"]);

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert_eq!((report.succeeded, report.skipped, report.failed), (2, 1, 0));
    assert_eq!(report.results[1].outcome, ItemOutcome::Duplicate);
    assert_eq!(report.results[1].attempts, 1);
    assert_eq!(report.results[1].category, Some(ErrorCategory::Duplicate));

    // 重复不是可用性问题
    assert_eq!(h.prober.calls(), 0);
    assert_eq!(h.monitor.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_until_success() {
    let h = Harness::new(
        ScriptedAdapter::new().with_script([transient(), transient()]),
        ScriptedProber::new(&[], true),
    );
    let batch = items(&["张三", "李四"]);
    let start = Instant::now();

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert_eq!(report.results[0].outcome, ItemOutcome::Success);
    assert_eq!(report.results[0].attempts, 3);
    assert_eq!(report.results[1].attempts, 1);
    assert_eq!(h.adapter.submits(), 4);
    // 两次重试分别退避 10s、13s，每次重试前都重新探测
    assert!(report.results[0].elapsed_ms >= 23_000);
    assert!(start.elapsed() >= Duration::from_secs(23));
    assert_eq!(h.prober.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_submit_times_out_each_attempt() {
    let h = Harness::new(
        ScriptedAdapter::new()
            .with_submit_delay(Duration::from_secs(45), Arc::new(InFlight::default())),
        ScriptedProber::new(&[], true),
    );

    let report = h.orchestrator.run_batch(&items(&["张三"]), &policy()).await.unwrap();

    let hung = &report.results[0];
    assert_eq!(hung.outcome, ItemOutcome::Error);
    assert_eq!(hung.attempts, 3);
    assert_eq!(hung.category, Some(ErrorCategory::Transient));
    let diagnostic = hung.diagnostic.as_deref().unwrap_or_default();
    assert!(diagnostic.contains("读取提交结果超过 30s"), "{}", diagnostic);
    // 三次 30s 超时加两次退避
    assert!(hung.elapsed_ms >= 113_000);
    assert!(report.cutoff.is_none());
    assert_eq!(h.adapter.submits(), 0, "超时的提交没有读到结果");
}

#[tokio::test(start_paused = true)]
async fn test_item_timeout_across_retries_fails_item_only() {
    let mut engine = common::engine_config();
    engine.retry.retry_budget = 5;
    engine.retry.item_timeout_ms = 20_000;
    let h = Harness::with_engine(
        ScriptedAdapter::new().with_script([transient()]),
        ScriptedProber::new(&[false], true),
        &engine,
    );
    let batch = items(&["张三", "李四"]);

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    // 等待恢复 13s + 重试退避 10s，越过 20s 的条目上限
    let first = &report.results[0];
    assert_eq!(first.outcome, ItemOutcome::Error);
    assert_eq!(first.attempts, 1);
    let diagnostic = first.diagnostic.as_deref().unwrap_or_default();
    assert!(diagnostic.starts_with("条目累计超时"), "{}", diagnostic);
    assert!(diagnostic.contains("503"), "{}", diagnostic);
    assert!(first.elapsed_ms >= 23_000);

    assert_eq!(report.results[1].outcome, ItemOutcome::Success);
    assert!(report.cutoff.is_none());
    assert_eq!(h.prober.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_budget_exhausted_fails_item_only() {
    let h = Harness::new(
        ScriptedAdapter::new().with_script([
            Scripted::Fault(AdapterError::Disconnected("连接被重置".into())),
            transient(),
            transient(),
        ]),
        ScriptedProber::new(&[], true),
    );
    let batch = items(&["张三", "李四"]);

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    let first = &report.results[0];
    assert_eq!(first.outcome, ItemOutcome::Error);
    assert_eq!(first.attempts, 3);
    assert_eq!(first.category, Some(ErrorCategory::Transient));
    assert_eq!(report.results[1].outcome, ItemOutcome::Success);
    assert!(report.cutoff.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_failures_use_smaller_budget() {
    let unknown = || Scripted::Signal(TargetSignal::ok().with_status(400).with_error("表单校验未通过"));
    let h = Harness::new(
        ScriptedAdapter::new().with_script([unknown(), unknown(), unknown()]),
        ScriptedProber::new(&[], true),
    );

    let report = h.orchestrator.run_batch(&items(&["张三"]), &policy()).await.unwrap();

    assert_eq!(report.results[0].outcome, ItemOutcome::Error);
    assert_eq!(report.results[0].attempts, 2);
    assert_eq!(report.results[0].category, Some(ErrorCategory::Unknown));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_item_does_not_stop_batch() {
    let h = Harness::new(ScriptedAdapter::new(), ScriptedProber::new(&[], true));
    let batch = vec![
        Item::new("张三").with_role("学生"),
        Item::new("李四").with_role("访客"),
        Item::new("王五").with_role("教师"),
    ];

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert_eq!((report.succeeded, report.skipped, report.failed), (2, 0, 1));
    let fatal = &report.results[1];
    assert_eq!(fatal.category, Some(ErrorCategory::Fatal));
    assert_eq!(fatal.attempts, 1, "契约违反不重试");
    assert!(fatal.diagnostic.as_deref().unwrap_or_default().contains("访客"));
    assert_eq!(h.adapter.submits(), 2, "没有匹配选项的条目不会提交");
}

#[tokio::test(start_paused = true)]
async fn test_replaying_a_batch_skips_everything() {
    let h = Harness::new(ScriptedAdapter::new(), ScriptedProber::new(&[], true));
    let batch = items(&["张三", "李四", "王五"]);

    let first = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();
    assert_eq!(first.succeeded, 3);

    let replay = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();
    assert_eq!((replay.succeeded, replay.skipped, replay.failed), (0, 3, 0));
    assert_eq!(h.adapter.registered().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_cuts_off_remaining_items() {
    let h = Harness::new(
        ScriptedAdapter::new().kill_after_submits(1),
        ScriptedProber::new(&[], true),
    );
    let batch = items(&["张三", "李四", "王五"]);

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[0].outcome, ItemOutcome::Success);
    assert!(report.results[1..]
        .iter()
        .all(|r| r.outcome == ItemOutcome::Error && r.attempts == 0));
    let cutoff = report.cutoff.expect("批次应提前终止");
    assert_eq!(cutoff.reason, CutoffReason::SessionLost);
    assert_eq!(report.resume_index(), Some(1));
    assert_eq!(h.adapter.submits(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_that_never_opens_fails_whole_batch() {
    let h = Harness::new(ScriptedAdapter::new().failing_open(), ScriptedProber::new(&[], true));

    let report = h.orchestrator.run_batch(&items(&["张三", "李四"]), &policy()).await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.resume_index(), Some(0));
    assert_eq!(h.adapter.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_target_cuts_off_after_max_wait() {
    let h = Harness::new(
        ScriptedAdapter::new().with_script([transient()]),
        ScriptedProber::new(&[], false),
    );
    let batch = items(&["张三", "李四"]);
    let start = Instant::now();

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(60));
    let cutoff = report.cutoff.unwrap();
    assert_eq!(cutoff.reason, CutoffReason::TargetUnavailable);
    assert_eq!(cutoff.index, 0);
    assert_eq!(report.results[0].attempts, 1);
    assert_eq!(report.results[1].attempts, 0);
    assert_eq!(report.failed, 2);
    assert!(h.monitor.consecutive_failures() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_between_items() {
    let cancellation = BatchCancellation::new();
    let mut h = Harness::new(
        ScriptedAdapter::new().cancel_after_submits(1, cancellation.clone()),
        ScriptedProber::new(&[], true),
    );
    h.orchestrator = h.orchestrator.with_cancellation(cancellation);
    let batch = items(&["张三", "李四", "王五"]);

    let report = h.orchestrator.run_batch(&batch, &policy()).await.unwrap();

    assert_eq!(report.results.len(), 1, "进行中的条目完成，其余不记录");
    assert_eq!(report.results[0].outcome, ItemOutcome::Success);
    let cutoff = report.cutoff.unwrap();
    assert_eq!((cutoff.index, cutoff.reason), (1, CutoffReason::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_working_strategy_is_learned() {
    let h = Harness::new(
        ScriptedAdapter::new().with_missing(SUBMIT_SPEC),
        ScriptedProber::new(&[], true),
    );

    let report = h
        .orchestrator
        .run_batch(&items(&["张三", "李四", "王五"]), &policy())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(h.adapter.count_calls(&format!("locate {}", SUBMIT_SPEC)), 1);
    let ranked = StrategyCache::lock(h.orchestrator.cache()).ranked("submit");
    assert_eq!(ranked.first(), Some(&StrategySpec::text("提交")));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_item_rejects_batch_before_any_work() {
    let h = Harness::new(ScriptedAdapter::new(), ScriptedProber::new(&[], true));
    let batch = vec![Item::new("张三"), Item::new("   ")];

    let err = h.orchestrator.run_batch(&batch, &policy()).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidItem { index: 1, .. }));
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shared_arbiter_serializes_submits_across_batches() {
    let arbiter = ConcurrencyArbiter::new(1, Duration::from_secs(300));
    let in_flight = Arc::new(InFlight::default());
    let a = Harness::with_arbiter(
        ScriptedAdapter::new().with_submit_delay(Duration::from_secs(1), in_flight.clone()),
        ScriptedProber::new(&[], true),
        arbiter.clone(),
    );
    let b = Harness::with_arbiter(
        ScriptedAdapter::new().with_submit_delay(Duration::from_secs(1), in_flight.clone()),
        ScriptedProber::new(&[], true),
        arbiter.clone(),
    );

    let first = items(&["张三", "李四"]);
    let second = items(&["王五", "赵六"]);
    let policy_a = policy();
    let policy_b = policy();
    let (ra, rb) = tokio::join!(
        a.orchestrator.run_batch(&first, &policy_a),
        b.orchestrator.run_batch(&second, &policy_b),
    );

    assert_eq!(ra.unwrap().succeeded, 2);
    assert_eq!(rb.unwrap().succeeded, 2);
    assert_eq!(in_flight.max.load(Ordering::SeqCst), 1);
    assert_eq!(arbiter.active_slots(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_only_after_both_backoff_sleeps() {
    let prober = ScriptedProber::new(&[false, false], true);
    let monitor = Arc::new(AvailabilityMonitor::with_policy(
        prober.clone(),
        ConcurrencyArbiter::new(1, Duration::from_secs(300)),
        BackoffPolicy::new(Duration::from_secs(10), 1.3, Duration::from_secs(120)),
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));

    let start = Instant::now();
    let waiter = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.wait_for_availability(Duration::from_secs(600)).await })
    };

    // 第一次休眠 13s、第二次 16.9s
    time::sleep(Duration::from_secs(29)).await;
    assert!(!waiter.is_finished());

    assert!(waiter.await.unwrap());
    assert!(start.elapsed() >= Duration::from_millis(29_800));
    assert_eq!(prober.calls(), 3);
    assert_eq!(monitor.consecutive_failures(), 0);
}
