//! 集成测试共用的内存目标系统
//!
//! `ScriptedAdapter` 模拟一个最小的注册表单：
//! - 填写 `name` 控件时记下当前标签
//! - 提交后先按脚本返回信号或异常，脚本用完则按"标签是否已注册"返回成功或重复提示

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batch_register::config::{BackoffConfig, EngineConfig};
use batch_register::error::AdapterError;
use batch_register::infrastructure::{Action, ActionResult, ControlHandle, SessionHandle};
use batch_register::models::{
    BannerLevel, ControlStep, FormPlan, Item, StepAction, StrategySpec, TargetSignal,
};
use batch_register::resilience::Prober;
use batch_register::{
    AvailabilityMonitor, BatchCancellation, BatchOrchestrator, ConcurrencyArbiter, TargetAdapter,
};

/// 会话 id 在整个测试进程内唯一
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub const NAME_SPEC: &str = "css=#name";
pub const ROLE_SPEC: &str = "label=角色";
pub const SUBMIT_SPEC: &str = "css=button[type=submit]";

/// 提交后的脚本化响应
#[derive(Debug, Clone)]
pub enum Scripted {
    Signal(TargetSignal),
    Fault(AdapterError),
}

pub fn transient() -> Scripted {
    Scripted::Signal(TargetSignal::ok().with_status(503))
}

pub fn duplicate_banner() -> TargetSignal {
    TargetSignal::with_banner("该用户已存在", BannerLevel::Warning)
}

/// 提交期间的并发观测（多个适配器共享）
#[derive(Debug, Default)]
pub struct InFlight {
    pub current: AtomicUsize,
    pub max: AtomicUsize,
}

#[derive(Default)]
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Scripted>>,
    registered: Mutex<HashSet<String>>,
    current_label: Mutex<Option<String>>,
    missing: HashSet<String>,
    options: Vec<String>,
    calls: Mutex<Vec<String>>,
    submits: AtomicUsize,
    fail_open: AtomicBool,
    alive: AtomicBool,
    /// 第 n 次提交之后会话失效且无法重新打开
    kill_after_submits: Option<usize>,
    /// 第 n 次提交之后请求取消
    cancel_after_submits: Option<(usize, BatchCancellation)>,
    submit_delay: Duration,
    in_flight: Option<Arc<InFlight>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            options: vec!["学生".to_string(), "教师".to_string(), "管理员".to_string()],
            ..Self::default()
        }
    }

    pub fn with_script(self, script: impl IntoIterator<Item = Scripted>) -> Self {
        *self.script.lock().unwrap() = script.into_iter().collect();
        self
    }

    pub fn with_registered(self, labels: &[&str]) -> Self {
        self.registered
            .lock()
            .unwrap()
            .extend(labels.iter().map(|l| l.to_string()));
        self
    }

    pub fn with_missing(mut self, spec: &str) -> Self {
        self.missing.insert(spec.to_string());
        self
    }

    pub fn failing_open(self) -> Self {
        self.fail_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn kill_after_submits(mut self, n: usize) -> Self {
        self.kill_after_submits = Some(n);
        self
    }

    pub fn cancel_after_submits(mut self, n: usize, cancellation: BatchCancellation) -> Self {
        self.cancel_after_submits = Some((n, cancellation));
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration, in_flight: Arc<InFlight>) -> Self {
        self.submit_delay = delay;
        self.in_flight = Some(in_flight);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> HashSet<String> {
        self.registered.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl TargetAdapter for ScriptedAdapter {
    async fn open_session(&self) -> Result<SessionHandle, AdapterError> {
        self.log("open");
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AdapterError::SessionOpen("目标拒绝连接".to_string()));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(SessionHandle::new(NEXT_SESSION.fetch_add(1, Ordering::SeqCst)))
    }

    async fn is_session_open(&self, _session: &SessionHandle) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn locate(
        &self,
        _session: &SessionHandle,
        spec: &StrategySpec,
    ) -> Result<ControlHandle, AdapterError> {
        let spec = spec.to_string();
        self.log(format!("locate {}", spec));
        if self.missing.contains(&spec) {
            return Err(AdapterError::NotFound(spec));
        }
        Ok(ControlHandle::new(spec))
    }

    async fn act(
        &self,
        _session: &SessionHandle,
        _control: &ControlHandle,
        action: &Action,
    ) -> Result<ActionResult, AdapterError> {
        match action {
            Action::ListOptions => return Ok(ActionResult::Options(self.options.clone())),
            Action::Fill(text) => {
                *self.current_label.lock().unwrap() = Some(text.clone());
            }
            Action::Select(option) => self.log(format!("select {}", option)),
            _ => {}
        }
        Ok(ActionResult::Done)
    }

    async fn observe_signal(&self, _session: &SessionHandle) -> Result<TargetSignal, AdapterError> {
        if let Some(in_flight) = &self.in_flight {
            let now = in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
            in_flight.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.submit_delay).await;
            in_flight.current.fetch_sub(1, Ordering::SeqCst);
        }

        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        self.log("submit");

        if self.kill_after_submits == Some(n) {
            self.alive.store(false, Ordering::SeqCst);
            self.fail_open.store(true, Ordering::SeqCst);
        }
        if let Some((after, cancellation)) = &self.cancel_after_submits {
            if *after == n {
                cancellation.cancel();
            }
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted::Signal(signal)) => Ok(signal),
            Some(Scripted::Fault(fault)) => Err(fault),
            None => {
                let label = self.current_label.lock().unwrap().clone().unwrap_or_default();
                if self.registered.lock().unwrap().insert(label) {
                    Ok(TargetSignal::with_banner("注册成功", BannerLevel::Success))
                } else {
                    Ok(duplicate_banner())
                }
            }
        }
    }

    async fn close_session(&self, _session: &SessionHandle) {
        self.log("close");
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// 按脚本返回结果，脚本用完后一直返回 `fallback`
pub struct ScriptedProber {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(script: &[bool], fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// 姓名 → 角色 → 提交
pub fn registration_plan() -> FormPlan {
    FormPlan::new(
        vec![
            ControlStep::new(
                "name",
                vec![NAME_SPEC.parse().unwrap()],
                StepAction::Fill {
                    attribute: "label".into(),
                },
            ),
            ControlStep::new(
                "role",
                vec![ROLE_SPEC.parse().unwrap()],
                StepAction::Select {
                    attribute: "role".into(),
                },
            ),
        ],
        ControlStep::new(
            "submit",
            vec![SUBMIT_SPEC.parse().unwrap(), StrategySpec::text("提交")],
            StepAction::Click,
        ),
    )
}

/// 无抖动、短等待的引擎参数
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        backoff: BackoffConfig {
            jitter_ratio: 0.0,
            max_wait_ms: 60_000,
            ..BackoffConfig::default()
        },
        ..EngineConfig::default()
    }
}

pub fn items(labels: &[&str]) -> Vec<Item> {
    labels
        .iter()
        .map(|label| Item::new(*label).with_role("学生"))
        .collect()
}

pub struct Harness {
    pub adapter: Arc<ScriptedAdapter>,
    pub prober: Arc<ScriptedProber>,
    pub arbiter: ConcurrencyArbiter,
    pub monitor: Arc<AvailabilityMonitor>,
    pub orchestrator: BatchOrchestrator,
}

impl Harness {
    pub fn new(adapter: ScriptedAdapter, prober: Arc<ScriptedProber>) -> Self {
        Self::with_arbiter(adapter, prober, ConcurrencyArbiter::new(1, Duration::from_secs(300)))
    }

    pub fn with_arbiter(
        adapter: ScriptedAdapter,
        prober: Arc<ScriptedProber>,
        arbiter: ConcurrencyArbiter,
    ) -> Self {
        Self::build(adapter, prober, arbiter, &engine_config())
    }

    pub fn with_engine(
        adapter: ScriptedAdapter,
        prober: Arc<ScriptedProber>,
        engine: &EngineConfig,
    ) -> Self {
        let arbiter = ConcurrencyArbiter::new(
            engine.arbiter.max_concurrent_operations,
            engine.arbiter.slot_timeout(),
        );
        Self::build(adapter, prober, arbiter, engine)
    }

    fn build(
        adapter: ScriptedAdapter,
        prober: Arc<ScriptedProber>,
        arbiter: ConcurrencyArbiter,
        engine: &EngineConfig,
    ) -> Self {
        let adapter = Arc::new(adapter);
        let monitor = Arc::new(AvailabilityMonitor::new(
            prober.clone(),
            arbiter.clone(),
            &engine.backoff,
        ));
        let orchestrator = BatchOrchestrator::new(
            adapter.clone(),
            arbiter.clone(),
            monitor.clone(),
            registration_plan(),
            engine,
        );
        Self {
            adapter,
            prober,
            arbiter,
            monitor,
            orchestrator,
        }
    }
}
