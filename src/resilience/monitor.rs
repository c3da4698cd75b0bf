//! 可用性监视器与退避控制
//!
//! - `check_availability`：节流后的探测，间隔内直接返回缓存结果
//! - `wait_for_availability`：探测 → 不可用则按当前退避休眠 → 再探测，直到可用或超时
//! - `mark_activity`：刷新空闲时钟
//!
//! 探测本身也是高风险操作，统一走仲裁器（同 id 单飞，多个条目同时失败也只探测一次）。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::BackoffConfig;
use crate::resilience::{
    BackoffPolicy, ConcurrencyArbiter, Priority, Prober, ResilienceSnapshot, ResilienceState,
};

/// 探测在仲裁器里的操作 id
pub const PROBE_OPERATION_ID: &str = "availability-probe";

/// 可用性监视器
pub struct AvailabilityMonitor {
    prober: Arc<dyn Prober>,
    arbiter: ConcurrencyArbiter,
    policy: BackoffPolicy,
    probe_interval: Duration,
    probe_timeout: Duration,
    state: Mutex<ResilienceState>,
    last_activity: Mutex<Instant>,
}

impl AvailabilityMonitor {
    pub fn new(prober: Arc<dyn Prober>, arbiter: ConcurrencyArbiter, config: &BackoffConfig) -> Self {
        Self::with_policy(
            prober,
            arbiter,
            BackoffPolicy::from_config(config),
            config.probe_interval(),
            config.probe_timeout(),
        )
    }

    pub fn with_policy(
        prober: Arc<dyn Prober>,
        arbiter: ConcurrencyArbiter,
        policy: BackoffPolicy,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let state = ResilienceState::new(&policy);
        Self {
            prober,
            arbiter,
            policy,
            probe_interval,
            probe_timeout,
            state: Mutex::new(state),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ResilienceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 检查目标是否可用
    ///
    /// `force = false` 时，距上次真实探测不足一个间隔就直接返回缓存结果。
    pub async fn check_availability(&self, force: bool) -> bool {
        if !force {
            let state = self.lock_state();
            if let Some(at) = state.last_checked_at {
                if at.elapsed() < self.probe_interval {
                    return state.is_target_available;
                }
            }
        }

        match self
            .arbiter
            .run(PROBE_OPERATION_ID, Priority::High, || self.probe_once())
            .await
        {
            Ok(available) => available,
            Err(e) => {
                warn!("⚠️ 可用性探测未完成: {}", e);
                self.lock_state()
                    .record_probe(false, &self.policy, Instant::now());
                false
            }
        }
    }

    async fn probe_once(&self) -> bool {
        let available = match time::timeout(self.probe_timeout, self.prober.probe()).await {
            Ok(available) => available,
            Err(_) => {
                debug!("可用性探测超时 ({:?})", self.probe_timeout);
                false
            }
        };

        let mut state = self.lock_state();
        state.record_probe(available, &self.policy, Instant::now());
        if available {
            debug!("✓ 目标可用");
        } else {
            warn!(
                "⚠️ 目标不可用，连续失败 {} 次，当前退避 {:?}",
                state.consecutive_failures, state.current_backoff
            );
        }
        available
    }

    /// 等待目标恢复
    ///
    /// 在 `max_wait` 内恢复返回 `true`，否则 `false`。
    pub async fn wait_for_availability(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.check_availability(true).await {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("❌ 等待目标恢复超时 ({:?})", max_wait);
                return false;
            }

            let delay = self
                .policy
                .jittered(self.current_backoff())
                .min(deadline - now);
            info!("⏳ 目标不可用，{:?} 后重新探测", delay);
            time::sleep(delay).await;
        }
    }

    /// 刷新空闲时钟
    pub fn mark_activity(&self) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Instant::now();
    }

    /// 距上次活动的时长
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }

    pub fn is_available(&self) -> bool {
        self.lock_state().is_target_available
    }

    pub fn current_backoff(&self) -> Duration {
        self.lock_state().current_backoff
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_state().consecutive_failures
    }

    pub fn state(&self) -> ResilienceState {
        self.lock_state().clone()
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        self.lock_state().snapshot()
    }

    pub fn restore(&self, snapshot: &ResilienceSnapshot) {
        self.lock_state().restore(snapshot, &self.policy);
    }
}
