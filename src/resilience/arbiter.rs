//! 并发仲裁器
//!
//! 进程内唯一的"高风险操作"闸门（提交、可用性探测）：
//!
//! - 同时持有的槽位数不超过 `max_slots`（目标系统不支持并发会话，默认 1）
//! - 槽位满时按优先级排队（High > Normal > Low），同一优先级内先进先出
//! - 每个槽位带硬时限，超时后强制回收，持有者的操作按失败处理
//! - 同一个 `operation_id` 同时只执行一次，后来者等待并共享结果
//!
//! 仲裁器由入口显式创建，克隆后传给需要它的组件（内部是 `Arc`）。

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::ArbiterConfig;
use crate::error::ArbiterError;

/// 排队优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// 队列下标，0 最先出队
    fn rank(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

type SharedOutcome = Arc<dyn Any + Send + Sync>;

struct Waiter {
    operation_id: String,
    tx: oneshot::Sender<ConcurrencySlot>,
}

struct ActiveSlot {
    operation_id: String,
    deadline: Instant,
}

struct InFlight {
    flight_id: u64,
    rx: watch::Receiver<Option<SharedOutcome>>,
}

#[derive(Default)]
struct ArbiterState {
    active: HashMap<u64, ActiveSlot>,
    queues: [VecDeque<Waiter>; 3],
    in_flight: HashMap<String, InFlight>,
    next_id: u64,
    reclaimed_total: u64,
}

impl ArbiterState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

struct ArbiterInner {
    max_slots: usize,
    slot_timeout: Duration,
    state: Mutex<ArbiterState>,
}

impl ArbiterInner {
    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn grant(self: &Arc<Self>, state: &mut ArbiterState, operation_id: &str) -> ConcurrencySlot {
        let id = state.next_id();
        let deadline = Instant::now() + self.slot_timeout;
        state.active.insert(
            id,
            ActiveSlot {
                operation_id: operation_id.to_string(),
                deadline,
            },
        );
        debug!("🔒 授予槽位 #{} 给 {}", id, operation_id);
        ConcurrencySlot {
            id,
            operation_id: operation_id.to_string(),
            deadline,
            inner: Some(Arc::clone(self)),
        }
    }

    /// 回收所有超过时限的槽位
    fn reap_expired(&self, state: &mut ArbiterState, now: Instant) {
        let expired: Vec<u64> = state
            .active
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(slot) = state.active.remove(&id) {
                state.reclaimed_total += 1;
                warn!(
                    "⏱️ 槽位 #{} ({}) 超过时限 {:?}，强制回收",
                    id, slot.operation_id, self.slot_timeout
                );
            }
        }
    }

    /// 把空出的槽位交给排队者
    fn dispatch(self: &Arc<Self>, state: &mut ArbiterState) {
        self.reap_expired(state, Instant::now());
        while state.active.len() < self.max_slots {
            let Some(waiter) = state.queues.iter_mut().find_map(VecDeque::pop_front) else {
                break;
            };
            let slot = self.grant(state, &waiter.operation_id);
            if let Err(slot) = waiter.tx.send(slot) {
                // 排队者已经放弃，槽位原地收回（不能走 Drop，锁还在手里）
                let id = slot.disarm();
                state.active.remove(&id);
            }
        }
    }

    fn release(self: &Arc<Self>, id: u64) {
        let mut state = self.lock();
        if state.active.remove(&id).is_some() {
            debug!("🔓 释放槽位 #{}", id);
        }
        self.dispatch(&mut state);
    }

    fn reclaim(self: &Arc<Self>, id: u64) {
        let mut state = self.lock();
        if state.active.remove(&id).is_some() {
            state.reclaimed_total += 1;
        }
        self.dispatch(&mut state);
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.lock().active.values().map(|slot| slot.deadline).min()
    }
}

/// 执行一次高风险操作的许可
///
/// 离开作用域即归还（包括 panic 和 future 被取消）。
pub struct ConcurrencySlot {
    id: u64,
    operation_id: String,
    deadline: Instant,
    inner: Option<Arc<ArbiterInner>>,
}

impl ConcurrencySlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// 硬时限，过了这个时间槽位会被回收
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn disarm(mut self) -> u64 {
        self.inner = None;
        self.id
    }
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release(self.id);
        }
    }
}

impl std::fmt::Debug for ConcurrencySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencySlot")
            .field("id", &self.id)
            .field("operation_id", &self.operation_id)
            .finish()
    }
}

/// 并发仲裁器
#[derive(Clone)]
pub struct ConcurrencyArbiter {
    inner: Arc<ArbiterInner>,
}

impl ConcurrencyArbiter {
    pub fn new(max_slots: usize, slot_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                max_slots: max_slots.max(1),
                slot_timeout,
                state: Mutex::new(ArbiterState::default()),
            }),
        }
    }

    pub fn from_config(config: &ArbiterConfig) -> Self {
        Self::new(config.max_concurrent_operations, config.slot_timeout())
    }

    pub fn max_slots(&self) -> usize {
        self.inner.max_slots
    }

    /// 当前未归还的槽位数
    pub fn active_slots(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// 当前排队数
    pub fn queued(&self) -> usize {
        self.inner.lock().queued()
    }

    /// 累计被强制回收的槽位数
    pub fn reclaimed_total(&self) -> u64 {
        self.inner.lock().reclaimed_total
    }

    /// 获取槽位（可能排队）
    pub async fn acquire(&self, operation_id: &str, priority: Priority) -> ConcurrencySlot {
        let mut rx = {
            let mut state = self.inner.lock();
            self.inner.dispatch(&mut state);
            if state.active.len() < self.inner.max_slots && state.queued() == 0 {
                return self.inner.grant(&mut state, operation_id);
            }
            self.enqueue(&mut state, operation_id, priority)
        };

        debug!("⏳ {} 进入 {:?} 队列", operation_id, priority);

        loop {
            let received = match self.inner.earliest_deadline() {
                Some(deadline) => match time::timeout_at(deadline, &mut rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        // 某个持有者超时，回收后重新分配
                        let mut state = self.inner.lock();
                        self.inner.dispatch(&mut state);
                        continue;
                    }
                },
                None => (&mut rx).await,
            };

            match received {
                Ok(slot) => return slot,
                Err(_) => {
                    let mut state = self.inner.lock();
                    self.inner.dispatch(&mut state);
                    if state.active.len() < self.inner.max_slots && state.queued() == 0 {
                        return self.inner.grant(&mut state, operation_id);
                    }
                    rx = self.enqueue(&mut state, operation_id, priority);
                }
            }
        }
    }

    fn enqueue(
        &self,
        state: &mut ArbiterState,
        operation_id: &str,
        priority: Priority,
    ) -> oneshot::Receiver<ConcurrencySlot> {
        let (tx, rx) = oneshot::channel();
        state.queues[priority.rank()].push_back(Waiter {
            operation_id: operation_id.to_string(),
            tx,
        });
        rx
    }

    /// 归还槽位
    pub fn release(&self, slot: ConcurrencySlot) {
        drop(slot);
    }

    /// 在槽位内执行操作（同 id 单飞）
    ///
    /// - 同一个 `operation_id` 已经在执行：等待并返回它的结果
    /// - 否则获取槽位、在硬时限内执行、把结果发布给所有等待者
    ///
    /// 执行者被取消时，等待者中的一个接替执行。
    pub async fn run<T, F, Fut>(
        &self,
        operation_id: &str,
        priority: Priority,
        op: F,
    ) -> Result<T, ArbiterError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (tx, flight_id) = loop {
            let mut follower = {
                let mut state = self.inner.lock();
                match state.in_flight.get(operation_id) {
                    Some(flight) => flight.rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        let flight_id = state.next_id();
                        state
                            .in_flight
                            .insert(operation_id.to_string(), InFlight { flight_id, rx });
                        break (tx, flight_id);
                    }
                }
            };

            debug!("🔁 {} 已在执行，等待共享结果", operation_id);
            let shared = match follower.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            match shared {
                Some(shared) => return Self::unpack(operation_id, shared),
                None => debug!("{} 的执行者已放弃，重新竞争", operation_id),
            }
        };

        let _guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            operation_id: operation_id.to_string(),
            flight_id,
        };

        let slot = self.acquire(operation_id, priority).await;
        let outcome = match time::timeout_at(slot.deadline(), op()).await {
            Ok(value) => {
                drop(slot);
                Ok(value)
            }
            Err(_) => {
                warn!(
                    "⏱️ 操作 {} 超过槽位时限 {:?}，按失败处理",
                    operation_id, self.inner.slot_timeout
                );
                self.inner.reclaim(slot.disarm());
                Err(ArbiterError::SlotTimeout {
                    operation_id: operation_id.to_string(),
                    timeout: self.inner.slot_timeout,
                })
            }
        };

        let shared: SharedOutcome = Arc::new(outcome.clone());
        tx.send_replace(Some(shared));
        outcome
    }

    fn unpack<T>(operation_id: &str, shared: SharedOutcome) -> Result<T, ArbiterError>
    where
        T: Clone + 'static,
    {
        match shared.downcast_ref::<Result<T, ArbiterError>>() {
            Some(outcome) => outcome.clone(),
            None => Err(ArbiterError::OutcomeTypeMismatch {
                operation_id: operation_id.to_string(),
            }),
        }
    }
}

/// 执行者离开时清掉单飞记录（只清自己那一次）
struct InFlightGuard {
    inner: Arc<ArbiterInner>,
    operation_id: String,
    flight_id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if state
            .in_flight
            .get(&self.operation_id)
            .is_some_and(|flight| flight.flight_id == self.flight_id)
        {
            state.in_flight.remove(&self.operation_id);
        }
    }
}
