//! 定位策略缓存 - 业务能力层
//!
//! 记住每个逻辑控件"上一次奏效的定位策略"，并按成功次数给候选策略排序。
//!
//! - `get` 只是提示，调用方仍需验证策略能否定位到控件
//! - `record_failure` 不会立即淘汰策略，只降低置信度；目标页面常在两种布局间来回切换，
//!   历史记录以后可能重新有效
//! - `reorder` 在批次之间调用，让主流布局的策略排到前面
//! - 容量有上限，超出时按 LRU 淘汰；在本进程内闲置超过 TTL 的策略视为过期
//!
//! TTL 只看进程内的闲置时钟。持久化的 `lastUsed` 只参与排序，恢复快照时闲置时钟从恢复时刻算起，
//! 否则上一次运行留下的快照一加载就全部过期。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::StrategySpec;

/// 每次连续失败抵消的成功次数
const FAILURE_WEIGHT: i64 = 2;

/// 定位策略记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorStrategy {
    pub control_id: String,
    pub spec: StrategySpec,
    pub success_count: u32,
    /// 自上次成功以来的连续失败次数
    pub failure_streak: u32,
    pub last_used: DateTime<Utc>,
    /// 进程内单调递增的使用序号，`last_used` 相同时用于排序和 LRU
    touched: u64,
    /// 进程内闲置时钟起点，不持久化
    idle_since: Instant,
}

impl LocatorStrategy {
    /// 置信度：成功次数减去连续失败的惩罚
    pub fn confidence(&self) -> i64 {
        i64::from(self.success_count) - i64::from(self.failure_streak) * FAILURE_WEIGHT
    }

    /// 排名：置信度降序，最近使用降序
    fn rank_key(&self) -> (i64, DateTime<Utc>, u64) {
        (self.confidence(), self.last_used, self.touched)
    }
}

/// 持久化形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStrategy {
    pub strategy_spec: StrategySpec,
    pub success_count: u32,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ControlEntry {
    strategies: Vec<LocatorStrategy>,
    /// 最近一次成功的策略
    last_success: Option<StrategySpec>,
}

/// 定位策略缓存
#[derive(Debug)]
pub struct StrategyCache {
    controls: HashMap<String, ControlEntry>,
    capacity: usize,
    ttl: Duration,
    clock: u64,
}

/// 跨条目、跨批次共享的缓存
///
/// 缓存只是性能提示，允许丢失更新；锁只用于满足 `Send + Sync`，持锁期间不做 I/O。
pub type SharedStrategyCache = Arc<Mutex<StrategyCache>>;

impl StrategyCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            controls: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            clock: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    pub fn into_shared(self) -> SharedStrategyCache {
        Arc::new(Mutex::new(self))
    }

    /// 锁住共享缓存（锁中毒时继续使用内部数据）
    pub fn lock(shared: &SharedStrategyCache) -> MutexGuard<'_, StrategyCache> {
        shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 缓存中的策略总数
    pub fn len(&self) -> usize {
        self.controls.values().map(|e| e.strategies.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取控件的最佳策略提示
    ///
    /// 优先返回最近一次成功且之后没有失败过的策略，否则返回排名最高的策略。
    pub fn get(&mut self, control_id: &str) -> Option<LocatorStrategy> {
        self.prune_expired(control_id);
        let entry = self.controls.get(control_id)?;

        if let Some(spec) = &entry.last_success {
            if let Some(strategy) = entry
                .strategies
                .iter()
                .find(|s| &s.spec == spec && s.failure_streak == 0)
            {
                return Some(strategy.clone());
            }
        }

        entry
            .strategies
            .iter()
            .max_by_key(|s| s.rank_key())
            .cloned()
    }

    /// 按排名返回控件的所有未过期策略
    pub fn ranked(&mut self, control_id: &str) -> Vec<StrategySpec> {
        self.prune_expired(control_id);
        let Some(entry) = self.controls.get(control_id) else {
            return Vec::new();
        };

        let mut strategies: Vec<&LocatorStrategy> = entry.strategies.iter().collect();
        strategies.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
        strategies.into_iter().map(|s| s.spec.clone()).collect()
    }

    /// 记录一次成功
    pub fn record_success(&mut self, control_id: &str, spec: &StrategySpec) {
        self.clock += 1;
        let touched = self.clock;
        let now = Utc::now();
        let idle_since = Instant::now();

        let entry = self.controls.entry(control_id.to_string()).or_default();
        match entry.strategies.iter_mut().find(|s| &s.spec == spec) {
            Some(strategy) => {
                strategy.success_count = strategy.success_count.saturating_add(1);
                strategy.failure_streak = 0;
                strategy.last_used = now;
                strategy.touched = touched;
                strategy.idle_since = idle_since;
            }
            None => entry.strategies.push(LocatorStrategy {
                control_id: control_id.to_string(),
                spec: spec.clone(),
                success_count: 1,
                failure_streak: 0,
                last_used: now,
                touched,
                idle_since,
            }),
        }
        entry.last_success = Some(spec.clone());

        debug!("策略缓存命中记录: {} -> {}", control_id, spec);
        self.evict_over_capacity();
    }

    /// 记录一次失败：降低置信度，不淘汰
    pub fn record_failure(&mut self, control_id: &str, spec: &StrategySpec) {
        let Some(entry) = self.controls.get_mut(control_id) else {
            return;
        };
        if let Some(strategy) = entry.strategies.iter_mut().find(|s| &s.spec == spec) {
            strategy.failure_streak = strategy.failure_streak.saturating_add(1);
            debug!(
                "策略失效: {} -> {} (连续失败 {} 次, 置信度 {})",
                control_id,
                spec,
                strategy.failure_streak,
                strategy.confidence()
            );
        }
        if entry.last_success.as_ref() == Some(spec) {
            entry.last_success = None;
        }
    }

    /// 重新排序所有控件的策略，并清理过期项
    pub fn reorder(&mut self) {
        let ids: Vec<String> = self.controls.keys().cloned().collect();
        for id in ids {
            self.prune_expired(&id);
        }
        for entry in self.controls.values_mut() {
            entry
                .strategies
                .sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
        }
    }

    /// 导出为持久化形式
    pub fn snapshot(&self) -> BTreeMap<String, Vec<StoredStrategy>> {
        self.controls
            .iter()
            .filter(|(_, entry)| !entry.strategies.is_empty())
            .map(|(control_id, entry)| {
                let mut strategies: Vec<&LocatorStrategy> = entry.strategies.iter().collect();
                strategies.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
                let stored = strategies
                    .into_iter()
                    .map(|s| StoredStrategy {
                        strategy_spec: s.spec.clone(),
                        success_count: s.success_count,
                        last_used: s.last_used,
                    })
                    .collect();
                (control_id.clone(), stored)
            })
            .collect()
    }

    /// 从持久化形式恢复（覆盖当前内容）
    ///
    /// 不按 `lastUsed` 清理过期项，恢复的策略从现在开始计算闲置时间。
    pub fn restore(&mut self, stored: BTreeMap<String, Vec<StoredStrategy>>) {
        self.controls.clear();
        let restored_at = Instant::now();

        // 按 last_used 先后分配序号，保持 LRU 顺序
        let mut all: Vec<(String, StoredStrategy)> = stored
            .into_iter()
            .flat_map(|(control_id, strategies)| {
                strategies.into_iter().map(move |s| (control_id.clone(), s))
            })
            .collect();
        all.sort_by_key(|(_, s)| s.last_used);

        for (control_id, s) in all {
            self.clock += 1;
            let entry = self.controls.entry(control_id.clone()).or_default();
            if entry.strategies.iter().any(|x| x.spec == s.strategy_spec) {
                continue;
            }
            entry.strategies.push(LocatorStrategy {
                control_id,
                spec: s.strategy_spec,
                success_count: s.success_count,
                failure_streak: 0,
                last_used: s.last_used,
                touched: self.clock,
                idle_since: restored_at,
            });
        }

        self.evict_over_capacity();
        for entry in self.controls.values_mut() {
            entry
                .strategies
                .sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
        }
    }

    fn is_expired(&self, strategy: &LocatorStrategy) -> bool {
        strategy.idle_since.elapsed() > self.ttl
    }

    fn prune_expired(&mut self, control_id: &str) {
        let expired: Vec<StrategySpec> = match self.controls.get(control_id) {
            Some(entry) => entry
                .strategies
                .iter()
                .filter(|s| self.is_expired(s))
                .map(|s| s.spec.clone())
                .collect(),
            None => return,
        };
        if expired.is_empty() {
            return;
        }

        if let Some(entry) = self.controls.get_mut(control_id) {
            entry.strategies.retain(|s| !expired.contains(&s.spec));
            if entry
                .last_success
                .as_ref()
                .is_some_and(|spec| expired.contains(spec))
            {
                entry.last_success = None;
            }
            if entry.strategies.is_empty() {
                self.controls.remove(control_id);
            }
        }
        debug!("策略过期清理: {} 条 ({})", expired.len(), control_id);
    }

    /// 超出容量时淘汰最久未使用的策略
    fn evict_over_capacity(&mut self) {
        while self.len() > self.capacity {
            let victim = self
                .controls
                .iter()
                .flat_map(|(id, entry)| entry.strategies.iter().map(move |s| (id, s)))
                .min_by_key(|(_, s)| s.touched)
                .map(|(id, s)| (id.clone(), s.spec.clone()));

            let Some((control_id, spec)) = victim else {
                break;
            };

            if let Some(entry) = self.controls.get_mut(&control_id) {
                entry.strategies.retain(|s| s.spec != spec);
                if entry.last_success.as_ref() == Some(&spec) {
                    entry.last_success = None;
                }
                if entry.strategies.is_empty() {
                    self.controls.remove(&control_id);
                }
            }
            debug!("策略缓存已满，淘汰: {} -> {}", control_id, spec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> StrategyCache {
        StrategyCache::new(200, Duration::from_secs(600))
    }

    #[test]
    fn test_record_success_then_get_returns_it() {
        let mut cache = cache();
        let primary = StrategySpec::css("#role");
        let fallback = StrategySpec::label("角色");

        for _ in 0..5 {
            cache.record_success("role", &primary);
        }
        cache.record_success("role", &fallback);

        // 最近一次成功的策略排在最前，即使成功次数更少
        assert_eq!(cache.get("role").unwrap().spec, fallback);
    }

    #[test]
    fn test_get_unknown_control_is_none() {
        assert!(cache().get("nope").is_none());
    }

    #[test]
    fn test_failures_sink_strategy_below_alternate() {
        let mut cache = cache();
        let a = StrategySpec::css("#a");
        let b = StrategySpec::text("按钮");

        cache.record_success("btn", &b);
        cache.record_success("btn", &a);
        cache.record_success("btn", &a);

        assert_eq!(cache.get("btn").unwrap().spec, a);

        cache.record_failure("btn", &a);
        cache.record_failure("btn", &a);

        // a: 2 - 2*2 = -2, b: 1
        assert_eq!(cache.get("btn").unwrap().spec, b);
        assert_eq!(cache.ranked("btn"), vec![b.clone(), a.clone()]);

        // 历史保留，再次成功后恢复
        cache.record_success("btn", &a);
        assert_eq!(cache.get("btn").unwrap().spec, a);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reorder_sorts_by_success_count() {
        let mut cache = cache();
        let a = StrategySpec::css("#a");
        let b = StrategySpec::css("#b");

        cache.record_success("x", &a);
        cache.record_success("x", &b);
        cache.record_success("x", &b);
        cache.record_success("x", &a);
        cache.record_success("x", &b);
        cache.reorder();

        assert_eq!(cache.ranked("x"), vec![b, a]);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mut cache = StrategyCache::new(2, Duration::from_secs(600));
        let a = StrategySpec::css("#a");
        let b = StrategySpec::css("#b");
        let c = StrategySpec::css("#c");

        cache.record_success("one", &a);
        cache.record_success("two", &b);
        cache.record_success("one", &a);
        cache.record_success("three", &c);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("two").is_none());
        assert_eq!(cache.get("one").unwrap().spec, a);
        assert_eq!(cache.get("three").unwrap().spec, c);
    }

    #[test]
    fn test_at_most_one_entry_per_spec() {
        let mut cache = cache();
        let a = StrategySpec::css("#a");
        cache.record_success("x", &a);
        cache.record_success("x", &a);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("x").unwrap().success_count, 2);
    }

    #[test]
    fn test_idle_strategies_expire() {
        let mut cache = StrategyCache::new(10, Duration::from_millis(10));
        cache.record_success("x", &StrategySpec::css("#a"));
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("x").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_restore_keeps_ranking() {
        let mut cache = cache();
        let a = StrategySpec::css("#a");
        let b = StrategySpec::xpath("//button");
        cache.record_success("submit", &a);
        cache.record_success("submit", &b);
        cache.record_success("submit", &b);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot["submit"][0].strategy_spec, b);

        let mut restored = StrategyCache::new(200, Duration::from_secs(600));
        restored.restore(snapshot);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("submit").unwrap().spec, b);
    }

    #[test]
    fn test_restore_keeps_strategies_from_an_earlier_run() {
        let role = StrategySpec::css("#role");
        let mut stored = BTreeMap::new();
        stored.insert(
            "role".to_string(),
            vec![StoredStrategy {
                strategy_spec: role.clone(),
                success_count: 40,
                last_used: Utc::now() - chrono::Duration::hours(1),
            }],
        );

        let mut cache = StrategyCache::new(200, Duration::from_secs(600));
        cache.restore(stored);

        assert_eq!(cache.len(), 1);
        let strategy = cache.get("role").unwrap();
        assert_eq!(strategy.spec, role);
        assert_eq!(strategy.success_count, 40);
        cache.reorder();
        assert_eq!(cache.ranked("role"), vec![role]);
    }

    #[test]
    fn test_restored_strategies_still_expire_when_idle() {
        let mut stored = BTreeMap::new();
        stored.insert(
            "x".to_string(),
            vec![StoredStrategy {
                strategy_spec: StrategySpec::css("#a"),
                success_count: 3,
                last_used: Utc::now(),
            }],
        );

        let mut cache = StrategyCache::new(10, Duration::from_millis(10));
        cache.restore(stored);
        assert_eq!(cache.len(), 1);
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("x").is_none());
    }
}
