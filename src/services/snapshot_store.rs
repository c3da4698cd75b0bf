//! 引擎快照持久化 - 业务能力层
//!
//! 在进程之间保留学到的定位策略和退避状态。文件格式：
//!
//! ```json
//! {
//!   "role": [{"strategySpec": "css=#role", "successCount": 4, "lastUsed": "2026-10-18T08:00:00Z"}],
//!   "resilience": {"consecutiveFailures": 0, "currentBackoffMs": 10000}
//! }
//! ```
//!
//! 文件不存在就是冷启动（空缓存、基础退避），永远不是错误。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::resilience::ResilienceSnapshot;
use crate::services::strategy_cache::StoredStrategy;

/// 引擎快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSnapshot>,
    #[serde(flatten)]
    pub strategies: BTreeMap<String, Vec<StoredStrategy>>,
}

/// 快照文件
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取快照
    ///
    /// 文件不存在或内容损坏都按冷启动处理，损坏时记录警告。
    pub async fn load(&self) -> EngineSnapshot {
        match self.try_load().await {
            Ok(Some(snapshot)) => {
                info!(
                    "📂 已加载引擎快照: {} 个控件的策略",
                    snapshot.strategies.len()
                );
                snapshot
            }
            Ok(None) => {
                debug!("快照文件不存在，冷启动: {}", self.path.display());
                EngineSnapshot::default()
            }
            Err(e) => {
                warn!("⚠️ 快照不可用，按冷启动处理: {}", e);
                EngineSnapshot::default()
            }
        }
    }

    async fn try_load(&self) -> Result<Option<EngineSnapshot>, PersistenceError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| PersistenceError::Json {
                path: self.path.clone(),
                source,
            })
    }

    /// 写入快照（先写临时文件再改名）
    pub async fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|source| {
            PersistenceError::Json {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        let io_err = |source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp, json).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        debug!("引擎快照已保存: {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategySpec;
    use chrono::Utc;

    #[tokio::test]
    async fn test_missing_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().await, EngineSnapshot::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SnapshotStore::new(&path);
        assert_eq!(store.load().await, EngineSnapshot::default());
    }

    #[tokio::test]
    async fn test_save_then_load_uses_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        let mut snapshot = EngineSnapshot {
            resilience: Some(ResilienceSnapshot {
                consecutive_failures: 2,
                current_backoff_ms: 16_900,
            }),
            ..EngineSnapshot::default()
        };
        snapshot.strategies.insert(
            "role".to_string(),
            vec![StoredStrategy {
                strategy_spec: StrategySpec::css("#role"),
                success_count: 4,
                last_used: Utc::now(),
            }],
        );

        store.save(&snapshot).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["role"][0]["strategySpec"], "css=#role");
        assert_eq!(raw["resilience"]["currentBackoffMs"], 16_900);

        assert_eq!(store.load().await, snapshot);
    }
}
