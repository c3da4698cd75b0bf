//! 业务能力层（Services）
//!
//! 每个服务只回答一个问题，不关心批次和会话：
//! - [`ErrorClassifier`]：这个信号属于哪一类错误
//! - [`StrategyCache`]：这个控件上次是怎么找到的
//! - [`NameResolver`]：该选哪一个选项
//! - [`SnapshotStore`]：学到的东西如何跨进程保留

pub mod error_classifier;
pub mod name_resolver;
pub mod snapshot_store;
pub mod strategy_cache;

pub use error_classifier::{ClassificationRule, ErrorClassifier, Matcher, Verdict};
pub use name_resolver::{NameResolver, NoMatch, NormalizedNameResolver};
pub use snapshot_store::{EngineSnapshot, SnapshotStore};
pub use strategy_cache::{LocatorStrategy, SharedStrategyCache, StoredStrategy, StrategyCache};
