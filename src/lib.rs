//! # Batch Register
//!
//! 自适应批量注册引擎：把一批条目逐个提交到一个不可靠的 Web 目标系统。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露 [`TargetAdapter`] 能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `ChromiumAdapter` - 定位控件、执行动作、观察提交后的信号
//!
//! ### ② 业务能力层（Services）
//! - `ErrorClassifier` - 有序规则表，把失败信号归入封闭的错误类别
//! - `StrategyCache` - 按控件记住有效的定位策略（LRU + TTL）
//! - `NameResolver` - 在目标提供的选项里选出匹配项
//! - `SnapshotStore` - 快照持久化
//!
//! ### ③ 韧性层（Resilience）
//! - `ConcurrencyArbiter` - 高风险操作的并发上限、优先级、超时回收、同 id 合并
//! - `AvailabilityMonitor` - 探测目标可用性，失败时指数退避
//!
//! ### ④ 流程层（Workflow）
//! - `ItemFlow` - 单个条目：填写 → 提交 → 观察 → 分类 → 重试或结束
//!
//! ### ⑤ 编排层（Orchestration）
//! - `BatchOrchestrator` - 单个批次：会话保持、提前终止、取消
//! - `App` - 程序入口：资源创建、批次循环、快照保存

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod resilience;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, EngineConfig, SessionPolicy};
pub use error::{AdapterError, AppError, AppResult};
pub use infrastructure::{ChromiumAdapter, JsExecutor, TargetAdapter};
pub use models::{BatchReport, FormPlan, Item, ItemOutcome, ItemResult};
pub use orchestrator::{App, BatchCancellation, BatchOrchestrator};
pub use resilience::{AvailabilityMonitor, ConcurrencyArbiter, Priority};
pub use workflow::{ItemCtx, ItemFlow};
