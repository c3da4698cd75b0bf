//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用入口
//! - 管理应用生命周期（初始化、运行、快照保存）
//! - 创建进程内唯一的仲裁器和可用性监视器
//! - 批次之间串行，输出全局统计信息
//!
//! ### `batch_orchestrator` - 单个批次
//! - 顺序遍历批次内的条目，复用同一个会话
//! - 条目之间保持会话、刷新活动时钟
//! - 决定批次何时提前终止
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<ItemBatch>)
//!     ↓
//! batch_orchestrator (处理 Vec<Item>)
//!     ↓
//! workflow::ItemFlow (处理单个 Item)
//!     ↓
//! services / resilience (分类、策略缓存、名称解析、仲裁、退避)
//!     ↓
//! infrastructure (TargetAdapter)
//! ```

pub mod batch_orchestrator;
pub mod batch_processor;

pub use batch_orchestrator::{BatchCancellation, BatchOrchestrator};
pub use batch_processor::App;
