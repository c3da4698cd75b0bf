//! 韧性层（Resilience）
//!
//! 进程内共享的两样东西都在这里：
//!
//! - [`ConcurrencyArbiter`]：高风险操作的并发闸门
//! - [`AvailabilityMonitor`]：目标可用性状态与退避
//!
//! 两者都由入口创建一次，以句柄的形式注入编排层。

pub mod arbiter;
pub mod backoff;
pub mod monitor;
pub mod probe;
pub mod state;

pub use arbiter::{ConcurrencyArbiter, ConcurrencySlot, Priority};
pub use backoff::BackoffPolicy;
pub use monitor::{AvailabilityMonitor, PROBE_OPERATION_ID};
pub use probe::{HttpProber, Prober};
pub use state::{ResilienceSnapshot, ResilienceState};
