//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（浏览器页面），只向上暴露 [`TargetAdapter`] 能力。

pub mod adapter;
pub mod chromium_adapter;
pub mod js_executor;

pub use adapter::{Action, ActionResult, ControlHandle, SessionHandle, TargetAdapter};
pub use chromium_adapter::ChromiumAdapter;
pub use js_executor::JsExecutor;
