pub mod item_ctx;
pub mod item_flow;
pub mod session;

pub use item_ctx::ItemCtx;
pub use item_flow::{ItemFlow, ItemPhase, ItemRun};
pub use session::SessionKeeper;
