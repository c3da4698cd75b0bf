pub mod form_plan;
pub mod item;
pub mod loaders;
pub mod locator;
pub mod report;
pub mod signal;

pub use form_plan::{ControlStep, FormPlan, StepAction};
pub use item::{Item, ItemAttributes, ItemBatch};
pub use loaders::{load_all_batches, load_form_plan, load_toml_to_item_batch};
pub use locator::{LocatorKind, LocatorParseError, StrategySpec};
pub use report::{BatchCutoff, BatchReport, CutoffReason, ItemOutcome, ItemResult};
pub use signal::{
    Banner, BannerLevel, ContractViolation, ErrorCategory, ErrorClassification, FailureSignal,
    TargetSignal,
};
