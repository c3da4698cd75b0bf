pub mod toml_loader;

pub use toml_loader::{load_all_batches, load_form_plan, load_toml_to_item_batch};
