pub mod format;
pub mod logging;
pub mod sync;

pub use format::{format_elapsed, format_elapsed_f64};
pub use sync::lock_or_recover;
