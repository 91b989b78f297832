//! CLI commands for the wheel engine.

pub mod check_entry;
pub mod engine;
pub mod monitor;
pub mod routines;
pub mod show_config;

pub use check_entry::{run_check_entry, CheckEntryArgs};
pub use engine::EngineArgs;
pub use monitor::run_monitor;
pub use routines::{run_afternoon, run_morning};
pub use show_config::{run_show_config, ShowConfigArgs};
