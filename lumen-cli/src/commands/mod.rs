//! Command implementations for the lumen CLI

mod config;
mod run;

pub use config::show_config;
pub use run::{execute, format_reports, run_scenario, Frame, StepReport};
