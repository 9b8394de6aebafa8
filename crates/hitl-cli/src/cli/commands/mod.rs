//! CLI command handlers.

pub mod config;
pub mod interactive;
pub mod reset;
pub mod resume;
pub mod run;
pub mod status;
