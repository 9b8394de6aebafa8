//! Config command handlers.

use anyhow::{Context, Result};
use hitl_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

/// Prints the loaded configuration on the commented template.
pub fn generate() -> Result<()> {
    let toml = config::Config::load().context("load config")?.generate()?;
    print!("{toml}");
    Ok(())
}
