//! Print the effective configuration

use anyhow::{Context, Result};
use lumen_runtime::LumenConfig;
use std::path::Path;

pub fn show_config(config_path: Option<&Path>) -> Result<()> {
    let config = LumenConfig::load(config_path).context("Failed to load configuration")?;
    let yaml = config.to_yaml().context("Failed to serialize configuration")?;
    print!("{yaml}");
    Ok(())
}
