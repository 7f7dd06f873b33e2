//! `scalesim scaffold`: write a starter config.

use std::path::Path;

use anyhow::{Result, bail};
use scalesim_core::SimConfig;

pub fn scaffold(name: &str, output: Option<&Path>) -> Result<()> {
    let rendered = SimConfig::scaffold(name).to_toml_string()?;
    match output {
        Some(path) => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(path, rendered)?;
            println!("✓ Generated {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
