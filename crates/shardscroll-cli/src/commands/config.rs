//! Show or write the configuration.

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::Config;

pub fn run(init: Option<&str>) -> Result<()> {
    match init {
        Some(path) => {
            let path = Path::new(path);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            Config::default().save(path)?;
            println!("{} {}", "Wrote".green().bold(), path.display());
        }
        None => {
            let config = Config::load()?;
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
