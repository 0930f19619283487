//! Configuration view and validation commands — `finetune-controller config`.

use anyhow::{Context, Result};
use std::path::PathBuf;

use finetune_controller::config::{CONFIG_FILE_NAME, ControllerConfig};

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found, using defaults", config_path.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();
            let config = load_config(cli, None)?;
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", config_path.display());
                return Ok(());
            }

            let config = ControllerConfig::load_file(&config_path)?;
            let warnings = config.validate()?;

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, ControllerConfig::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
