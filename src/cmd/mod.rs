//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`            |
//! | `config` | `Config`         |

pub mod config;
pub mod run;

use anyhow::Result;
use finetune_controller::config::{CliOverrides, ControllerConfig, LogFormat};

use super::Cli;

pub use config::cmd_config;
pub use run::{RunArgs, cmd_run};

/// Global flags shared by every command, as config overrides.
fn cli_overrides(cli: &Cli, max_concurrent_reconciles: Option<usize>) -> Result<CliOverrides> {
    let log_format = cli
        .log_format
        .as_deref()
        .map(str::parse::<LogFormat>)
        .transpose()?;
    Ok(CliOverrides {
        max_concurrent_reconciles,
        verbose: cli.verbose,
        log_format,
    })
}

fn load_config(cli: &Cli, max_concurrent_reconciles: Option<usize>) -> Result<ControllerConfig> {
    let overrides = cli_overrides(cli, max_concurrent_reconciles)?;
    ControllerConfig::load(cli.config.as_deref(), &overrides)
}
