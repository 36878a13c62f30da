use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::error;

use careflow::config::AppConfig;

mod cli;
mod main_runtime;

use cli::{Cli, Commands};
use main_runtime::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("Failed to load config from {}", cli.config_dir.display()))?;

    match cli.command {
        Commands::ShowConfig => cli::show_config(&config)?,
        Commands::Replay {
            file,
            drain_secs,
            json,
            state,
        } => {
            let _guard = init_logging(&config.logging);
            if let Err(errors) = config.validate() {
                for e in &errors {
                    error!("config: {}", e);
                }
                bail!("invalid configuration ({} problem(s))", errors.len());
            }
            let drain = Duration::from_secs(drain_secs);
            cli::replay(&config, &file, drain, json, &state).await?;
        }
    }

    Ok(())
}
