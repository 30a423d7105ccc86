use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use mediflow_e2e::Config;
use tokio::fs;

use super::output::emit;
use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path();
    match args.action {
        ConfigAction::Show => {
            let config = ctx.config();
            emit(ctx.output(), config, || {
                format!(
                    "Current configuration ({}):\n{}",
                    path.display(),
                    config.to_yaml().unwrap_or_else(|err| format!("<unrenderable: {err}>\n"))
                )
            })?;
        }
        ConfigAction::Validate => {
            if fs::try_exists(path).await? {
                let raw = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let config = Config::from_yaml_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                config
                    .validate()
                    .with_context(|| format!("validating {}", path.display()))?;
                println!("Configuration file {} is valid", path.display());
            } else {
                ctx.config().validate().context("validating defaults")?;
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }

    Ok(())
}
