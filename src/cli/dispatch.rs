use super::config::cmd_config;
use super::env::CliArgs;
use super::list::cmd_list;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::List => cmd_list(ctx),
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
