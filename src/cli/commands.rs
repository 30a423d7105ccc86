use clap::Subcommand;

use super::config::ConfigArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run scenarios against the application (all of them when none are named)
    Run(RunArgs),

    /// List available scenarios
    List,

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
