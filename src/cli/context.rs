use std::path::{Path, PathBuf};

use mediflow_e2e::Config;

use super::output::OutputFormat;

pub struct CliContext {
    config: Config,
    config_path: PathBuf,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config,
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }
}
