use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

/// Print `value` as JSON or YAML, or fall back to the provided human rendering.
pub fn emit<T: Serialize>(format: &OutputFormat, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Human => print!("{}", human()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
