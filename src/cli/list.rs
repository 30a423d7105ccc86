use anyhow::Result;
use mediflow_e2e::ScenarioKind;
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;

#[derive(Serialize)]
struct ScenarioEntry {
    name: &'static str,
    description: &'static str,
}

pub fn cmd_list(ctx: &CliContext) -> Result<()> {
    let entries: Vec<ScenarioEntry> = ScenarioKind::ALL
        .iter()
        .map(|kind| ScenarioEntry {
            name: kind.name(),
            description: kind.description(),
        })
        .collect();

    emit(ctx.output(), &entries, || {
        entries
            .iter()
            .map(|entry| format!("{:<22} {}\n", entry.name, entry.description))
            .collect()
    })
}
