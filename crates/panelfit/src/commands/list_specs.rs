// crates/panelfit/src/commands/list_specs.rs

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::registry;

pub fn run() -> Result<()> {
    let registry = registry::project_registry()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "name",
        "outcome",
        "endogenous",
        "instruments",
        "fixed effects",
        "cluster",
    ]);
    for spec in registry.iter() {
        let fe = spec
            .fe_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            spec.name.clone(),
            spec.outcome.clone(),
            spec.endogenous.join(", "),
            spec.excluded_instruments.join(", "),
            fe,
            spec.cluster_key.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}
