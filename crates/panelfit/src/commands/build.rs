// crates/panelfit/src/commands/build.rs

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::info;

use panelfit_core::builder::PanelBuilder;
use panelfit_core::config::PipelineConfig;
use panelfit_core::types::JoinKind;

pub fn run(config: &PipelineConfig) -> Result<()> {
    info!(pipeline = %config.pipeline_name, "building panel variants");
    let report = PanelBuilder::new(config).build()?;

    let mut joins = Table::new();
    joins.load_preset(UTF8_FULL);
    joins.set_header(vec!["source", "join", "rows before", "rows after", "matched"]);
    for audit in &report.join_audits {
        let kind = match audit.join {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
        };
        joins.add_row(vec![
            audit.source.clone(),
            kind.to_string(),
            audit.rows_before.to_string(),
            audit.rows_after.to_string(),
            audit.matched.to_string(),
        ]);
    }
    println!("{joins}");

    println!(
        "master panel: {} rows ({} dropped by the complete-case policy)",
        report.master_rows, report.rows_dropped_incomplete
    );

    let mut variants = Table::new();
    variants.load_preset(UTF8_FULL);
    variants.set_header(vec!["variant", "rows", "content hash", "path"]);
    for artifact in &report.variants {
        let short_hash = artifact.content_hash.chars().take(12).collect::<String>();
        variants.add_row(vec![
            artifact.name.clone(),
            artifact.rows.to_string(),
            short_hash,
            artifact.path.display().to_string(),
        ]);
    }
    println!("{variants}");

    Ok(())
}
