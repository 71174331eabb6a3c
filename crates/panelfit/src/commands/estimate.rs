// crates/panelfit/src/commands/estimate.rs
//
// One estimation run covers a single panel variant and a chosen slice of
// the specification matrix. Failed units are recorded and skipped so one
// degenerate cell never takes down the rest of the run; a non-zero exit
// reports that at least one unit failed.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::{info, warn};

use panelfit_core::artifact::read_panel;
use panelfit_core::config::PipelineConfig;
use panelfit_estimation::estimator::{Estimator, ModelKind};
use panelfit_estimation::results::{FailureRecord, ResultsAggregator};
use panelfit_estimation::spec::Specification;

use crate::registry;

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Panel variant to estimate on (must have been built already)
    #[arg(long)]
    pub variant: String,

    /// Run only the named specifications (repeatable)
    #[arg(long = "spec", value_name = "NAME")]
    pub specs: Vec<String>,

    /// Run every registered specification
    #[arg(long, conflicts_with = "specs")]
    pub all_specs: bool,
}

pub fn run(config: &PipelineConfig, args: &EstimateArgs) -> Result<ExitCode> {
    let registry = registry::project_registry()?;

    let selected: Vec<&Specification> = if args.all_specs {
        registry.iter().collect()
    } else if args.specs.is_empty() {
        bail!("pass --all-specs or at least one --spec NAME (see list-specs)");
    } else {
        let mut selected = Vec::with_capacity(args.specs.len());
        for name in &args.specs {
            let spec = registry
                .get(name)
                .with_context(|| format!("unknown specification '{name}'"))?;
            selected.push(spec);
        }
        selected
    };

    let panel_path = config.panel_path(&args.variant);
    let panel = read_panel(&panel_path)
        .with_context(|| format!("variant '{}' has not been built", args.variant))?;
    info!(
        variant = %args.variant,
        rows = panel.height(),
        specs = selected.len(),
        "starting estimation run"
    );

    let estimator = Estimator::new(&config.absorption);
    let mut aggregator = ResultsAggregator::new();
    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["spec", "model", "status", "n_obs", "clusters"]);

    for spec in selected {
        let kinds = if spec.endogenous.is_empty() {
            vec![ModelKind::Ols]
        } else {
            // Naive OLS alongside the instrumented model for every spec
            // with an endogenous block.
            vec![ModelKind::Ols, ModelKind::Iv]
        };
        for kind in kinds {
            match estimator.estimate(&panel, spec, kind) {
                Ok(estimate) => {
                    summary.add_row(vec![
                        spec.name.clone(),
                        kind.as_str().to_string(),
                        "ok".to_string(),
                        estimate.n_obs.to_string(),
                        estimate.n_clusters.to_string(),
                    ]);
                    aggregator.record(&estimate);
                }
                Err(err) => {
                    warn!(
                        spec = %spec.name,
                        model = kind.as_str(),
                        kind = err.kind(),
                        "estimation unit failed: {err}"
                    );
                    summary.add_row(vec![
                        spec.name.clone(),
                        kind.as_str().to_string(),
                        format!("failed ({})", err.kind()),
                        "-".to_string(),
                        "-".to_string(),
                    ]);
                    aggregator.record_failure(FailureRecord::new(
                        &config.pipeline_name,
                        &args.variant,
                        &format!("{} [{}]", spec.name, kind.as_str()),
                        &err,
                    ));
                }
            }
        }
    }

    // Exports nothing when no unit completed, so an all-failed run cannot
    // clobber a previously published table.
    aggregator.export(
        &config.estimates_path(&args.variant),
        &config.first_stage_path(&args.variant),
    )?;

    println!("{summary}");

    let failures = aggregator.failures().len();
    if failures > 0 {
        aggregator.export_failures(&config.failures_path(&args.variant))?;
        eprintln!(
            "{failures} estimation unit(s) failed; details in {}",
            config.failures_path(&args.variant).display()
        );
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
