// crates/panelfit-core/src/builder.rs
//
// Deterministic panel construction: normalize each raw source, join them
// sequentially with audited row deltas, derive computed columns, enforce the
// complete-case policy, then apply and publish every declared variant.
// Nothing is persisted until every variant has been computed, so a failed
// build never leaves a partial panel behind.

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{self, PanelArtifact};
use crate::config::PipelineConfig;
use crate::derive::apply_derived;
use crate::error::{PipelineError, Result};
use crate::ingestion::{ensure_unique, load_source};
use crate::types::{JoinKind, TIME_COL, UNIT_COL};
use crate::variants::apply_variant;

/// Row-count accounting for one sequential join, surfaced for auditability.
#[derive(Debug, Clone, Serialize)]
pub struct JoinAudit {
    pub source: String,
    pub join: JoinKind,
    pub rows_before: usize,
    pub rows_after: usize,
    pub matched: usize,
}

#[derive(Debug, Serialize)]
pub struct PanelBuildReport {
    pub pipeline_name: String,
    pub join_audits: Vec<JoinAudit>,
    pub rows_dropped_incomplete: usize,
    pub master_rows: usize,
    pub variants: Vec<PanelArtifact>,
}

pub struct PanelBuilder<'a> {
    config: &'a PipelineConfig,
}

impl<'a> PanelBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<PanelBuildReport> {
        let config = self.config;
        // Configs built in code skip the from_toml_file path, so the
        // structural invariants are re-checked here.
        config.validate()?;
        let bucketing = &config.bucketing;

        let anchor = &config.sources[0];
        let mut master = load_source(config, anchor, bucketing)?;
        ensure_unique(&master, &[UNIT_COL, TIME_COL], &anchor.name)?;
        info!(source = %anchor.name, rows = master.height(), "anchored panel");

        let mut join_audits = Vec::with_capacity(config.sources.len() - 1);
        for source in &config.sources[1..] {
            let incoming = load_source(config, source, bucketing)?;
            let (joined, audit) = join_audited(master, incoming, source.time_key.is_some(), source)?;
            info!(
                source = %audit.source,
                rows_before = audit.rows_before,
                rows_after = audit.rows_after,
                matched = audit.matched,
                "joined source"
            );
            master = joined;
            join_audits.push(audit);
        }
        ensure_unique(&master, &[UNIT_COL, TIME_COL], "master panel")?;

        master = apply_derived(master, &config.derived, bucketing)?;

        let (master, rows_dropped_incomplete) =
            apply_complete_case(master, &config.required_columns)?;
        if rows_dropped_incomplete > 0 {
            warn!(
                dropped = rows_dropped_incomplete,
                "complete-case filter removed rows with missing required values"
            );
        }

        let master = master
            .lazy()
            .sort([UNIT_COL, TIME_COL], SortMultipleOptions::default())
            .collect()?;

        // Compute every variant before publishing anything.
        let mut pending = Vec::with_capacity(config.variants.len());
        for def in &config.variants {
            let frame = apply_variant(&master, def)?;
            pending.push((def.name().to_string(), frame));
        }

        let mut variants = Vec::with_capacity(pending.len());
        for (name, frame) in pending {
            let path = config.panel_path(&name);
            variants.push(artifact::write_panel(&path, &name, &frame)?);
        }

        let report = PanelBuildReport {
            pipeline_name: config.pipeline_name.clone(),
            join_audits,
            rows_dropped_incomplete,
            master_rows: master.height(),
            variants,
        };
        artifact::write_json(&config.build_report_path(), &report)?;
        Ok(report)
    }
}

/// Join one normalized source onto the accumulating master and account for
/// the row delta. A join matching zero rows invalidates every downstream
/// estimate, so it is fatal rather than a warning.
fn join_audited(
    master: DataFrame,
    incoming: DataFrame,
    on_time: bool,
    source: &crate::types::SourceSpec,
) -> Result<(DataFrame, JoinAudit)> {
    let keys: Vec<Expr> = if on_time {
        vec![col(UNIT_COL), col(TIME_COL)]
    } else {
        vec![col(UNIT_COL)]
    };

    let rows_before = master.height();

    let matched = master
        .clone()
        .lazy()
        .join(
            incoming.clone().lazy(),
            keys.clone(),
            keys.clone(),
            JoinArgs::new(JoinType::Semi),
        )
        .collect()?
        .height();
    if matched == 0 {
        return Err(PipelineError::JoinConsistency(format!(
            "joining source '{}' matched zero rows",
            source.name
        )));
    }

    let join_type = match source.join {
        JoinKind::Inner => JoinType::Inner,
        JoinKind::Left => JoinType::Left,
    };
    let joined = master
        .lazy()
        .join(
            incoming.lazy(),
            keys.clone(),
            keys,
            JoinArgs::new(join_type),
        )
        .collect()?;

    let audit = JoinAudit {
        source: source.name.clone(),
        join: source.join,
        rows_before,
        rows_after: joined.height(),
        matched,
    };
    Ok((joined, audit))
}

/// Drop rows with a missing value in any required column; report the count.
/// Row-level missingness is handled here and only here, never by aborting.
fn apply_complete_case(master: DataFrame, required: &[String]) -> Result<(DataFrame, usize)> {
    if required.is_empty() {
        return Ok((master, 0));
    }
    for column in required {
        if master
            .get_column_names()
            .iter()
            .all(|c| c.as_str() != column.as_str())
        {
            return Err(PipelineError::Validation(format!(
                "required column '{column}' does not exist in the master panel"
            )));
        }
    }

    let before = master.height();
    let predicate = all_horizontal(
        required
            .iter()
            .map(|c| col(c.as_str()).is_not_null())
            .collect::<Vec<_>>(),
    )?;
    let filtered = master.lazy().filter(predicate).collect()?;
    let dropped = before - filtered.height();
    Ok((filtered, dropped))
}
