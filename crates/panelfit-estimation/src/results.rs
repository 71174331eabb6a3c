// crates/panelfit-estimation/src/results.rs
//
// Flattens ModelEstimate trees into long-format records and exports them as
// deterministic CSV: rows sorted by (spec, model, parameter) regardless of
// the order the estimation units ran in, optional diagnostics serialized as
// explicit empty fields rather than sentinel numbers.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use panelfit_core::artifact::write_bytes_atomic;
use panelfit_core::error::{PipelineError, Result};

use crate::diagnostics::OverIdentification;
use crate::estimator::{ModelEstimate, ModelKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub model_type: String,
    pub spec_name: String,
    pub parameter: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub baseline_mean: f64,
    /// First-stage partial F for endogenous parameters under IV; empty for
    /// everything else.
    pub first_stage_diagnostic: Option<f64>,
    pub n_obs: usize,
    pub n_clusters: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstStageRecord {
    pub spec_name: String,
    pub endogenous_var: String,
    pub instrument: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub partial_f: f64,
    pub rank_wald_f: Option<f64>,
    pub underidentification_stat: f64,
    pub underidentification_p: f64,
    pub overid_stat: Option<f64>,
    pub overid_p: Option<f64>,
    pub n_obs: usize,
}

/// One record per estimation unit that errored; the matrix run keeps going
/// and the caller decides the exit status from the collected set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub pipeline: String,
    pub variant: String,
    pub spec: String,
    pub error_kind: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(pipeline: &str, variant: &str, spec: &str, error: &PipelineError) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            variant: variant.to_string(),
            spec: spec.to_string(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultsAggregator {
    estimates: Vec<EstimateRecord>,
    first_stages: Vec<FirstStageRecord>,
    failures: Vec<FailureRecord>,
}

impl ResultsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, estimate: &ModelEstimate) {
        for parameter in &estimate.parameters {
            let first_stage_diagnostic = match estimate.model {
                ModelKind::Iv => estimate
                    .first_stages
                    .iter()
                    .find(|fs| fs.endogenous_var == parameter.name)
                    .map(|fs| fs.partial_f),
                ModelKind::Ols => None,
            };
            self.estimates.push(EstimateRecord {
                model_type: estimate.model.as_str().to_string(),
                spec_name: estimate.spec_name.clone(),
                parameter: parameter.name.clone(),
                coefficient: parameter.coefficient,
                std_error: parameter.std_error,
                p_value: parameter.p_value,
                baseline_mean: estimate.baseline_mean,
                first_stage_diagnostic,
                n_obs: estimate.n_obs,
                n_clusters: estimate.n_clusters,
            });
        }

        let (rank_wald_f, underid_stat, underid_p, overid_stat, overid_p) =
            match &estimate.diagnostics {
                Some(diag) => {
                    let (os, op) = match &diag.over_identification {
                        OverIdentification::ZeroByConstruction => (None, None),
                        OverIdentification::Sargan {
                            statistic, p_value, ..
                        } => (Some(*statistic), Some(*p_value)),
                    };
                    (
                        diag.rank_wald_f,
                        diag.underidentification_stat,
                        diag.underidentification_p,
                        os,
                        op,
                    )
                }
                None => (None, 0.0, 1.0, None, None),
            };
        for first_stage in &estimate.first_stages {
            for instrument in &first_stage.instrument_estimates {
                self.first_stages.push(FirstStageRecord {
                    spec_name: estimate.spec_name.clone(),
                    endogenous_var: first_stage.endogenous_var.clone(),
                    instrument: instrument.name.clone(),
                    coefficient: instrument.coefficient,
                    std_error: instrument.std_error,
                    p_value: instrument.p_value,
                    partial_f: first_stage.partial_f,
                    rank_wald_f,
                    underidentification_stat: underid_stat,
                    underidentification_p: underid_p,
                    overid_stat,
                    overid_p,
                    n_obs: first_stage.n_obs,
                });
            }
        }
    }

    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn estimate_count(&self) -> usize {
        self.estimates.len()
    }

    /// Writes the estimate and first-stage tables; sorts before writing so
    /// that repeated runs over the same inputs are byte-identical. A run in
    /// which no unit completed publishes nothing, so a previously exported
    /// table is never replaced by an empty one.
    pub fn export(&mut self, estimates_path: &Path, first_stage_path: &Path) -> Result<()> {
        if self.estimates.is_empty() {
            warn!("no completed estimates; leaving published artifacts untouched");
            return Ok(());
        }
        self.estimates.sort_by(|a, b| {
            (&a.spec_name, &a.model_type, &a.parameter)
                .cmp(&(&b.spec_name, &b.model_type, &b.parameter))
        });
        self.first_stages.sort_by(|a, b| {
            (&a.spec_name, &a.endogenous_var, &a.instrument)
                .cmp(&(&b.spec_name, &b.endogenous_var, &b.instrument))
        });

        write_csv_atomic(estimates_path, &self.estimates)?;
        write_csv_atomic(first_stage_path, &self.first_stages)?;
        info!(
            estimates = self.estimates.len(),
            first_stage_rows = self.first_stages.len(),
            path = %estimates_path.display(),
            "exported estimation results"
        );
        Ok(())
    }

    pub fn export_failures(&self, path: &Path) -> Result<()> {
        let mut failures = self.failures.clone();
        failures.sort_by(|a, b| (&a.variant, &a.spec).cmp(&(&b.variant, &b.spec)));
        let bytes = serde_json::to_vec_pretty(&failures)?;
        write_bytes_atomic(path, &bytes)
    }
}

fn write_csv_atomic<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Validation(format!("csv buffer flush failed: {e}")))?;
    write_bytes_atomic(path, &bytes)
}
