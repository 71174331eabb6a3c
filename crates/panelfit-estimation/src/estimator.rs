// crates/panelfit-estimation/src/estimator.rs
//
// One estimation unit: a panel variant, a specification, and an estimator
// kind in; a structured ModelEstimate out, with first-stage sub-results and
// diagnostics nested in the return value rather than parked in any
// most-recent-model registry.

use nalgebra::{DMatrix, DVector};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::debug;

use panelfit_core::config::AbsorptionSettings;
use panelfit_core::error::{PipelineError, Result};

use crate::absorb::{demean, singleton_mask, AbsorbOptions};
use crate::design::{self, DesignData};
use crate::diagnostics::{self, IvDiagnostics};
use crate::inference::{absorbed_dof, cluster_robust, ClusterInference};
use crate::ols::{self, LeastSquaresFit};
use crate::spec::Specification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ols,
    Iv,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Ols => "ols",
            ModelKind::Iv => "iv",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterEstimate {
    pub name: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirstStageFit {
    pub endogenous_var: String,
    /// Estimates for the excluded instruments only; included controls are
    /// partialled into the fit but not reported here.
    pub instrument_estimates: Vec<ParameterEstimate>,
    /// Cluster-robust joint F of the excluded instruments.
    pub partial_f: f64,
    pub n_obs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEstimate {
    pub spec_name: String,
    pub model: ModelKind,
    pub n_obs: usize,
    pub n_clusters: usize,
    pub baseline_mean: f64,
    pub parameters: Vec<ParameterEstimate>,
    pub dropped_singletons: usize,
    pub dropped_collinear: Vec<String>,
    pub absorb_iterations: usize,
    pub first_stages: Vec<FirstStageFit>,
    pub diagnostics: Option<IvDiagnostics>,
}

pub struct Estimator {
    options: AbsorbOptions,
}

impl Estimator {
    pub fn new(settings: &AbsorptionSettings) -> Self {
        Self {
            options: AbsorbOptions {
                tolerance: settings.tolerance,
                max_iterations: settings.max_iterations,
            },
        }
    }

    pub fn estimate(
        &self,
        panel: &DataFrame,
        spec: &Specification,
        kind: ModelKind,
    ) -> Result<ModelEstimate> {
        spec.validate()?;

        let mut design = design::extract(panel, spec)?;
        let before = design.n;
        let keep = singleton_mask(&design.fe, design.n);
        if keep.iter().any(|k| !k) {
            design.retain(&keep);
        }
        let dropped_singletons = before - design.n;
        if design.n == 0 {
            return Err(PipelineError::DegenerateSample(format!(
                "spec '{}': every observation is a fixed-effect singleton",
                spec.name
            )));
        }

        let absorb_iterations = absorb_all(&mut design, &self.options)?;

        let outcome_scale = design.baseline_mean.abs().max(1.0);
        let y_ss: f64 = design.y.iter().map(|v| v * v).sum();
        if y_ss / design.n as f64 <= (1e-10 * outcome_scale).powi(2) {
            return Err(PipelineError::DegenerateSample(format!(
                "spec '{}': outcome has no residual variance after absorption",
                spec.name
            )));
        }

        let fe_dof = absorbed_dof(&design.fe, &design.clusters);

        let estimate = match kind {
            ModelKind::Ols => self.estimate_ols(spec, &design, fe_dof)?,
            ModelKind::Iv => self.estimate_iv(spec, &design, fe_dof)?,
        };

        debug!(
            spec = %spec.name,
            model = kind.as_str(),
            n_obs = design.n,
            dropped_singletons,
            "estimation unit complete"
        );

        Ok(ModelEstimate {
            dropped_singletons,
            absorb_iterations,
            n_obs: design.n,
            n_clusters: design.clusters.groups,
            baseline_mean: design.baseline_mean,
            ..estimate
        })
    }

    fn estimate_ols(
        &self,
        spec: &Specification,
        design: &DesignData,
        fe_dof: usize,
    ) -> Result<ModelEstimate> {
        let (names, columns) = stack_columns(&[&design.endogenous, &design.exogenous]);
        let fit = ols::fit(&names, &columns, &design.y)?;
        let inference = cluster_robust(
            &fit.x,
            &fit.residuals,
            &fit.xtx_inv,
            &fit.beta,
            &design.clusters,
            fe_dof,
        )?;
        Ok(skeleton(
            spec,
            ModelKind::Ols,
            parameters_of(&fit, &inference),
            fit.dropped.clone(),
            Vec::new(),
            None,
        ))
    }

    fn estimate_iv(
        &self,
        spec: &Specification,
        design: &DesignData,
        fe_dof: usize,
    ) -> Result<ModelEstimate> {
        let n = design.n;
        let (z_names, z_columns) = stack_columns(&[&design.instruments, &design.exogenous]);

        // First stage per endogenous regressor.
        let mut first_stages = Vec::with_capacity(design.endogenous.len());
        let mut fitted_endogenous = Vec::with_capacity(design.endogenous.len());
        for (endog_name, endog_values) in &design.endogenous {
            let fs_fit = ols::fit(&z_names, &z_columns, endog_values)?;
            let fs_inference = cluster_robust(
                &fs_fit.x,
                &fs_fit.residuals,
                &fs_fit.xtx_inv,
                &fs_fit.beta,
                &design.clusters,
                fe_dof,
            )?;

            let instrument_idx: Vec<usize> = fs_fit
                .names
                .iter()
                .enumerate()
                .filter(|(_, name)| design.instruments.iter().any(|(i, _)| i == *name))
                .map(|(idx, _)| idx)
                .collect();
            if instrument_idx.is_empty() {
                return Err(PipelineError::DegenerateSample(format!(
                    "spec '{}': every excluded instrument for '{endog_name}' was dropped as collinear",
                    spec.name
                )));
            }
            let partial_f = wald_f(&fs_fit.beta, &fs_inference, &instrument_idx)?;

            let instrument_estimates = instrument_idx
                .iter()
                .map(|&idx| ParameterEstimate {
                    name: fs_fit.names[idx].clone(),
                    coefficient: fs_fit.beta[idx],
                    std_error: fs_inference.std_errors[idx],
                    p_value: fs_inference.p_values[idx],
                })
                .collect();

            first_stages.push(FirstStageFit {
                endogenous_var: endog_name.clone(),
                instrument_estimates,
                partial_f,
                n_obs: n,
            });
            fitted_endogenous.push((
                endog_name.clone(),
                fs_fit.fitted.iter().copied().collect::<Vec<f64>>(),
            ));
        }

        // Second stage on fitted endogenous values plus included controls.
        let (x_names, x_columns) = stack_columns(&[&fitted_endogenous, &design.exogenous]);
        let fit = ols::fit(&x_names, &x_columns, &design.y)?;

        // Residuals come from the actual regressors, not the fitted ones.
        let actual_residuals = actual_residuals(&fit, design)?;
        let inference = cluster_robust(
            &fit.x,
            &actual_residuals,
            &fit.xtx_inv,
            &fit.beta,
            &design.clusters,
            fe_dof,
        )?;

        let endog_columns: Vec<Vec<f64>> =
            design.endogenous.iter().map(|(_, v)| v.clone()).collect();
        let instr_columns: Vec<Vec<f64>> =
            design.instruments.iter().map(|(_, v)| v.clone()).collect();
        let exog_columns: Vec<Vec<f64>> =
            design.exogenous.iter().map(|(_, v)| v.clone()).collect();

        let total_k = fit.names.len() + fe_dof;
        let (rank_wald_f, underid_stat, underid_p) =
            diagnostics::rank_diagnostics(&endog_columns, &instr_columns, &exog_columns, n, total_k)?;
        let over_identification = diagnostics::over_identification(
            &actual_residuals,
            &instr_columns,
            &exog_columns,
            n,
            design.endogenous.len(),
        )?;

        let diag = IvDiagnostics {
            rank_wald_f,
            underidentification_stat: underid_stat,
            underidentification_p: underid_p,
            over_identification,
        };

        Ok(skeleton(
            spec,
            ModelKind::Iv,
            parameters_of(&fit, &inference),
            fit.dropped.clone(),
            first_stages,
            Some(diag),
        ))
    }
}

fn absorb_all(design: &mut DesignData, options: &AbsorbOptions) -> Result<usize> {
    let DesignData {
        y,
        endogenous,
        exogenous,
        instruments,
        fe,
        ..
    } = design;
    let mut columns: Vec<&mut Vec<f64>> = Vec::new();
    columns.push(y);
    for (_, v) in endogenous.iter_mut() {
        columns.push(v);
    }
    for (_, v) in exogenous.iter_mut() {
        columns.push(v);
    }
    for (_, v) in instruments.iter_mut() {
        columns.push(v);
    }
    demean(&mut columns, fe, options)
}

fn stack_columns(groups: &[&Vec<(String, Vec<f64>)>]) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut names = Vec::new();
    let mut columns = Vec::new();
    for group in groups {
        for (name, values) in group.iter() {
            names.push(name.clone());
            columns.push(values.clone());
        }
    }
    (names, columns)
}

fn parameters_of(fit: &LeastSquaresFit, inference: &ClusterInference) -> Vec<ParameterEstimate> {
    fit.names
        .iter()
        .enumerate()
        .map(|(idx, name)| ParameterEstimate {
            name: name.clone(),
            coefficient: fit.beta[idx],
            std_error: inference.std_errors[idx],
            p_value: inference.p_values[idx],
        })
        .collect()
}

fn skeleton(
    spec: &Specification,
    model: ModelKind,
    parameters: Vec<ParameterEstimate>,
    dropped_collinear: Vec<String>,
    first_stages: Vec<FirstStageFit>,
    diagnostics: Option<IvDiagnostics>,
) -> ModelEstimate {
    ModelEstimate {
        spec_name: spec.name.clone(),
        model,
        n_obs: 0,
        n_clusters: 0,
        baseline_mean: 0.0,
        parameters,
        dropped_singletons: 0,
        dropped_collinear,
        absorb_iterations: 0,
        first_stages,
        diagnostics,
    }
}

/// e = y - X_actual * beta, with the actual (not fitted) endogenous columns
/// matched to the solved coefficient order by name.
fn actual_residuals(fit: &LeastSquaresFit, design: &DesignData) -> Result<DVector<f64>> {
    let n = design.n;
    let k = fit.names.len();
    let mut x_actual = DMatrix::<f64>::zeros(n, k);
    for (j, name) in fit.names.iter().enumerate() {
        let column = design
            .endogenous
            .iter()
            .chain(design.exogenous.iter())
            .find(|(candidate, _)| candidate == name)
            .map(|(_, values)| values)
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "second-stage column '{name}' has no actual counterpart"
                ))
            })?;
        for (i, value) in column.iter().enumerate() {
            x_actual[(i, j)] = *value;
        }
    }
    let y = DVector::from_column_slice(&design.y);
    Ok(y - x_actual * &fit.beta)
}

/// Cluster-robust Wald F over the coefficient subset at `idx`.
fn wald_f(
    beta: &DVector<f64>,
    inference: &ClusterInference,
    idx: &[usize],
) -> Result<f64> {
    let q = idx.len();
    let mut b = DVector::<f64>::zeros(q);
    let mut v = DMatrix::<f64>::zeros(q, q);
    for (row, &i) in idx.iter().enumerate() {
        b[row] = beta[i];
        for (col, &j) in idx.iter().enumerate() {
            v[(row, col)] = inference.vcov[(i, j)];
        }
    }
    let v_inv = v.try_inverse().ok_or_else(|| {
        PipelineError::DegenerateSample(
            "instrument covariance block is singular in the partial-F test".to_string(),
        )
    })?;
    let wald = (b.transpose() * v_inv * &b)[(0, 0)];
    Ok(wald / q as f64)
}
