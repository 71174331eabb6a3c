// crates/panelfit-estimation/src/diagnostics.rs
//
// Identification diagnostics for instrumented specifications: per-regressor
// partial F, a Cragg-Donald-style minimum-eigenvalue rank Wald F, an
// Anderson-style underidentification statistic, and the over-identification
// report (zero by construction when exactly identified).

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use serde::Serialize;

use panelfit_core::error::{PipelineError, Result};

use crate::ols::solve_least_squares;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverIdentification {
    /// Exactly identified: the statistic is zero by construction and is
    /// reported as such rather than omitted.
    ZeroByConstruction,
    Sargan {
        statistic: f64,
        degrees: usize,
        p_value: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct IvDiagnostics {
    /// Minimum-eigenvalue weak-instrument statistic across the endogenous
    /// block; meaningful when several endogenous regressors share
    /// overlapping instruments.
    pub rank_wald_f: Option<f64>,
    pub underidentification_stat: f64,
    pub underidentification_p: f64,
    pub over_identification: OverIdentification,
}

/// Compute the rank diagnostics on the absorbed design.
///
/// `endogenous` and `instruments` are the demeaned columns; `exogenous` are
/// the demeaned included controls, partialled out of both blocks first.
/// `total_k` is the full parameter count (solved + absorbed) used in the
/// Cragg-Donald small-sample scaling.
pub fn rank_diagnostics(
    endogenous: &[Vec<f64>],
    instruments: &[Vec<f64>],
    exogenous: &[Vec<f64>],
    n: usize,
    total_k: usize,
) -> Result<(Option<f64>, f64, f64)> {
    let x = partial_out(to_matrix(endogenous, n), exogenous, n)?;
    let z = partial_out(to_matrix(instruments, n), exogenous, n)?;

    let k_endog = x.ncols();
    let l = z.ncols();
    if k_endog == 0 || l == 0 {
        return Err(PipelineError::Validation(
            "rank diagnostics require at least one endogenous regressor and one instrument"
                .to_string(),
        ));
    }

    // Projection of each endogenous column onto the instrument space.
    let mut fitted = DMatrix::<f64>::zeros(n, k_endog);
    for j in 0..k_endog {
        let column: DVector<f64> = x.column(j).into_owned();
        let gamma = solve_least_squares(&z, &column).ok_or_else(|| {
            PipelineError::DegenerateSample(
                "instrument block is numerically degenerate".to_string(),
            )
        })?;
        fitted.set_column(j, &(&z * gamma));
    }

    let xtx = x.transpose() * &x;
    let explained = symmetrize(x.transpose() * &fitted);
    let unexplained = &xtx - &explained;

    // Smallest canonical correlation between the endogenous block and the
    // instrument block.
    let r2_min = min_generalized_eigenvalue(&explained, &xtx)?;
    let underid_stat = n as f64 * r2_min;
    let underid_df = (l - k_endog + 1) as f64;
    let chi = ChiSquared::new(underid_df).map_err(|err| {
        PipelineError::DegenerateSample(format!("invalid chi-squared distribution: {err}"))
    })?;
    let underid_p = 1.0 - chi.cdf(underid_stat.max(0.0));

    let rank_wald_f = min_generalized_eigenvalue(&explained, &unexplained)
        .ok()
        .map(|lambda| lambda * (n as f64 - total_k as f64) / l as f64);

    Ok((rank_wald_f, underid_stat, underid_p))
}

/// Sargan over-identification statistic: N times the R-squared of the
/// second-stage residuals regressed on the full absorbed instrument set.
pub fn over_identification(
    residuals: &DVector<f64>,
    instruments: &[Vec<f64>],
    exogenous: &[Vec<f64>],
    n: usize,
    k_endogenous: usize,
) -> Result<OverIdentification> {
    let l = instruments.len();
    if l == k_endogenous {
        return Ok(OverIdentification::ZeroByConstruction);
    }

    let mut full: Vec<&Vec<f64>> = instruments.iter().collect();
    full.extend(exogenous.iter());
    let z = DMatrix::<f64>::from_fn(n, full.len(), |i, j| full[j][i]);

    let gamma = solve_least_squares(&z, residuals).ok_or_else(|| {
        PipelineError::DegenerateSample("over-identification design is degenerate".to_string())
    })?;
    let fitted = &z * gamma;

    let tss: f64 = residuals.iter().map(|e| e * e).sum();
    if tss == 0.0 {
        return Err(PipelineError::DegenerateSample(
            "zero residual variance in the over-identification regression".to_string(),
        ));
    }
    let ess: f64 = fitted.iter().map(|v| v * v).sum();
    let statistic = n as f64 * (ess / tss);

    let degrees = l - k_endogenous;
    let chi = ChiSquared::new(degrees as f64).map_err(|err| {
        PipelineError::DegenerateSample(format!("invalid chi-squared distribution: {err}"))
    })?;
    let p_value = 1.0 - chi.cdf(statistic.max(0.0));

    Ok(OverIdentification::Sargan {
        statistic,
        degrees,
        p_value,
    })
}

fn to_matrix(columns: &[Vec<f64>], n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i])
}

/// Residualize every column of `m` against the control columns.
fn partial_out(m: DMatrix<f64>, controls: &[Vec<f64>], n: usize) -> Result<DMatrix<f64>> {
    if controls.is_empty() {
        return Ok(m);
    }
    let w = to_matrix(controls, n);
    let mut out = m.clone();
    for j in 0..m.ncols() {
        let column: DVector<f64> = m.column(j).into_owned();
        let gamma = solve_least_squares(&w, &column).ok_or_else(|| {
            PipelineError::DegenerateSample(
                "control block is numerically degenerate".to_string(),
            )
        })?;
        out.set_column(j, &(&column - &w * gamma));
    }
    Ok(out)
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}

/// Smallest eigenvalue of B^{-1} A via the Cholesky reduction of the
/// generalized symmetric eigenproblem.
fn min_generalized_eigenvalue(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<f64> {
    let chol = Cholesky::new(b.clone()).ok_or_else(|| {
        PipelineError::DegenerateSample(
            "rank diagnostic scale matrix is not positive definite".to_string(),
        )
    })?;
    let l = chol.l();
    let tmp = l.solve_lower_triangular(a).ok_or_else(|| {
        PipelineError::DegenerateSample("rank diagnostic reduction failed".to_string())
    })?;
    let c = l
        .solve_lower_triangular(&tmp.transpose())
        .ok_or_else(|| {
            PipelineError::DegenerateSample("rank diagnostic reduction failed".to_string())
        })?
        .transpose();
    let eigen = SymmetricEigen::new(symmetrize(c));
    Ok(eigen
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min))
}
