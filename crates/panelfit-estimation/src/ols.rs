// crates/panelfit-estimation/src/ols.rs
//
// Least-squares core. Collinear columns surviving absorption are detected
// by sequential orthogonal projection and dropped by name before solving;
// the solve itself goes through SVD so near-degenerate designs fail loudly
// instead of producing garbage coefficients.

use nalgebra::{DMatrix, DVector};

use panelfit_core::error::{PipelineError, Result};

const COLLINEARITY_TOL: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    /// Names of the columns actually solved, in design order.
    pub names: Vec<String>,
    pub beta: DVector<f64>,
    pub fitted: DVector<f64>,
    pub residuals: DVector<f64>,
    pub x: DMatrix<f64>,
    pub xtx_inv: DMatrix<f64>,
    pub dropped: Vec<String>,
}

/// Fit y on the named columns, dropping collinear ones.
pub fn fit(names: &[String], columns: &[Vec<f64>], y: &[f64]) -> Result<LeastSquaresFit> {
    assert_eq!(names.len(), columns.len());
    let n = y.len();

    let (kept_idx, dropped) = screen_collinear(columns, n);
    if kept_idx.is_empty() {
        return Err(PipelineError::DegenerateSample(
            "no regressors with independent variation survive absorption".to_string(),
        ));
    }

    let k = kept_idx.len();
    let mut x = DMatrix::<f64>::zeros(n, k);
    for (j, idx) in kept_idx.iter().enumerate() {
        for (i, value) in columns[*idx].iter().enumerate() {
            x[(i, j)] = *value;
        }
    }
    let y_vec = DVector::from_column_slice(y);

    let beta = solve_least_squares(&x, &y_vec).ok_or_else(|| {
        PipelineError::DegenerateSample(
            "least-squares system is too ill-conditioned to solve".to_string(),
        )
    })?;

    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.try_inverse().ok_or_else(|| {
        PipelineError::DegenerateSample(
            "design cross-product is singular after the collinearity screen".to_string(),
        )
    })?;

    let fitted = &x * &beta;
    let residuals = &y_vec - &fitted;

    Ok(LeastSquaresFit {
        names: kept_idx.iter().map(|i| names[*i].clone()).collect(),
        beta,
        fitted,
        residuals,
        x,
        xtx_inv,
        dropped: dropped.iter().map(|i| names[*i].clone()).collect(),
    })
}

/// Sequential Gram-Schmidt screen: a column whose residual against the
/// previously kept columns is numerically zero is collinear.
fn screen_collinear(columns: &[Vec<f64>], n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut basis: Vec<DVector<f64>> = Vec::new();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();

    for (idx, column) in columns.iter().enumerate() {
        let original = DVector::from_column_slice(column);
        let scale = original.norm().max(1.0);
        let mut residual = original.clone();
        for q in &basis {
            let proj = q.dot(&residual);
            residual -= q * proj;
        }
        if residual.norm() <= COLLINEARITY_TOL * scale * (n as f64).sqrt() {
            dropped.push(idx);
        } else {
            let q = &residual / residual.norm();
            basis.push(q);
            kept.push(idx);
        }
    }
    (kept, dropped)
}

/// SVD least-squares solve with a tolerance ladder for near-singular
/// designs; returns None only when every tolerance fails.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}
