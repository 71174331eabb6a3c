// crates/panelfit-estimation/src/inference.rs
//
// Cluster-robust covariance and p-values. Degrees of freedom account for
// absorbed fixed effects, except groups nested entirely inside the cluster
// key, which contribute nothing and are excluded from the count rather than
// merely flagged.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

use panelfit_core::error::{PipelineError, Result};

use crate::design::{ClusterCodes, FeCodes};

#[derive(Debug, Clone)]
pub struct ClusterInference {
    pub vcov: DMatrix<f64>,
    pub std_errors: Vec<f64>,
    pub p_values: Vec<f64>,
    pub clusters: usize,
}

/// Sandwich estimator with the standard finite-sample correction
/// G/(G-1) * (N-1)/(N-K), where K counts both solved regressors and
/// absorbed fixed-effect degrees of freedom.
pub fn cluster_robust(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    beta: &DVector<f64>,
    clusters: &ClusterCodes,
    absorbed_dof: usize,
) -> Result<ClusterInference> {
    let n = x.nrows();
    let k = x.ncols();
    let g = clusters.groups;

    if g < 2 {
        return Err(PipelineError::DegenerateSample(format!(
            "cluster-robust inference requires at least two clusters, found {g}"
        )));
    }
    if g <= k {
        return Err(PipelineError::DegenerateSample(format!(
            "fewer clusters ({g}) than regressors ({k})"
        )));
    }

    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    if rss == 0.0 && n > k {
        // A perfectly fitted outcome has no sampling variation to report.
        return Err(PipelineError::DegenerateSample(
            "zero residual variance in the estimation sample".to_string(),
        ));
    }

    // Score sums per cluster.
    let mut meat = DMatrix::<f64>::zeros(k, k);
    let mut scores = vec![DVector::<f64>::zeros(k); g];
    for i in 0..n {
        let e = residuals[i];
        let cluster = clusters.codes[i];
        for j in 0..k {
            scores[cluster][j] += x[(i, j)] * e;
        }
    }
    for score in &scores {
        meat += score * score.transpose();
    }

    let total_k = k + absorbed_dof;
    let denom = (n as f64 - total_k as f64).max(1.0);
    let correction = (g as f64 / (g as f64 - 1.0)) * ((n as f64 - 1.0) / denom);
    let vcov = xtx_inv * meat * xtx_inv * correction;

    let t_dist = StudentsT::new(0.0, 1.0, (g - 1) as f64).map_err(|err| {
        PipelineError::DegenerateSample(format!("invalid t distribution: {err}"))
    })?;

    let mut std_errors = Vec::with_capacity(k);
    let mut p_values = Vec::with_capacity(k);
    for j in 0..k {
        let variance = vcov[(j, j)].max(0.0);
        let se = variance.sqrt();
        std_errors.push(se);
        let p = if se > 0.0 {
            let t = (beta[j] / se).abs();
            2.0 * (1.0 - t_dist.cdf(t))
        } else {
            0.0
        };
        p_values.push(p);
    }

    Ok(ClusterInference {
        vcov,
        std_errors,
        p_values,
        clusters: g,
    })
}

/// Absorbed degrees of freedom across fixed-effect groups. A group nested
/// inside the cluster key absorbs within-cluster variation the cluster
/// correction already discounts, so it contributes zero.
pub fn absorbed_dof(fe: &[FeCodes], clusters: &ClusterCodes) -> usize {
    fe.iter()
        .map(|group| {
            if nested_in_clusters(group, clusters) {
                0
            } else {
                group.levels.saturating_sub(1)
            }
        })
        .sum()
}

fn nested_in_clusters(group: &FeCodes, clusters: &ClusterCodes) -> bool {
    let mut owner = vec![usize::MAX; group.levels];
    for (code, cluster) in group.codes.iter().zip(clusters.codes.iter()) {
        if owner[*code] == usize::MAX {
            owner[*code] = *cluster;
        } else if owner[*code] != *cluster {
            return false;
        }
    }
    true
}
