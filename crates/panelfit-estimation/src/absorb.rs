// crates/panelfit-estimation/src/absorb.rs
//
// Fixed-effect absorption by alternating projections: every model column is
// demeaned within each group in turn until the total sum of squares stops
// moving. High-cardinality groups are never materialized as dummy columns.

use panelfit_core::error::{PipelineError, Result};

use crate::design::FeCodes;

#[derive(Debug, Clone, Copy)]
pub struct AbsorbOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for AbsorbOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 500,
        }
    }
}

/// Observations that end up alone in a group after other singleton drops
/// contribute nothing to within variation and distort degrees of freedom.
/// Returns the keep-mask; dropping is iterated to a fixpoint because
/// removing one singleton can create another in a different group.
pub fn singleton_mask(fe: &[FeCodes], n: usize) -> Vec<bool> {
    let mut keep = vec![true; n];
    if fe.is_empty() {
        return keep;
    }
    loop {
        let mut changed = false;
        for group in fe {
            let mut counts = vec![0usize; group.levels];
            for (code, kept) in group.codes.iter().zip(keep.iter()) {
                if *kept {
                    counts[*code] += 1;
                }
            }
            for (idx, code) in group.codes.iter().enumerate() {
                if keep[idx] && counts[*code] == 1 {
                    keep[idx] = false;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    keep
}

/// Demean every column within every group until convergence. A single group
/// is an exact projection and finishes in one sweep. Returns the sweep count.
pub fn demean(columns: &mut [&mut Vec<f64>], fe: &[FeCodes], opts: &AbsorbOptions) -> Result<usize> {
    if fe.is_empty() || columns.is_empty() {
        return Ok(0);
    }

    let sweep = |cols: &mut [&mut Vec<f64>]| {
        for group in fe {
            let mut sums = vec![0.0f64; group.levels];
            let mut counts = vec![0usize; group.levels];
            for column in cols.iter_mut() {
                sums.iter_mut().for_each(|s| *s = 0.0);
                counts.iter_mut().for_each(|c| *c = 0);
                for (value, code) in column.iter().zip(group.codes.iter()) {
                    sums[*code] += *value;
                    counts[*code] += 1;
                }
                for (value, code) in column.iter_mut().zip(group.codes.iter()) {
                    *value -= sums[*code] / counts[*code] as f64;
                }
            }
        }
    };

    if fe.len() == 1 {
        sweep(columns);
        return Ok(1);
    }

    let total_ss = |cols: &[&mut Vec<f64>]| -> f64 {
        cols.iter()
            .map(|c| c.iter().map(|v| v * v).sum::<f64>())
            .sum()
    };

    let mut previous = total_ss(columns);
    let mut last_delta = f64::INFINITY;
    for iteration in 1..=opts.max_iterations {
        sweep(columns);
        let current = total_ss(columns);
        last_delta = (previous - current).abs() / previous.max(1.0);
        if last_delta < opts.tolerance {
            return Ok(iteration);
        }
        previous = current;
        // Guard against a degenerate all-zero design short-circuiting the
        // relative-delta criterion.
        if current == 0.0 {
            return Ok(iteration);
        }
    }
    Err(PipelineError::Convergence {
        iterations: opts.max_iterations,
        last_delta,
        tolerance: opts.tolerance,
    })
}
