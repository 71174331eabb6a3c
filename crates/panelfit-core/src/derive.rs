// crates/panelfit-core/src/derive.rs

use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::types::{DerivedColumn, TimeBucketing, TIME_COL};

/// Compute every declared derived column on the master panel, in declaration
/// order so later derivations can reference earlier ones.
pub fn apply_derived(
    master: DataFrame,
    derived: &[DerivedColumn],
    bucketing: &TimeBucketing,
) -> Result<DataFrame> {
    let mut df = master;
    for rule in derived {
        if df.get_column_names().iter().any(|c| c.as_str() == rule.name()) {
            return Err(PipelineError::Validation(format!(
                "derived column '{}' collides with an existing column",
                rule.name()
            )));
        }
        df = apply_one(df, rule, bucketing)?;
    }
    Ok(df)
}

fn apply_one(df: DataFrame, rule: &DerivedColumn, bucketing: &TimeBucketing) -> Result<DataFrame> {
    let expr = match rule {
        DerivedColumn::Tenure {
            name,
            founding_column,
        } => {
            let founding_bucket = (col(founding_column.as_str()).cast(DataType::Int64)
                - lit(bucketing.origin_period))
            .floor_div(lit(bucketing.periods_per_bucket));
            (col(TIME_COL) - founding_bucket).alias(name.as_str())
        }
        DerivedColumn::PeriodIndicator { name, from_time } => {
            col(TIME_COL).gt_eq(lit(*from_time)).alias(name.as_str())
        }
        DerivedColumn::TreatmentIndicator {
            name,
            column,
            threshold,
        } => col(column.as_str())
            .gt_eq(lit(*threshold))
            .alias(name.as_str()),
        DerivedColumn::PercentileRank { name, column } => {
            let rank = col(column.as_str())
                .rank(
                    RankOptions {
                        method: RankMethod::Average,
                        descending: false,
                    },
                    None,
                )
                .cast(DataType::Float64);
            let raw_denom = col(column.as_str()).count().cast(DataType::Float64) - lit(1.0);
            let denom = when(raw_denom.clone().lt(lit(1.0)))
                .then(lit(1.0))
                .otherwise(raw_denom);
            ((rank - lit(1.0)) / denom).alias(name.as_str())
        }
        DerivedColumn::Winsorized {
            name,
            column,
            lower,
            upper,
        } => {
            let series = df.column(column.as_str())?.as_materialized_series();
            let values = series.cast(&DataType::Float64)?;
            let chunked = values.f64()?;
            let lo = chunked
                .quantile(*lower, QuantileMethod::Linear)?
                .ok_or_else(|| {
                    PipelineError::DegenerateSample(format!(
                        "cannot winsorize '{column}': no non-null values"
                    ))
                })?;
            let hi = chunked
                .quantile(*upper, QuantileMethod::Linear)?
                .ok_or_else(|| {
                    PipelineError::DegenerateSample(format!(
                        "cannot winsorize '{column}': no non-null values"
                    ))
                })?;
            let base = col(column.as_str()).cast(DataType::Float64);
            when(base.clone().lt(lit(lo)))
                .then(lit(lo))
                .otherwise(
                    when(base.clone().gt(lit(hi)))
                        .then(lit(hi))
                        .otherwise(base),
                )
                .alias(name.as_str())
        }
    };
    Ok(df.lazy().with_column(expr).collect()?)
}
