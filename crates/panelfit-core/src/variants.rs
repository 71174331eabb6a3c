// crates/panelfit-core/src/variants.rs
//
// Pure, deterministic transforms of the master panel. Applying the same
// definition to the same master twice yields an identical frame; the output
// is always sorted by (unit_id, time_id).

use polars::prelude::*;

use crate::error::Result;
use crate::types::{Aggregation, UnitPredicate, VariantDef, TIME_COL, UNIT_COL};

pub fn apply_variant(master: &DataFrame, def: &VariantDef) -> Result<DataFrame> {
    let out = match def {
        VariantDef::Unbalanced { .. } => master.clone(),
        VariantDef::Balanced { .. } => balanced(master)?,
        VariantDef::Restricted { predicate, .. } => restricted(master, predicate)?,
    };
    Ok(out
        .lazy()
        .sort([UNIT_COL, TIME_COL], SortMultipleOptions::default())
        .collect()?)
}

/// Keep units observed in every time bucket the master panel contains.
fn balanced(master: &DataFrame) -> Result<DataFrame> {
    let total_buckets = master.column(TIME_COL)?.n_unique()? as u32;

    let complete_units = master
        .clone()
        .lazy()
        .group_by([col(UNIT_COL)])
        .agg([col(TIME_COL).n_unique().alias("_buckets")])
        .filter(col("_buckets").eq(lit(total_buckets)))
        .select([col(UNIT_COL)]);

    let kept = master
        .clone()
        .lazy()
        .join(
            complete_units,
            [col(UNIT_COL)],
            [col(UNIT_COL)],
            JoinArgs::new(JoinType::Semi),
        )
        .collect()?;
    Ok(kept)
}

/// Keep units whose aggregate over rows strictly before the cutoff satisfies
/// the declared bounds. Units with no pre-cutoff rows are dropped.
fn restricted(master: &DataFrame, predicate: &UnitPredicate) -> Result<DataFrame> {
    let value = predicate.column.as_str();
    let agg = match predicate.aggregation {
        Aggregation::Sum => col(value).sum(),
        Aggregation::Mean => col(value).mean(),
        Aggregation::LastObserved => col(value)
            .sort_by([col(TIME_COL)], SortMultipleOptions::default())
            .drop_nulls()
            .last(),
    };

    let mut filter = col("_agg").is_not_null();
    if let Some(min) = predicate.min {
        filter = filter.and(col("_agg").gt_eq(lit(min)));
    }
    if let Some(max) = predicate.max {
        filter = filter.and(col("_agg").lt_eq(lit(max)));
    }

    let qualifying_units = master
        .clone()
        .lazy()
        .filter(col(TIME_COL).lt(lit(predicate.before_time)))
        .group_by([col(UNIT_COL)])
        .agg([agg.cast(DataType::Float64).alias("_agg")])
        .filter(filter)
        .select([col(UNIT_COL)]);

    let kept = master
        .clone()
        .lazy()
        .join(
            qualifying_units,
            [col(UNIT_COL)],
            [col(UNIT_COL)],
            JoinArgs::new(JoinType::Semi),
        )
        .collect()?;
    Ok(kept)
}
