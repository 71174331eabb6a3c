// crates/panelfit-core/src/types.rs
//
// Declarative build plan for a (unit, time) panel: raw sources, temporal
// bucketing, derived columns, and variant definitions. Everything here is
// plain data deserialized from the pipeline configuration file; the builder
// interprets it without any ambient state.

use serde::{Deserialize, Serialize};

/// Canonical key column names every panel carries after normalization.
pub const UNIT_COL: &str = "unit_id";
pub const TIME_COL: &str = "time_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
}

/// Per-column temporal aggregation used when collapsing a raw source to the
/// target (unit, bucket) granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Mean,
    LastObserved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAggregation {
    pub column: String,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

/// Maps a raw calendar period index to a coarser bucket index.
///
/// Buckets are half-open ranges of `periods_per_bucket` consecutive periods
/// anchored at `origin_period`, so e.g. monthly data collapses to quarters
/// with `periods_per_bucket = 3`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeBucketing {
    pub origin_period: i64,
    pub periods_per_bucket: i64,
}

impl TimeBucketing {
    pub fn bucket_of(&self, period: i64) -> i64 {
        (period - self.origin_period).div_euclid(self.periods_per_bucket)
    }
}

/// One raw table feeding the panel build.
///
/// The first declared source anchors the panel and must carry a time key;
/// later sources join onto the accumulating master with the declared join
/// kind. A source without a `time_key` is unit-level (one row per unit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    /// Path relative to the configured raw-data directory.
    pub path: String,
    pub unit_key: String,
    #[serde(default)]
    pub time_key: Option<String>,
    /// The complete expected header, keys included. Any header anomaly in
    /// the raw file (missing, extra, duplicated, or whitespace-damaged
    /// column names) fails ingestion.
    pub columns: Vec<ColumnSpec>,
    /// Required for every non-key column of a time-keyed source.
    #[serde(default)]
    pub aggregations: Vec<ColumnAggregation>,
    #[serde(default = "default_join_kind")]
    pub join: JoinKind,
}

fn default_join_kind() -> JoinKind {
    JoinKind::Inner
}

/// Columns computed on the master panel after all joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedColumn {
    /// Buckets elapsed since the unit's founding period.
    Tenure { name: String, founding_column: String },
    /// True for every bucket at or after the threshold.
    PeriodIndicator { name: String, from_time: i64 },
    /// True where the source column clears the threshold.
    TreatmentIndicator {
        name: String,
        column: String,
        threshold: f64,
    },
    /// Rank of the column scaled to [0, 1] over the master panel.
    PercentileRank { name: String, column: String },
    /// Tail-clipped copy of the column; quantiles are computed on the
    /// master panel so variants never shift the clip points.
    Winsorized {
        name: String,
        column: String,
        #[serde(default = "default_winsor_lower")]
        lower: f64,
        #[serde(default = "default_winsor_upper")]
        upper: f64,
    },
}

fn default_winsor_lower() -> f64 {
    0.01
}

fn default_winsor_upper() -> f64 {
    0.99
}

impl DerivedColumn {
    pub fn name(&self) -> &str {
        match self {
            DerivedColumn::Tenure { name, .. }
            | DerivedColumn::PeriodIndicator { name, .. }
            | DerivedColumn::TreatmentIndicator { name, .. }
            | DerivedColumn::PercentileRank { name, .. }
            | DerivedColumn::Winsorized { name, .. } => name,
        }
    }
}

/// Unit-level aggregate predicate evaluated on rows strictly before
/// `before_time`, used by restricted variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPredicate {
    pub column: String,
    pub aggregation: Aggregation,
    pub before_time: i64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// A named, pure transform of the master panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantDef {
    /// The master panel, unchanged.
    Unbalanced { name: String },
    /// Units present in every time bucket of the master panel.
    Balanced { name: String },
    /// Units whose pre-cutoff aggregate satisfies the predicate.
    Restricted {
        name: String,
        predicate: UnitPredicate,
    },
}

impl VariantDef {
    pub fn name(&self) -> &str {
        match self {
            VariantDef::Unbalanced { name }
            | VariantDef::Balanced { name }
            | VariantDef::Restricted { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketing_maps_periods_to_half_open_ranges() {
        let b = TimeBucketing {
            origin_period: 600,
            periods_per_bucket: 3,
        };
        assert_eq!(b.bucket_of(600), 0);
        assert_eq!(b.bucket_of(602), 0);
        assert_eq!(b.bucket_of(603), 1);
        assert_eq!(b.bucket_of(599), -1);
    }
}
