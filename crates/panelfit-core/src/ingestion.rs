// crates/panelfit-core/src/ingestion.rs
//
// Raw source ingestion. Headers are checked with the csv crate before
// polars ever parses the file: a malformed header is a fatal validation
// error, never something to repair in flight. After parsing, each source is
// collapsed to the target (unit, time-bucket) granularity with its declared
// per-column aggregation.

use std::fs::File;

use polars::prelude::*;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::types::{
    Aggregation, ColumnType, SourceSpec, TimeBucketing, TIME_COL, UNIT_COL,
};

/// Read, validate, and normalize one raw source to (unit_id[, time_id])
/// granularity with canonical key names and declared column types.
pub fn load_source(
    config: &PipelineConfig,
    source: &SourceSpec,
    bucketing: &TimeBucketing,
) -> Result<DataFrame> {
    let path = config.source_path(source);
    if !path.is_file() {
        return Err(PipelineError::DataAvailability(format!(
            "raw source '{}' not found at {}",
            source.name,
            path.display()
        )));
    }

    validate_header(&path, source)?;

    let file = File::open(&path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(file)
        .finish()?;

    let typed = apply_declared_types(df, source)?;
    let normalized = normalize(typed, source, bucketing)?;

    debug!(
        source = %source.name,
        rows = normalized.height(),
        "normalized raw source"
    );
    Ok(normalized)
}

/// Fail-fast header validation: the raw header must match the declared
/// column set exactly, with no duplicates and no whitespace damage.
fn validate_header(path: &std::path::Path, source: &SourceSpec) -> Result<()> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(file);

    let mut records = reader.records();
    let header = records
        .next()
        .ok_or_else(|| {
            PipelineError::Validation(format!("source '{}': file is empty", source.name))
        })??;

    let mut seen = std::collections::HashSet::new();
    for field in header.iter() {
        if field.is_empty() {
            return Err(PipelineError::Validation(format!(
                "source '{}': blank column name in header",
                source.name
            )));
        }
        if field != field.trim() || field.starts_with('\u{feff}') {
            return Err(PipelineError::Validation(format!(
                "source '{}': column name '{}' carries stray whitespace or a BOM",
                source.name, field
            )));
        }
        if !seen.insert(field) {
            return Err(PipelineError::Validation(format!(
                "source '{}': duplicate column name '{}'",
                source.name, field
            )));
        }
    }

    let declared: std::collections::HashSet<&str> =
        source.columns.iter().map(|c| c.name.as_str()).collect();
    for field in header.iter() {
        if !declared.contains(field) {
            return Err(PipelineError::Validation(format!(
                "source '{}': undeclared column '{}' in header",
                source.name, field
            )));
        }
    }
    for column in &source.columns {
        if !header.iter().any(|field| field == column.name) {
            return Err(PipelineError::Validation(format!(
                "source '{}': declared column '{}' missing from header",
                source.name, column.name
            )));
        }
    }

    Ok(())
}

fn apply_declared_types(df: DataFrame, source: &SourceSpec) -> Result<DataFrame> {
    let mut exprs = Vec::with_capacity(source.columns.len());
    for column in &source.columns {
        let name = column.name.as_str();
        let expr = if name == source.unit_key || Some(name) == source.time_key.as_deref() {
            col(name).cast(DataType::Int64)
        } else {
            match column.dtype {
                ColumnType::Numeric => col(name).cast(DataType::Float64),
                ColumnType::Categorical => col(name).cast(DataType::String),
                ColumnType::Boolean => col(name).cast(DataType::Boolean),
            }
        };
        exprs.push(expr);
    }
    Ok(df.lazy().select(exprs).collect()?)
}

fn normalize(df: DataFrame, source: &SourceSpec, bucketing: &TimeBucketing) -> Result<DataFrame> {
    let out = match &source.time_key {
        Some(time_key) => {
            let bucket = (col(time_key.as_str()) - lit(bucketing.origin_period))
                .floor_div(lit(bucketing.periods_per_bucket))
                .alias(TIME_COL);

            let mut aggs = Vec::with_capacity(source.aggregations.len());
            for rule in &source.aggregations {
                let c = rule.column.as_str();
                if c == source.unit_key || c == time_key {
                    return Err(PipelineError::Validation(format!(
                        "source '{}': aggregation declared over key column '{c}'",
                        source.name
                    )));
                }
                let expr = match rule.aggregation {
                    Aggregation::Sum => col(c).sum(),
                    Aggregation::Mean => col(c).mean(),
                    Aggregation::LastObserved => col(c)
                        .sort_by([col(time_key.as_str())], SortMultipleOptions::default())
                        .drop_nulls()
                        .last(),
                };
                aggs.push(expr.alias(c));
            }

            for column in &source.columns {
                let name = column.name.as_str();
                let is_key = name == source.unit_key || name == time_key;
                let has_rule = source.aggregations.iter().any(|r| r.column == name);
                if !is_key && !has_rule {
                    return Err(PipelineError::Validation(format!(
                        "source '{}': column '{name}' has no declared aggregation",
                        source.name
                    )));
                }
            }

            df.lazy()
                .with_column(bucket)
                .group_by([col(source.unit_key.as_str()), col(TIME_COL)])
                .agg(aggs)
                .rename([source.unit_key.as_str()], [UNIT_COL], false)
                .sort([UNIT_COL, TIME_COL], SortMultipleOptions::default())
                .collect()?
        }
        None => {
            let renamed = df
                .lazy()
                .rename([source.unit_key.as_str()], [UNIT_COL], false)
                .sort([UNIT_COL], SortMultipleOptions::default())
                .collect()?;
            ensure_unique(&renamed, &[UNIT_COL], &source.name)?;
            renamed
        }
    };
    Ok(out)
}

/// A key collision inside a normalized source would silently duplicate rows
/// through every downstream join, so it is fatal here.
pub fn ensure_unique(df: &DataFrame, keys: &[&str], context: &str) -> Result<()> {
    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let collisions = df
        .clone()
        .lazy()
        .group_by(key_exprs)
        .agg([len().alias("_rows")])
        .filter(col("_rows").gt(lit(1u32)))
        .collect()?;
    if collisions.height() > 0 {
        return Err(PipelineError::JoinConsistency(format!(
            "'{context}': {} duplicated {:?} key(s)",
            collisions.height(),
            keys
        )));
    }
    Ok(())
}
