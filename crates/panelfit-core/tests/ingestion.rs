use anyhow::Result;
use panelfit_core::config::{AbsorptionSettings, PipelineConfig};
use panelfit_core::error::PipelineError;
use panelfit_core::ingestion::load_source;
use panelfit_core::types::{
    Aggregation, ColumnAggregation, ColumnSpec, ColumnType, JoinKind, SourceSpec, TimeBucketing,
    VariantDef,
};
use std::path::Path;

fn minimal_config(root: &Path, source: SourceSpec) -> PipelineConfig {
    PipelineConfig {
        pipeline_name: "ingest_test".into(),
        raw_dir: root.to_path_buf(),
        panel_dir: root.join("panels"),
        results_dir: root.join("results"),
        absorption: AbsorptionSettings::default(),
        bucketing: TimeBucketing {
            origin_period: 600,
            periods_per_bucket: 3,
        },
        sources: vec![source],
        derived: vec![],
        required_columns: vec![],
        variants: vec![VariantDef::Unbalanced {
            name: "unbalanced".into(),
        }],
    }
}

fn monthly_source() -> SourceSpec {
    SourceSpec {
        name: "loans".into(),
        path: "loans.csv".into(),
        unit_key: "firm_id".into(),
        time_key: Some("month".into()),
        columns: vec![
            ColumnSpec {
                name: "firm_id".into(),
                dtype: ColumnType::Numeric,
            },
            ColumnSpec {
                name: "month".into(),
                dtype: ColumnType::Numeric,
            },
            ColumnSpec {
                name: "drawn".into(),
                dtype: ColumnType::Numeric,
            },
            ColumnSpec {
                name: "rating".into(),
                dtype: ColumnType::Categorical,
            },
        ],
        aggregations: vec![
            ColumnAggregation {
                column: "drawn".into(),
                aggregation: Aggregation::Sum,
            },
            ColumnAggregation {
                column: "rating".into(),
                aggregation: Aggregation::LastObserved,
            },
        ],
        join: JoinKind::Left,
    }
}

#[test]
fn monthly_rows_collapse_to_quarter_buckets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = monthly_source();
    let cfg = minimal_config(dir.path(), source.clone());
    std::fs::write(
        dir.path().join("loans.csv"),
        "firm_id,month,drawn,rating\n\
         7,600,10.0,A\n\
         7,601,5.0,B\n\
         7,602,1.0,\n\
         7,603,2.0,C\n",
    )?;

    let df = load_source(&cfg, &source, &cfg.bucketing)?;
    assert_eq!(df.height(), 2);

    let drawn: Vec<f64> = df.column("drawn")?.f64()?.into_no_null_iter().collect();
    assert_eq!(drawn, vec![16.0, 2.0]);

    // Last observed skips the trailing null in the first quarter.
    let rating: Vec<&str> = df.column("rating")?.str()?.into_no_null_iter().collect();
    assert_eq!(rating, vec!["B", "C"]);
    Ok(())
}

#[test]
fn duplicate_header_fails_ingestion() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = monthly_source();
    let cfg = minimal_config(dir.path(), source.clone());
    std::fs::write(
        dir.path().join("loans.csv"),
        "firm_id,month,drawn,drawn\n7,600,1.0,2.0\n",
    )?;

    let err = load_source(&cfg, &source, &cfg.bucketing).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[test]
fn whitespace_damaged_header_fails_instead_of_being_repaired() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = monthly_source();
    let cfg = minimal_config(dir.path(), source.clone());
    std::fs::write(
        dir.path().join("loans.csv"),
        "firm_id,month ,drawn,rating\n7,600,1.0,A\n",
    )?;

    let err = load_source(&cfg, &source, &cfg.bucketing).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[test]
fn undeclared_extra_column_fails_ingestion() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = monthly_source();
    let cfg = minimal_config(dir.path(), source.clone());
    std::fs::write(
        dir.path().join("loans.csv"),
        "firm_id,month,drawn,rating,mystery\n7,600,1.0,A,x\n",
    )?;

    let err = load_source(&cfg, &source, &cfg.bucketing).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[test]
fn unit_level_source_with_duplicate_units_is_a_collision() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = SourceSpec {
        name: "attributes".into(),
        path: "attributes.csv".into(),
        unit_key: "firm_id".into(),
        time_key: None,
        columns: vec![
            ColumnSpec {
                name: "firm_id".into(),
                dtype: ColumnType::Numeric,
            },
            ColumnSpec {
                name: "sector".into(),
                dtype: ColumnType::Categorical,
            },
        ],
        aggregations: vec![],
        join: JoinKind::Inner,
    };
    let cfg = minimal_config(dir.path(), source.clone());
    std::fs::write(
        dir.path().join("attributes.csv"),
        "firm_id,sector\n7,services\n7,manufacturing\n",
    )?;

    let err = load_source(&cfg, &source, &cfg.bucketing).unwrap_err();
    assert!(matches!(err, PipelineError::JoinConsistency(_)));
    Ok(())
}
