use anyhow::Result;
use panelfit_core::builder::PanelBuilder;
use panelfit_core::config::{AbsorptionSettings, PipelineConfig};
use panelfit_core::error::PipelineError;
use panelfit_core::types::{
    Aggregation, ColumnAggregation, ColumnSpec, ColumnType, JoinKind, SourceSpec, TimeBucketing,
    UnitPredicate, VariantDef,
};
use panelfit_core::{artifact, variants};
use std::collections::HashSet;
use std::path::Path;

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn outcomes_spec() -> SourceSpec {
    SourceSpec {
        name: "outcomes".into(),
        path: "outcomes.csv".into(),
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
                name: "revenue".into(),
                dtype: ColumnType::Numeric,
            },
        ],
        aggregations: vec![ColumnAggregation {
            column: "revenue".into(),
            aggregation: Aggregation::Sum,
        }],
        join: JoinKind::Inner,
    }
}

fn attributes_spec() -> SourceSpec {
    SourceSpec {
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
    }
}

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        pipeline_name: "test_pipeline".into(),
        raw_dir: root.join("raw"),
        panel_dir: root.join("panels"),
        results_dir: root.join("results"),
        absorption: AbsorptionSettings::default(),
        bucketing: TimeBucketing {
            origin_period: 0,
            periods_per_bucket: 1,
        },
        sources: vec![outcomes_spec(), attributes_spec()],
        derived: vec![],
        required_columns: vec!["revenue".into()],
        variants: vec![
            VariantDef::Unbalanced {
                name: "unbalanced".into(),
            },
            VariantDef::Balanced {
                name: "balanced".into(),
            },
        ],
    }
}

const OUTCOMES: &str = "\
firm_id,month,revenue
1,0,10.0
1,1,11.0
2,0,20.0
2,1,21.0
3,0,30.0
";

const ATTRIBUTES: &str = "\
firm_id,sector
2,manufacturing
3,services
4,services
";

#[test]
fn inner_join_row_count_equals_declared_overlap() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);
    write_file(&cfg.raw_dir.join("attributes.csv"), ATTRIBUTES);

    let report = PanelBuilder::new(&cfg).build()?;

    // Overlapping units {2, 3}: three observation rows survive the join.
    assert_eq!(report.master_rows, 3);
    assert_eq!(report.join_audits.len(), 1);
    assert_eq!(report.join_audits[0].matched, 3);
    assert_eq!(report.join_audits[0].rows_before, 5);
    assert_eq!(report.join_audits[0].rows_after, 3);
    Ok(())
}

#[test]
fn zero_match_join_is_fatal_and_persists_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);
    write_file(
        &cfg.raw_dir.join("attributes.csv"),
        "firm_id,sector\n99,services\n",
    );

    let err = PanelBuilder::new(&cfg).build().unwrap_err();
    assert!(matches!(err, PipelineError::JoinConsistency(_)));
    assert!(!cfg.panel_path("unbalanced").exists());
    assert!(!cfg.panel_path("balanced").exists());
    Ok(())
}

#[test]
fn missing_raw_source_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);

    let err = PanelBuilder::new(&cfg).build().unwrap_err();
    assert!(matches!(err, PipelineError::DataAvailability(_)));
    Ok(())
}

#[test]
fn build_rejects_config_without_sources() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.sources.clear();

    let err = PanelBuilder::new(&cfg).build().unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(err.to_string().contains("no raw sources"));
    Ok(())
}

#[test]
fn complete_case_policy_reports_dropped_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(
        &cfg.raw_dir.join("outcomes.csv"),
        "firm_id,month,revenue\n2,0,20.0\n2,1,\n3,0,30.0\n",
    );
    write_file(&cfg.raw_dir.join("attributes.csv"), ATTRIBUTES);

    let report = PanelBuilder::new(&cfg).build()?;
    assert_eq!(report.rows_dropped_incomplete, 1);
    assert_eq!(report.master_rows, 2);
    Ok(())
}

#[test]
fn rebuild_from_unchanged_inputs_is_byte_identical() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);
    write_file(&cfg.raw_dir.join("attributes.csv"), ATTRIBUTES);

    let first = PanelBuilder::new(&cfg).build()?;
    let second = PanelBuilder::new(&cfg).build()?;

    for (a, b) in first.variants.iter().zip(second.variants.iter()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.content_hash, b.content_hash);
    }
    Ok(())
}

#[test]
fn balanced_variant_units_cover_every_time_bucket() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);
    write_file(&cfg.raw_dir.join("attributes.csv"), ATTRIBUTES);

    PanelBuilder::new(&cfg).build()?;

    let unbalanced = artifact::read_panel(&cfg.panel_path("unbalanced"))?;
    let balanced = artifact::read_panel(&cfg.panel_path("balanced"))?;

    let all_buckets: HashSet<i64> = unbalanced
        .column("time_id")?
        .i64()?
        .into_no_null_iter()
        .collect();

    let units: Vec<i64> = balanced.column("unit_id")?.i64()?.into_no_null_iter().collect();
    let times: Vec<i64> = balanced.column("time_id")?.i64()?.into_no_null_iter().collect();

    let mut per_unit: std::collections::HashMap<i64, HashSet<i64>> = Default::default();
    for (unit, time) in units.iter().zip(times.iter()) {
        per_unit.entry(*unit).or_default().insert(*time);
    }
    assert!(!per_unit.is_empty());
    for buckets in per_unit.values() {
        assert_eq!(buckets, &all_buckets);
    }
    Ok(())
}

#[test]
fn restricted_variant_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = config(dir.path());
    write_file(&cfg.raw_dir.join("outcomes.csv"), OUTCOMES);
    write_file(&cfg.raw_dir.join("attributes.csv"), ATTRIBUTES);
    PanelBuilder::new(&cfg).build()?;

    let master = artifact::read_panel(&cfg.panel_path("unbalanced"))?;
    let def = VariantDef::Restricted {
        name: "high_revenue".into(),
        predicate: UnitPredicate {
            column: "revenue".into(),
            aggregation: Aggregation::Mean,
            before_time: 1,
            min: Some(25.0),
            max: None,
        },
    };
    let a = variants::apply_variant(&master, &def)?;
    let b = variants::apply_variant(&master, &def)?;
    assert_eq!(
        blake3::hash(&artifact::parquet_bytes(&a)?),
        blake3::hash(&artifact::parquet_bytes(&b)?)
    );

    let units: HashSet<i64> = a.column("unit_id")?.i64()?.into_no_null_iter().collect();
    assert_eq!(units, HashSet::from([3]));
    Ok(())
}
