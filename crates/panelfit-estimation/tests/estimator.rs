use anyhow::Result;
use polars::prelude::*;

use panelfit_core::config::AbsorptionSettings;
use panelfit_core::error::PipelineError;
use panelfit_estimation::diagnostics::OverIdentification;
use panelfit_estimation::estimator::{Estimator, ModelKind};
use panelfit_estimation::spec::{FixedEffectGroup, Specification};

fn unit_ids() -> Vec<i64> {
    vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]
}

fn time_ids() -> Vec<i64> {
    vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]
}

/// 4 units x 3 periods, y = 3 + unit effect + time effect + 2x + small noise.
fn two_way_panel() -> Result<DataFrame> {
    let x = vec![1.0, 2.0, 4.0, 2.0, 1.0, 3.0, 5.0, 2.0, 2.0, 3.0, 3.0, 1.0];
    let unit_effect = [0.0, 10.0, 20.0, 30.0];
    let time_effect = [0.0, 1.0, 2.0];
    let noise = [
        0.01, -0.02, 0.01, 0.03, -0.01, -0.02, 0.005, -0.015, 0.01, -0.01, 0.02, -0.01,
    ];
    let y: Vec<f64> = (0..12)
        .map(|i| 3.0 + unit_effect[i / 3] + time_effect[i % 3] + 2.0 * x[i] + noise[i])
        .collect();
    Ok(df!(
        "unit_id" => unit_ids(),
        "time_id" => time_ids(),
        "y" => y,
        "x" => x,
    )?)
}

/// Same shape with an endogenous regressor and one excluded instrument; the
/// structural error is correlated with the first-stage error, so OLS on x is
/// biased while the instrumented estimate has a known closed-form value.
fn iv_panel() -> Result<DataFrame> {
    let z = vec![1.0, 2.0, 3.0, 2.0, 4.0, 1.0, 3.0, 1.0, 5.0, 4.0, 2.0, 2.0];
    let v = [
        0.5, -0.3, 0.2, -0.4, 0.1, 0.3, 0.2, 0.4, -0.6, 0.1, -0.2, 0.1,
    ];
    let shock = [
        0.05, -0.02, 0.03, 0.01, -0.04, 0.02, -0.03, 0.02, 0.01, 0.02, -0.01, -0.02,
    ];
    let unit_effect = [0.0, 10.0, 20.0, 30.0];
    let x: Vec<f64> = (0..12)
        .map(|i| 0.8 * z[i] + v[i] + unit_effect[i / 3] * 0.1)
        .collect();
    let y: Vec<f64> = (0..12)
        .map(|i| 2.0 * x[i] + 1.5 * v[i] + shock[i] + unit_effect[i / 3])
        .collect();
    Ok(df!(
        "unit_id" => unit_ids(),
        "time_id" => time_ids(),
        "y" => y,
        "x" => x,
        "z" => z,
    )?)
}

fn two_way_spec() -> Specification {
    Specification {
        name: "two_way".to_string(),
        outcome: "y".to_string(),
        endogenous: vec![],
        exogenous: vec!["x".to_string()],
        excluded_instruments: vec![],
        fe_groups: vec![
            FixedEffectGroup::single("unit_id"),
            FixedEffectGroup::single("time_id"),
        ],
        cluster_key: "unit_id".to_string(),
    }
}

fn iv_spec() -> Specification {
    Specification {
        name: "iv_unit_fe".to_string(),
        outcome: "y".to_string(),
        endogenous: vec!["x".to_string()],
        exogenous: vec![],
        excluded_instruments: vec!["z".to_string()],
        fe_groups: vec![FixedEffectGroup::single("unit_id")],
        cluster_key: "unit_id".to_string(),
    }
}

#[test]
fn ols_absorption_matches_explicit_dummy_solution() -> Result<()> {
    let panel = two_way_panel()?;
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let estimate = estimator.estimate(&panel, &two_way_spec(), ModelKind::Ols)?;

    assert_eq!(estimate.n_obs, 12);
    assert_eq!(estimate.n_clusters, 4);
    assert_eq!(estimate.parameters.len(), 1);
    let param = &estimate.parameters[0];
    assert_eq!(param.name, "x");
    // Reference values from solving the same system with explicit unit and
    // time dummies.
    assert!((param.coefficient - 2.000970588235304).abs() < 1e-5);
    assert!((param.std_error - 0.0038817264347361944).abs() < 1e-4);
    assert!(param.p_value < 1e-5);
    assert!(estimate.diagnostics.is_none());
    assert!(estimate.first_stages.is_empty());
    Ok(())
}

#[test]
fn iv_estimate_matches_closed_form_wald_ratio() -> Result<()> {
    let panel = iv_panel()?;
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let estimate = estimator.estimate(&panel, &iv_spec(), ModelKind::Iv)?;

    let param = &estimate.parameters[0];
    assert_eq!(param.name, "x");
    // With one endogenous regressor, one instrument, and a single absorbed
    // dimension the estimator reduces to cov(z,y)/cov(z,x) on demeaned data.
    assert!((param.coefficient - 1.7094285714285715).abs() < 1e-8);
    assert!((param.std_error - 0.21561484784531038).abs() < 1e-8);

    assert_eq!(estimate.first_stages.len(), 1);
    let first = &estimate.first_stages[0];
    assert_eq!(first.endogenous_var, "x");
    assert_eq!(first.instrument_estimates.len(), 1);
    assert!((first.instrument_estimates[0].coefficient - 0.6730769230769235).abs() < 1e-8);
    assert!((first.partial_f - 67.87882960864533).abs() < 1e-6);

    let diag = estimate.diagnostics.as_ref().unwrap();
    assert!((diag.underidentification_stat - 10.732433853162785).abs() < 1e-6);
    assert!(diag.underidentification_p < 0.01);
    assert!(diag.rank_wald_f.unwrap() > 10.0);
    assert!(matches!(
        diag.over_identification,
        OverIdentification::ZeroByConstruction
    ));
    Ok(())
}

#[test]
fn iv_recovers_structural_coefficient_when_error_is_orthogonal() -> Result<()> {
    // z has integer within-unit means, u has exact zero within-unit sums and
    // is orthogonal to demeaned z by construction, so the instrumented
    // estimate equals the structural coefficient up to rounding.
    let z = vec![1.0, 2.0, 3.0, 2.0, 4.0, 3.0, 3.0, 1.0, 5.0, 4.0, 2.0, 0.0];
    let u = [
        0.25, -0.5, 0.25, 0.25, 0.25, -0.5, 0.5, -0.25, -0.25, 0.25, -0.5, 0.25,
    ];
    let v = [
        0.25, -0.25, 0.0, 0.0, 0.25, -0.25, -0.5, 0.25, 0.25, 0.25, 0.0, -0.25,
    ];
    let unit_effect = [0.0, 10.0, 20.0, 30.0];
    let x: Vec<f64> = (0..12)
        .map(|i| 0.5 * z[i] + v[i] + unit_effect[i / 3])
        .collect();
    let y: Vec<f64> = (0..12)
        .map(|i| 2.0 * x[i] + u[i] + unit_effect[i / 3])
        .collect();
    let panel = df!(
        "unit_id" => unit_ids(),
        "time_id" => time_ids(),
        "y" => y,
        "x" => x,
        "z" => z,
    )?;

    let estimator = Estimator::new(&AbsorptionSettings::default());
    let estimate = estimator.estimate(&panel, &iv_spec(), ModelKind::Iv)?;
    assert!((estimate.parameters[0].coefficient - 2.0).abs() < 1e-10);
    assert!(estimate.parameters[0].std_error > 0.0);
    assert!(estimate.first_stages[0].partial_f.is_finite());
    Ok(())
}

#[test]
fn ols_on_iv_panel_is_biased_away_from_instrumented_estimate() -> Result<()> {
    let panel = iv_panel()?;
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let mut spec = iv_spec();
    spec.name = "naive".to_string();
    spec.excluded_instruments.clear();
    spec.exogenous = vec!["x".to_string()];
    spec.endogenous.clear();
    let estimate = estimator.estimate(&panel, &spec, ModelKind::Ols)?;
    // The structural error loads on the first-stage error, so the naive
    // estimate must differ visibly from the Wald ratio.
    assert!((estimate.parameters[0].coefficient - 1.7094285714285715).abs() > 0.05);
    Ok(())
}

#[test]
fn underidentified_spec_is_rejected_before_touching_data() -> Result<()> {
    // Deliberately empty frame: validation must fire before extraction.
    let panel = DataFrame::empty();
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let mut spec = iv_spec();
    spec.excluded_instruments.clear();
    let err = estimator
        .estimate(&panel, &spec, ModelKind::Iv)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Identification { .. }));
    Ok(())
}

#[test]
fn single_cluster_sample_is_degenerate() -> Result<()> {
    let panel = df!(
        "unit_id" => [1i64, 1, 1, 1],
        "time_id" => [1i64, 2, 3, 4],
        "y" => [1.0, 3.0, 2.0, 5.0],
        "x" => [0.0, 1.0, 2.0, 4.0],
    )?;
    let spec = Specification {
        name: "one_cluster".to_string(),
        outcome: "y".to_string(),
        endogenous: vec![],
        exogenous: vec!["x".to_string()],
        excluded_instruments: vec![],
        fe_groups: vec![],
        cluster_key: "unit_id".to_string(),
    };
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let err = estimator.estimate(&panel, &spec, ModelKind::Ols).unwrap_err();
    assert!(matches!(err, PipelineError::DegenerateSample(_)));
    Ok(())
}

#[test]
fn collinear_regressor_is_dropped_and_reported() -> Result<()> {
    let mut panel = two_way_panel()?;
    let doubled: Vec<f64> = panel
        .column("x")?
        .f64()?
        .into_no_null_iter()
        .map(|v| 2.0 * v)
        .collect();
    panel.with_column(Series::new("x_doubled".into(), doubled))?;

    let mut spec = two_way_spec();
    spec.exogenous.push("x_doubled".to_string());
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let estimate = estimator.estimate(&panel, &spec, ModelKind::Ols)?;
    assert_eq!(estimate.dropped_collinear, vec!["x_doubled".to_string()]);
    assert_eq!(estimate.parameters.len(), 1);
    assert_eq!(estimate.parameters[0].name, "x");
    Ok(())
}

#[test]
fn fixed_effect_singletons_are_dropped_before_estimation() -> Result<()> {
    let panel = df!(
        "unit_id" => [1i64, 1, 2, 2, 3, 3, 4],
        "time_id" => [1i64, 2, 1, 2, 1, 2, 1],
        "y" => [1.0, 2.1, 2.0, 4.2, 3.0, 6.1, 9.0],
        "x" => [1.0, 2.0, 2.0, 4.0, 3.0, 6.0, 9.0],
    )?;
    let spec = Specification {
        name: "singleton".to_string(),
        outcome: "y".to_string(),
        endogenous: vec![],
        exogenous: vec!["x".to_string()],
        excluded_instruments: vec![],
        fe_groups: vec![FixedEffectGroup::single("unit_id")],
        cluster_key: "unit_id".to_string(),
    };
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let estimate = estimator.estimate(&panel, &spec, ModelKind::Ols)?;
    assert_eq!(estimate.dropped_singletons, 1);
    assert_eq!(estimate.n_obs, 6);
    assert_eq!(estimate.n_clusters, 3);
    Ok(())
}

#[test]
fn outcome_absorbed_entirely_by_fixed_effects_is_degenerate() -> Result<()> {
    // y is a pure unit effect, so nothing is left after absorption.
    let panel = df!(
        "unit_id" => [1i64, 1, 2, 2, 3, 3],
        "time_id" => [1i64, 2, 1, 2, 1, 2],
        "y" => [5.0, 5.0, 8.0, 8.0, 11.0, 11.0],
        "x" => [1.0, 2.0, 3.0, 5.0, 4.0, 9.0],
    )?;
    let spec = Specification {
        name: "flat_outcome".to_string(),
        outcome: "y".to_string(),
        endogenous: vec![],
        exogenous: vec!["x".to_string()],
        excluded_instruments: vec![],
        fe_groups: vec![FixedEffectGroup::single("unit_id")],
        cluster_key: "unit_id".to_string(),
    };
    let estimator = Estimator::new(&AbsorptionSettings::default());
    let err = estimator.estimate(&panel, &spec, ModelKind::Ols).unwrap_err();
    assert!(matches!(err, PipelineError::DegenerateSample(_)));
    Ok(())
}
