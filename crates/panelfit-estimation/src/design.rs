// crates/panelfit-estimation/src/design.rs
//
// Pulls a specification's columns out of a panel into dense numeric vectors
// and deterministic integer codes for fixed-effect groups and clusters.
// Code assignment is by sorted key order, so the same panel and spec always
// produce the same design regardless of row arrival order upstream.

use std::collections::BTreeMap;

use polars::prelude::*;

use panelfit_core::error::{PipelineError, Result};

use crate::spec::Specification;

#[derive(Debug, Clone)]
pub struct FeCodes {
    pub name: String,
    pub codes: Vec<usize>,
    pub levels: usize,
}

#[derive(Debug, Clone)]
pub struct ClusterCodes {
    pub codes: Vec<usize>,
    pub groups: usize,
}

#[derive(Debug, Clone)]
pub struct DesignData {
    pub n: usize,
    pub y: Vec<f64>,
    pub endogenous: Vec<(String, Vec<f64>)>,
    pub exogenous: Vec<(String, Vec<f64>)>,
    pub instruments: Vec<(String, Vec<f64>)>,
    pub fe: Vec<FeCodes>,
    pub clusters: ClusterCodes,
    /// Mean of the outcome over the estimation sample, before absorption.
    pub baseline_mean: f64,
}

impl DesignData {
    /// Keep only observations where `mask` is true, recoding FE and cluster
    /// levels densely.
    pub fn retain(&mut self, mask: &[bool]) {
        let filter = |v: &mut Vec<f64>| {
            let mut idx = 0;
            v.retain(|_| {
                let keep = mask[idx];
                idx += 1;
                keep
            });
        };
        filter(&mut self.y);
        for (_, v) in self
            .endogenous
            .iter_mut()
            .chain(self.exogenous.iter_mut())
            .chain(self.instruments.iter_mut())
        {
            filter(v);
        }
        for group in &mut self.fe {
            let kept: Vec<usize> = group
                .codes
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(c, _)| *c)
                .collect();
            let (codes, levels) = recode(&kept);
            group.codes = codes;
            group.levels = levels;
        }
        let kept: Vec<usize> = self
            .clusters
            .codes
            .iter()
            .zip(mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(c, _)| *c)
            .collect();
        let (codes, groups) = recode(&kept);
        self.clusters = ClusterCodes { codes, groups };
        self.n = self.y.len();
    }
}

fn recode(raw: &[usize]) -> (Vec<usize>, usize) {
    let mut map = BTreeMap::new();
    for code in raw {
        let next = map.len();
        map.entry(*code).or_insert(next);
    }
    (raw.iter().map(|c| map[c]).collect(), map.len())
}

pub fn extract(panel: &DataFrame, spec: &Specification) -> Result<DesignData> {
    let numeric_names: Vec<&str> = std::iter::once(spec.outcome.as_str())
        .chain(spec.endogenous.iter().map(|s| s.as_str()))
        .chain(spec.exogenous.iter().map(|s| s.as_str()))
        .chain(spec.excluded_instruments.iter().map(|s| s.as_str()))
        .collect();

    let mut numeric_cols = Vec::with_capacity(numeric_names.len());
    for name in &numeric_names {
        numeric_cols.push(numeric_column(panel, name, &spec.name)?);
    }

    let mut key_names: Vec<&str> = Vec::new();
    for group in &spec.fe_groups {
        for column in &group.columns {
            key_names.push(column.as_str());
        }
    }
    key_names.push(spec.cluster_key.as_str());

    let mut key_cols: BTreeMap<&str, Vec<Option<String>>> = BTreeMap::new();
    for name in &key_names {
        if !key_cols.contains_key(name) {
            key_cols.insert(*name, string_column(panel, name, &spec.name)?);
        }
    }

    let n_rows = panel.height();
    let mut mask = vec![true; n_rows];
    for column in &numeric_cols {
        for (idx, value) in column.iter().enumerate() {
            if value.is_none() {
                mask[idx] = false;
            }
        }
    }
    for column in key_cols.values() {
        for (idx, value) in column.iter().enumerate() {
            if value.is_none() {
                mask[idx] = false;
            }
        }
    }

    let dense = |values: &[Option<f64>]| -> Vec<f64> {
        values
            .iter()
            .zip(mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(v, _)| v.unwrap_or_default())
            .collect()
    };

    let mut cols = numeric_cols.iter();
    let y = dense(cols.next().expect("outcome column extracted"));
    let n = y.len();
    if n == 0 {
        return Err(PipelineError::DegenerateSample(format!(
            "spec '{}': no complete observations in the estimation sample",
            spec.name
        )));
    }

    let take_named = |names: &[String], cols: &mut std::slice::Iter<'_, Vec<Option<f64>>>| {
        names
            .iter()
            .map(|name| (name.clone(), dense(cols.next().expect("column extracted"))))
            .collect::<Vec<_>>()
    };
    let endogenous = take_named(&spec.endogenous, &mut cols);
    let exogenous = take_named(&spec.exogenous, &mut cols);
    let instruments = take_named(&spec.excluded_instruments, &mut cols);

    let mut fe = Vec::with_capacity(spec.fe_groups.len());
    for group in &spec.fe_groups {
        let keys = composite_keys(&group.columns, &key_cols, &mask);
        let (codes, levels) = encode_sorted(&keys);
        fe.push(FeCodes {
            name: group.name.clone(),
            codes,
            levels,
        });
    }

    let cluster_keys = composite_keys(
        std::slice::from_ref(&spec.cluster_key),
        &key_cols,
        &mask,
    );
    let (codes, groups) = encode_sorted(&cluster_keys);

    let baseline_mean = y.iter().sum::<f64>() / n as f64;

    Ok(DesignData {
        n,
        y,
        endogenous,
        exogenous,
        instruments,
        fe,
        clusters: ClusterCodes { codes, groups },
        baseline_mean,
    })
}

fn numeric_column(panel: &DataFrame, name: &str, spec: &str) -> Result<Vec<Option<f64>>> {
    let column = panel.column(name).map_err(|_| {
        PipelineError::Validation(format!(
            "spec '{spec}': column '{name}' does not exist in the panel"
        ))
    })?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

fn string_column(panel: &DataFrame, name: &str, spec: &str) -> Result<Vec<Option<String>>> {
    let column = panel.column(name).map_err(|_| {
        PipelineError::Validation(format!(
            "spec '{spec}': key column '{name}' does not exist in the panel"
        ))
    })?;
    let series = column.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Join each retained row's key columns into one interaction key.
fn composite_keys(
    columns: &[String],
    key_cols: &BTreeMap<&str, Vec<Option<String>>>,
    mask: &[bool],
) -> Vec<String> {
    let parts: Vec<&Vec<Option<String>>> = columns
        .iter()
        .map(|c| &key_cols[c.as_str()])
        .collect();
    let mut keys = Vec::new();
    for (idx, keep) in mask.iter().enumerate() {
        if !*keep {
            continue;
        }
        let key = parts
            .iter()
            .map(|col| col[idx].as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        keys.push(key);
    }
    keys
}

fn encode_sorted(keys: &[String]) -> (Vec<usize>, usize) {
    let mut sorted: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let index: BTreeMap<&str, usize> = sorted
        .iter()
        .enumerate()
        .map(|(i, k)| (*k, i))
        .collect();
    (keys.iter().map(|k| index[k.as_str()]).collect(), sorted.len())
}
