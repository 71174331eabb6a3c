// crates/panelfit-core/src/config.rs
//
// Immutable pipeline configuration. Loaded once from a TOML file and passed
// by reference into the panel builder and the estimator; no stage reads
// paths or tunables from ambient process state.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::types::{DerivedColumn, SourceSpec, TimeBucketing, VariantDef};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AbsorptionSettings {
    /// Convergence tolerance on the relative change in residual sum of
    /// squares between demeaning sweeps.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for AbsorptionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    pub raw_dir: PathBuf,
    pub panel_dir: PathBuf,
    pub results_dir: PathBuf,
    #[serde(default)]
    pub absorption: AbsorptionSettings,
    pub bucketing: TimeBucketing,
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub derived: Vec<DerivedColumn>,
    /// Complete-case policy: rows with a missing value in any of these
    /// columns are dropped from the master panel, with the count reported.
    #[serde(default)]
    pub required_columns: Vec<String>,
    pub variants: Vec<VariantDef>,
}

impl PipelineConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::DataAvailability(format!(
                "pipeline configuration {} could not be read: {err}",
                path.display()
            ))
        })?;
        let config: PipelineConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Validation(
                "pipeline declares no raw sources".to_string(),
            ));
        }
        if self.sources[0].time_key.is_none() {
            return Err(PipelineError::Validation(format!(
                "anchor source '{}' must declare a time key",
                self.sources[0].name
            )));
        }
        if self.variants.is_empty() {
            return Err(PipelineError::Validation(
                "pipeline declares no panel variants".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for variant in &self.variants {
            if !seen.insert(variant.name()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate variant name '{}'",
                    variant.name()
                )));
            }
        }
        Ok(())
    }

    pub fn source_path(&self, source: &SourceSpec) -> PathBuf {
        self.raw_dir.join(&source.path)
    }

    pub fn panel_path(&self, variant: &str) -> PathBuf {
        self.panel_dir
            .join(&self.pipeline_name)
            .join(format!("panel_{variant}.parquet"))
    }

    pub fn estimates_path(&self, variant: &str) -> PathBuf {
        self.results_dir
            .join(&self.pipeline_name)
            .join(format!("estimates_{variant}.csv"))
    }

    pub fn first_stage_path(&self, variant: &str) -> PathBuf {
        self.results_dir
            .join(&self.pipeline_name)
            .join(format!("first_stage_{variant}.csv"))
    }

    pub fn failures_path(&self, variant: &str) -> PathBuf {
        self.results_dir
            .join(&self.pipeline_name)
            .join(format!("failures_{variant}.json"))
    }

    pub fn build_report_path(&self) -> PathBuf {
        self.panel_dir
            .join(&self.pipeline_name)
            .join("build_report.json")
    }
}
