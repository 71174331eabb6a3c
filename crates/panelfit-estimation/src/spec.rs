// crates/panelfit-estimation/src/spec.rs
//
// Declarative model specifications. A registry materializes the explicit
// list of (baseline + mechanism combination) specs to run, so the estimation
// matrix is auditable instead of living in dozens of copy-pasted scripts.

use serde::{Deserialize, Serialize};

use panelfit_core::error::{PipelineError, Result};

/// A categorical grouping absorbed by demeaning. More than one column means
/// the interaction of those keys (e.g. sector x time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedEffectGroup {
    pub name: String,
    pub columns: Vec<String>,
}

impl FixedEffectGroup {
    pub fn single(column: &str) -> Self {
        Self {
            name: column.to_string(),
            columns: vec![column.to_string()],
        }
    }

    pub fn interaction(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    pub outcome: String,
    pub endogenous: Vec<String>,
    pub exogenous: Vec<String>,
    pub excluded_instruments: Vec<String>,
    pub fe_groups: Vec<FixedEffectGroup>,
    pub cluster_key: String,
}

impl Specification {
    /// Pre-dispatch validation. The identification requirement is checked
    /// here, before any numeric work begins.
    pub fn validate(&self) -> Result<()> {
        if self.excluded_instruments.len() < self.endogenous.len() {
            return Err(PipelineError::Identification {
                spec: self.name.clone(),
                endogenous: self.endogenous.len(),
                instruments: self.excluded_instruments.len(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for var in self
            .endogenous
            .iter()
            .chain(self.exogenous.iter())
            .chain(self.excluded_instruments.iter())
        {
            if !seen.insert(var.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "spec '{}': variable '{var}' appears in more than one role",
                    self.name
                )));
            }
        }
        if seen.contains(self.outcome.as_str()) {
            return Err(PipelineError::Validation(format!(
                "spec '{}': outcome '{}' also appears as a regressor",
                self.name, self.outcome
            )));
        }
        Ok(())
    }

    pub fn is_exactly_identified(&self) -> bool {
        self.excluded_instruments.len() == self.endogenous.len()
    }
}

/// One candidate explanatory channel: an exogenous control, an endogenous
/// interaction term, and the excluded instrument identifying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismBlock {
    pub name: String,
    pub exogenous: String,
    pub endogenous_interaction: String,
    pub instrument: String,
}

#[derive(Debug, Default)]
pub struct SpecRegistry {
    specs: Vec<Specification>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: Specification) -> Result<()> {
        spec.validate()?;
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(PipelineError::Validation(format!(
                "duplicate specification name '{}'",
                spec.name
            )));
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Extend a baseline with the named mechanism combinations. Each entry
    /// of `combinations` is a list of mechanism names to add together; the
    /// baseline itself is registered first. Only the combinations listed
    /// here are materialized, never the whole power set.
    pub fn compose(
        &mut self,
        baseline: Specification,
        mechanisms: &[MechanismBlock],
        combinations: &[Vec<&str>],
    ) -> Result<()> {
        self.register(baseline.clone())?;

        for combo in combinations {
            let mut spec = baseline.clone();
            let mut suffix = String::new();
            for mech_name in combo {
                let mech = mechanisms
                    .iter()
                    .find(|m| m.name == *mech_name)
                    .ok_or_else(|| {
                        PipelineError::Validation(format!(
                            "unknown mechanism '{mech_name}' in combination for '{}'",
                            baseline.name
                        ))
                    })?;
                spec.exogenous.push(mech.exogenous.clone());
                spec.endogenous.push(mech.endogenous_interaction.clone());
                spec.excluded_instruments.push(mech.instrument.clone());
                suffix.push('_');
                suffix.push_str(&mech.name);
            }
            spec.name = format!("{}{suffix}", baseline.name);
            self.register(spec)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Specification> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specification> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
