//! The parameter file: which spread model to build and which scenarios to
//! evaluate with it.
//!
//! ```toml
//! [model]
//! kind = "midline"       # unilateral | bilateral | midline
//! max_t = 10
//! early_p = 0.3
//!
//! [graph]
//! lnls = ["I", "II", "III", "IV"]
//! edges = [["I", "II"], ["II", "III"], ["III", "IV"]]
//!
//! [[prevalences]]
//! name = "early_II_only"
//! t_stage = "early"
//! [prevalences.pattern.ipsi]
//! II = true
//! III = false
//! ```

use crate::scenario::{PrevalenceScenario, RiskScenario, SpSn, TStage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read parameter file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML parameter file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Scenario name '{0}' is used more than once.")]
    DuplicateName(String),
    #[error(
        "Scenario '{name}' has specificity/sensitivity {value:?}; both must lie in [0.5, 1]."
    )]
    InvalidSpSn { name: String, value: [f64; 2] },
    #[error("Risk scenario '{0}' uses 'early/late'; risks need a specific t-stage.")]
    EarlyLateRisk(String),
}

fn default_max_t() -> usize {
    10
}

fn default_early_p() -> f64 {
    0.3
}

/// Structure of the spread model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub kind: String,
    /// Last time step of the diagnosis time distributions.
    #[serde(default = "default_max_t")]
    pub max_t: usize,
    /// Binomial parameter of the early-stage diagnosis time distribution.
    #[serde(default = "default_early_p")]
    pub early_p: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            kind: "unilateral".to_string(),
            max_t: default_max_t(),
            early_p: default_early_p(),
        }
    }
}

/// Lymph node levels and the directed edges of lymphatic spread between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSettings {
    pub lnls: Vec<String>,
    #[serde(default)]
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsFile {
    pub model: ModelSettings,
    pub graph: GraphSettings,
    #[serde(default)]
    pub prevalences: Vec<PrevalenceScenario>,
    #[serde(default)]
    pub risks: Vec<RiskScenario>,
}

impl ParamsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let params = Self::parse(&text)?;
        log::info!(
            "Read {} prevalence and {} risk scenarios from '{}'.",
            params.prevalences.len(),
            params.risks.len(),
            path.display()
        );
        Ok(params)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let names = self
            .prevalences
            .iter()
            .map(|s| &s.name)
            .chain(self.risks.iter().map(|s| &s.name));
        for name in names {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }

        let channels = self
            .prevalences
            .iter()
            .map(|s| (&s.name, s.modality_spsn))
            .chain(self.risks.iter().map(|s| (&s.name, s.given_diagnosis_spsn)));
        for (name, spsn) in channels {
            if !valid_spsn(spsn) {
                return Err(ConfigError::InvalidSpSn {
                    name: name.clone(),
                    value: spsn.into(),
                });
            }
        }

        if let Some(risk) = self.risks.iter().find(|s| s.t_stage == TStage::EarlyLate) {
            return Err(ConfigError::EarlyLateRisk(risk.name.clone()));
        }
        Ok(())
    }
}

fn valid_spsn(spsn: SpSn) -> bool {
    let range = 0.5..=1.0;
    range.contains(&spsn.specificity) && range.contains(&spsn.sensitivity)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [model]
        kind = "bilateral"

        [graph]
        lnls = ["II", "III"]
        edges = [["II", "III"]]
    "#;

    #[test]
    fn parses_model_graph_and_scenarios() {
        let text = format!(
            "{BASE}
            [[prevalences]]
            name = \"II\"
            t_stage = \"early\"
            [prevalences.pattern.ipsi]
            II = true

            [[risks]]
            name = \"III_given_II\"
            t_stage = \"late\"
            given_diagnosis_spsn = [0.76, 0.81]
            [risks.involvement.ipsi]
            III = true
            [risks.given_diagnosis.ipsi]
            II = true
            "
        );
        let params = ParamsFile::parse(&text).unwrap();
        assert_eq!(params.model.max_t, 10);
        assert_eq!(params.graph.edges, vec![("II".to_string(), "III".to_string())]);
        assert_eq!(params.prevalences.len(), 1);
        assert_eq!(params.risks[0].given_diagnosis_spsn.sensitivity, 0.81);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = format!(
            "{BASE}
            [[prevalences]]
            name = \"same\"
            t_stage = \"early\"
            pattern = {{}}

            [[risks]]
            name = \"same\"
            t_stage = \"early\"
            involvement = {{}}
            "
        );
        let err = ParamsFile::parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "same"));
    }

    #[test]
    fn early_late_risks_are_rejected() {
        let text = format!(
            "{BASE}
            [[risks]]
            name = \"marginal\"
            t_stage = \"early/late\"
            involvement = {{}}
            "
        );
        assert!(matches!(
            ParamsFile::parse(&text),
            Err(ConfigError::EarlyLateRisk(_))
        ));
    }

    #[test]
    fn channels_below_chance_are_rejected() {
        let text = format!(
            "{BASE}
            [[prevalences]]
            name = \"bad\"
            t_stage = \"early\"
            modality_spsn = [0.3, 0.9]
            pattern = {{}}
            "
        );
        assert!(matches!(
            ParamsFile::parse(&text),
            Err(ConfigError::InvalidSpSn { .. })
        ));
    }
}
