//! Scenario records as read from the parameter file.
//!
//! A scenario is immutable once parsed. Its scalar fields are echoed verbatim
//! as attributes of the stored result.

use crate::pattern::Pattern;
use crate::store::AttrValue;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const EARLY: &str = "early";
pub const LATE: &str = "late";
/// Marker for a query marginalized over the early and late stages.
pub const EARLY_LATE: &str = "early/late";

/// The t-stage a scenario is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TStage {
    Stage(String),
    EarlyLate,
}

impl TStage {
    pub fn early() -> Self {
        Self::Stage(EARLY.to_string())
    }

    pub fn late() -> Self {
        Self::Stage(LATE.to_string())
    }

    /// Whether a patient staged as `value` belongs to this stage.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Stage(stage) => stage == value,
            Self::EarlyLate => value == EARLY || value == LATE,
        }
    }
}

impl From<&str> for TStage {
    fn from(value: &str) -> Self {
        if value == EARLY_LATE {
            Self::EarlyLate
        } else {
            Self::Stage(value.to_string())
        }
    }
}

impl fmt::Display for TStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => f.write_str(stage),
            Self::EarlyLate => f.write_str(EARLY_LATE),
        }
    }
}

impl<'de> Deserialize<'de> for TStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(TStage::from(text.as_str()))
    }
}

impl Serialize for TStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Specificity and sensitivity of a diagnostic channel, written as
/// `[specificity, sensitivity]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct SpSn {
    pub specificity: f64,
    pub sensitivity: f64,
}

impl Default for SpSn {
    fn default() -> Self {
        Self {
            specificity: 1.0,
            sensitivity: 1.0,
        }
    }
}

impl From<[f64; 2]> for SpSn {
    fn from([specificity, sensitivity]: [f64; 2]) -> Self {
        Self {
            specificity,
            sensitivity,
        }
    }
}

impl From<SpSn> for [f64; 2] {
    fn from(value: SpSn) -> Self {
        [value.specificity, value.sensitivity]
    }
}

fn default_modality() -> String {
    "max_llh".to_string()
}

/// Prevalence of a diagnosed pattern, predicted and observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrevalenceScenario {
    pub name: String,
    pub pattern: Pattern,
    pub t_stage: TStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midline_ext: Option<bool>,
    /// Column group of the clinical table the observed count is read from.
    #[serde(default = "default_modality")]
    pub modality: String,
    #[serde(default)]
    pub modality_spsn: SpSn,
    #[serde(default)]
    pub invert: bool,
}

/// Risk of a hidden involvement given a diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScenario {
    pub name: String,
    pub involvement: Pattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_diagnosis: Option<Pattern>,
    #[serde(default)]
    pub given_diagnosis_spsn: SpSn,
    pub t_stage: TStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midline_ext: Option<bool>,
    #[serde(default)]
    pub invert: bool,
}

/// Scalar fields of a serializable record, keyed by field name. Fields that
/// are tables or arrays have no scalar representation and are skipped.
pub fn scalar_metadata<T: Serialize>(record: &T) -> BTreeMap<String, AttrValue> {
    let Ok(toml::Value::Table(fields)) = toml::Value::try_from(record) else {
        return BTreeMap::new();
    };
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            let attr = match value {
                toml::Value::String(s) => AttrValue::Text(s),
                toml::Value::Integer(i) => AttrValue::Int(i),
                toml::Value::Float(f) => AttrValue::Float(f),
                toml::Value::Boolean(b) => AttrValue::Bool(b),
                _ => return None,
            };
            Some((key, attr))
        })
        .collect()
}
