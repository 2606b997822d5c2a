//! # Progression Model Capability
//!
//! The engine never looks inside a spread model. It sees one of three closed
//! capability variants and calls the operations that variant offers:
//!
//! - [`UnilateralModel`]: one side of the neck.
//! - [`BilateralModel`]: both sides, no notion of midline extension.
//! - [`MidlineModel`]: both sides, with the contralateral spread depending on
//!   whether the tumor has crossed the midline.
//!
//! Everything scenario-specific (the synthetic diagnosis and the
//! specificity/sensitivity of the channel it is observed through) travels in
//! explicit context values, so a model is shared read-only across scenarios
//! and threads.

pub mod spread;

use crate::config::{GraphSettings, ModelSettings};
use crate::pattern::{self, Pattern};
use crate::scenario::SpSn;
use ndarray::{Array1, ArrayView1};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Provided model is no valid spread model: unsupported kind '{0}'.")]
    UnsupportedKind(String),
    #[error("Model expects {expected} parameters per sample, but got {found}.")]
    ParamLength { expected: usize, found: usize },
    #[error("Parameter {index} has value {value}, which is not a probability.")]
    InvalidParam { index: usize, value: f64 },
    #[error("Model has no diagnosis time distribution for t-stage '{0}'.")]
    UnknownStage(String),
    #[error("The given diagnosis has probability zero under the model.")]
    ImpossibleDiagnosis,
    #[error(
        "Graph has {0} lymph node levels; at most {max} are supported.",
        max = spread::MAX_LEVELS
    )]
    TooManyLevels(usize),
    #[error("Graph needs at least one lymph node level.")]
    EmptyGraph,
    #[error("Edge endpoint '{0}' is not a lymph node level of the graph.")]
    UnknownLevel(String),
}

/// The three laterality variants a spread model can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Unilateral,
    Bilateral,
    Midline,
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unilateral" => Ok(Self::Unilateral),
            "bilateral" => Ok(Self::Bilateral),
            "midline" | "midline_bilateral" | "midlinebilateral" => Ok(Self::Midline),
            _ => Err(ModelError::UnsupportedKind(s.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unilateral => "unilateral",
            Self::Bilateral => "bilateral",
            Self::Midline => "midline",
        })
    }
}

/// A synthetic diagnosis together with the channel it is observed through.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticDiagnosis {
    pub pattern: Pattern,
    pub spsn: SpSn,
}

impl SyntheticDiagnosis {
    /// Completes `pattern` over `lnls` so models can index every level.
    pub fn new(pattern: &Pattern, lnls: &[String], spsn: SpSn) -> Self {
        Self {
            pattern: pattern::complete(pattern, lnls),
            spsn,
        }
    }
}

/// Everything a risk query needs besides the parameters and the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskQuery {
    pub involvement: Pattern,
    pub given: SyntheticDiagnosis,
}

/// Joint likelihoods of a diagnosis with and without midline extension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidlineLikelihood {
    pub extended: f64,
    pub lateral: f64,
}

/// Operations every spread model offers.
pub trait SpreadModel: Send + Sync {
    fn lnls(&self) -> &[String];

    /// Length of one posterior sample.
    fn num_params(&self) -> usize;

    /// Distribution over the time step at which a patient of `t_stage` is
    /// diagnosed. Index `t` is time step `t`.
    fn diag_time_pmf(
        &self,
        params: ArrayView1<f64>,
        t_stage: &str,
    ) -> Result<Array1<f64>, ModelError>;
}

pub trait UnilateralModel: SpreadModel {
    /// Probability of observing the `ipsi` side of `diagnosis` in `t_stage`.
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<f64, ModelError>;

    /// Risk of the `ipsi` involvement given the `ipsi` diagnosis.
    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
    ) -> Result<f64, ModelError>;
}

pub trait BilateralModel: SpreadModel {
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<f64, ModelError>;

    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
    ) -> Result<f64, ModelError>;
}

pub trait MidlineModel: SpreadModel {
    /// Joint probabilities of `diagnosis` together with each midline state.
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<MidlineLikelihood, ModelError>;

    /// Risk given the diagnosis and, if known, the midline extension. An
    /// unknown extension is marginalized by the model.
    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
        midline_ext: Option<bool>,
    ) -> Result<f64, ModelError>;

    /// Per-time-step probability that a lateralized tumor crosses the midline.
    fn midline_ext_rate(&self, params: ArrayView1<f64>) -> Result<f64, ModelError>;
}

/// A spread model, tagged with its laterality.
pub enum ModelCapability {
    Unilateral(Box<dyn UnilateralModel>),
    Bilateral(Box<dyn BilateralModel>),
    MidlineBilateral(Box<dyn MidlineModel>),
}

impl fmt::Debug for ModelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCapability")
            .field("kind", &self.kind())
            .field("lnls", &self.lnls())
            .finish()
    }
}

impl ModelCapability {
    /// Builds the reference spread model described by the parameter file.
    pub fn from_settings(
        settings: &ModelSettings,
        graph: &GraphSettings,
    ) -> Result<Self, ModelError> {
        let kind: ModelKind = settings.kind.parse()?;
        let graph = spread::LymphGraph::new(&graph.lnls, &graph.edges)?;
        let prior = spread::TimePrior::new(settings.max_t, settings.early_p)?;
        log::info!(
            "Building {kind} spread model over {} levels with {} edges.",
            graph.lnls().len(),
            graph.num_edges()
        );
        Ok(match kind {
            ModelKind::Unilateral => {
                Self::Unilateral(Box::new(spread::UnilateralSpread::new(graph, prior)))
            }
            ModelKind::Bilateral => {
                Self::Bilateral(Box::new(spread::BilateralSpread::new(graph, prior)))
            }
            ModelKind::Midline => {
                Self::MidlineBilateral(Box::new(spread::MidlineSpread::new(graph, prior)))
            }
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Unilateral(_) => ModelKind::Unilateral,
            Self::Bilateral(_) => ModelKind::Bilateral,
            Self::MidlineBilateral(_) => ModelKind::Midline,
        }
    }

    pub fn supports_bilateral(&self) -> bool {
        !matches!(self, Self::Unilateral(_))
    }

    pub fn supports_midline(&self) -> bool {
        matches!(self, Self::MidlineBilateral(_))
    }

    pub fn lnls(&self) -> &[String] {
        match self {
            Self::Unilateral(model) => model.lnls(),
            Self::Bilateral(model) => model.lnls(),
            Self::MidlineBilateral(model) => model.lnls(),
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Self::Unilateral(model) => model.num_params(),
            Self::Bilateral(model) => model.num_params(),
            Self::MidlineBilateral(model) => model.num_params(),
        }
    }

    /// Header rows of the clinical table layout this model reads.
    pub fn header_rows(&self) -> usize {
        if self.supports_bilateral() { 3 } else { 2 }
    }
}
