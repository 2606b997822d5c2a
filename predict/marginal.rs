//! # Marginalization Engine
//!
//! Predicted prevalence of a synthetic diagnosis for one posterior sample.
//! Nuisance variables the scenario leaves open (the t-stage for
//! `"early/late"` queries, midline extension when unknown) are summed out
//! with weights estimated from the clinical table once per scenario.

use crate::matcher::{SchemaError, midline_selector, stage_selector};
use crate::model::{ModelCapability, ModelError, SyntheticDiagnosis};
use crate::samples::SampleError;
use crate::scenario::{EARLY, LATE, PrevalenceScenario, TStage};
use crate::table::ClinicalTable;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("The {0} prior is required but could not be estimated from the data.")]
    MissingPrior(&'static str),
    #[error("t-stage '{0}' is not supported here; risks need a specific t-stage.")]
    UnsupportedStage(String),
    #[error("Samples have {found} parameters, but the model expects {expected}.")]
    ParamCount { expected: usize, found: usize },
}

/// Fraction of all rows staged as `stage`. `None` for an empty table.
pub fn stage_probability(
    table: &ClinicalTable,
    stage: &TStage,
) -> Result<Option<f64>, SchemaError> {
    let mask = stage_selector(table, stage)?;
    if mask.is_empty() {
        return Ok(None);
    }
    let matched = mask.iter().filter(|m| **m).count();
    Ok(Some(matched as f64 / mask.len() as f64))
}

/// Fraction of the rows staged as `stage` that show midline extension.
///
/// `None` for unilateral tables, which carry no midline information, and
/// when no row is staged as `stage`.
pub fn midline_ext_probability(
    table: &ClinicalTable,
    stage: &TStage,
) -> Result<Option<f64>, SchemaError> {
    if table.depth() == 2 {
        return Ok(None);
    }
    let eligible = stage_selector(table, stage)?;
    let extended = &eligible & &midline_selector(table, Some(true))?;
    let num_eligible = eligible.iter().filter(|m| **m).count();
    if num_eligible == 0 {
        return Ok(None);
    }
    let num_extended = extended.iter().filter(|m| **m).count();
    Ok(Some(num_extended as f64 / num_eligible as f64))
}

/// Probability that a tumor has crossed the midline by the time of diagnosis.
///
/// `pmf[t]` is the probability of diagnosis at step `t`, `rates[t]` the
/// probability of crossing during step `t`. Steps past the end of `rates`
/// have zero hazard.
pub fn cumulative_midline_probability(pmf: ArrayView1<f64>, rates: ArrayView1<f64>) -> f64 {
    let mut lateral = 1.0;
    let mut lateral_at_diagnosis = 0.0;
    for (t, p) in pmf.iter().enumerate() {
        lateral *= 1.0 - rates.get(t).copied().unwrap_or(0.0);
        lateral_at_diagnosis += p * lateral;
    }
    1.0 - lateral_at_diagnosis
}

/// Empirical weights of the nuisance variables, estimated once per scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScenarioPriors {
    /// Share of early-stage patients, for `"early/late"` queries.
    pub early_prob: Option<f64>,
    /// Share of extended tumors among the stage-eligible patients.
    pub midline_ext_prob: Option<f64>,
}

impl ScenarioPriors {
    /// Estimates the priors a query actually needs from `table`; the others
    /// stay `None`.
    pub fn resolve(
        table: &ClinicalTable,
        model: &ModelCapability,
        t_stage: &TStage,
        midline_ext: Option<bool>,
    ) -> Result<Self, SchemaError> {
        let early_prob = match t_stage {
            TStage::EarlyLate => stage_probability(table, &TStage::early())?,
            TStage::Stage(_) => None,
        };
        let midline_ext_prob = if model.supports_midline() && midline_ext.is_none() {
            midline_ext_probability(table, t_stage)?
        } else {
            None
        };
        log::debug!(
            "Resolved priors: early stage {early_prob:?}, midline extension {midline_ext_prob:?}."
        );
        Ok(Self {
            early_prob,
            midline_ext_prob,
        })
    }
}

/// Everything a prevalence prediction needs besides the model and the sample.
#[derive(Debug, Clone)]
pub struct PrevalenceContext {
    pub t_stage: TStage,
    pub midline_ext: Option<bool>,
    pub priors: ScenarioPriors,
    pub diagnosis: SyntheticDiagnosis,
    pub invert: bool,
}

impl PrevalenceContext {
    pub fn new(scenario: &PrevalenceScenario, lnls: &[String], priors: ScenarioPriors) -> Self {
        Self {
            t_stage: scenario.t_stage.clone(),
            midline_ext: scenario.midline_ext,
            priors,
            diagnosis: SyntheticDiagnosis::new(&scenario.pattern, lnls, scenario.modality_spsn),
            invert: scenario.invert,
        }
    }

    /// The concrete stages to evaluate and their weights.
    fn stage_weights(&self) -> Result<Vec<(&str, f64)>, EvalError> {
        match &self.t_stage {
            TStage::Stage(stage) => Ok(vec![(stage.as_str(), 1.0)]),
            TStage::EarlyLate => {
                let early = self.priors.early_prob.ok_or(EvalError::MissingPrior("early stage"))?;
                Ok(vec![(EARLY, early), (LATE, 1.0 - early)])
            }
        }
    }
}

fn conditional(joint: f64, normalizer: f64) -> f64 {
    if normalizer > 0.0 { joint / normalizer } else { 0.0 }
}

/// Predicted prevalence of the context's diagnosis under one sample,
/// inverted to `1 - p` when the context asks for it.
pub fn predict_prevalence(
    model: &ModelCapability,
    params: ArrayView1<f64>,
    context: &PrevalenceContext,
) -> Result<f64, EvalError> {
    let diagnosis = &context.diagnosis;
    let mut prevalence = 0.0;
    for (stage, weight) in context.stage_weights()? {
        let value = match model {
            ModelCapability::Unilateral(model) => model.likelihood(params, diagnosis, stage)?,
            ModelCapability::Bilateral(model) => model.likelihood(params, diagnosis, stage)?,
            ModelCapability::MidlineBilateral(model) => {
                let joint = model.likelihood(params, diagnosis, stage)?;
                let pmf = model.diag_time_pmf(params, stage)?;
                let rates = Array1::from_elem(pmf.len(), model.midline_ext_rate(params)?);
                let extended = cumulative_midline_probability(pmf.view(), rates.view());
                let given_extended = conditional(joint.extended, extended);
                let given_lateral = conditional(joint.lateral, 1.0 - extended);
                match context.midline_ext {
                    Some(true) => given_extended,
                    Some(false) => given_lateral,
                    None => {
                        let ext_prob = context
                            .priors
                            .midline_ext_prob
                            .ok_or(EvalError::MissingPrior("midline extension"))?;
                        ext_prob * given_extended + (1.0 - ext_prob) * given_lateral
                    }
                }
            }
        };
        prevalence += weight * value;
    }
    Ok(if context.invert {
        1.0 - prevalence
    } else {
        prevalence
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphSettings, ModelSettings};
    use crate::model::{RiskQuery, SpreadModel, UnilateralModel};
    use crate::pattern::{Pattern, Status};
    use crate::scenario::SpSn;
    use crate::table::TableColumn;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Likelihood `params[0]` for early and `params[1]` for late patients.
    struct StageLookup {
        lnls: Vec<String>,
    }

    impl SpreadModel for StageLookup {
        fn lnls(&self) -> &[String] {
            &self.lnls
        }

        fn num_params(&self) -> usize {
            2
        }

        fn diag_time_pmf(
            &self,
            _: ArrayView1<f64>,
            _: &str,
        ) -> Result<Array1<f64>, ModelError> {
            Ok(array![1.0])
        }
    }

    impl UnilateralModel for StageLookup {
        fn likelihood(
            &self,
            params: ArrayView1<f64>,
            _: &SyntheticDiagnosis,
            t_stage: &str,
        ) -> Result<f64, ModelError> {
            match t_stage {
                EARLY => Ok(params[0]),
                LATE => Ok(params[1]),
                other => Err(ModelError::UnknownStage(other.to_string())),
            }
        }

        fn risk(&self, _: ArrayView1<f64>, _: &RiskQuery, _: &str) -> Result<f64, ModelError> {
            Ok(0.5)
        }
    }

    fn lookup() -> ModelCapability {
        ModelCapability::Unilateral(Box::new(StageLookup {
            lnls: vec!["II".to_string()],
        }))
    }

    fn context(t_stage: TStage, priors: ScenarioPriors, invert: bool) -> PrevalenceContext {
        PrevalenceContext {
            t_stage,
            midline_ext: None,
            priors,
            diagnosis: SyntheticDiagnosis::new(
                &Pattern::ipsi_only([("II", Status::Involved)]),
                &["II".to_string()],
                SpSn::default(),
            ),
            invert,
        }
    }

    fn midline_reference() -> ModelCapability {
        let settings = ModelSettings {
            kind: "midline".to_string(),
            max_t: 8,
            early_p: 0.3,
        };
        let graph = GraphSettings {
            lnls: vec!["II".into(), "III".into()],
            edges: vec![("II".into(), "III".into())],
        };
        ModelCapability::from_settings(&settings, &graph).unwrap()
    }

    #[test]
    fn zero_rates_never_extend() {
        let pmf = array![0.2, 0.3, 0.5];
        let rates = array![0.0, 0.0, 0.0];
        assert_abs_diff_eq!(
            cumulative_midline_probability(pmf.view(), rates.view()),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn diagnosis_at_first_step_extends_with_first_rate() {
        let pmf = array![1.0, 0.0, 0.0, 0.0];
        let rates = array![0.17, 0.5, 0.9, 0.9];
        assert_abs_diff_eq!(
            cumulative_midline_probability(pmf.view(), rates.view()),
            0.17,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rates_past_the_end_have_no_hazard() {
        let pmf = array![0.0, 0.0, 1.0];
        let short = array![0.5];
        assert_abs_diff_eq!(
            cumulative_midline_probability(pmf.view(), short.view()),
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn early_late_blends_stage_likelihoods() {
        let model = lookup();
        let params = array![0.8, 0.2];
        let priors = ScenarioPriors {
            early_prob: Some(0.35),
            midline_ext_prob: None,
        };
        let predict = |stage: TStage| {
            predict_prevalence(&model, params.view(), &context(stage, priors, false)).unwrap()
        };
        let blended = predict(TStage::EarlyLate);
        let early = predict(TStage::early());
        let late = predict(TStage::late());
        assert_abs_diff_eq!(blended, 0.35 * early + 0.65 * late, epsilon = 1e-9);
    }

    #[test]
    fn inverted_prevalence_is_complement() {
        let model = lookup();
        let params = array![0.8, 0.2];
        let priors = ScenarioPriors {
            early_prob: Some(0.6),
            midline_ext_prob: None,
        };
        for stage in [TStage::early(), TStage::late(), TStage::EarlyLate] {
            let normal =
                predict_prevalence(&model, params.view(), &context(stage.clone(), priors, false))
                    .unwrap();
            let inverted =
                predict_prevalence(&model, params.view(), &context(stage, priors, true)).unwrap();
            assert_abs_diff_eq!(inverted, 1.0 - normal, epsilon = 1e-12);
        }
    }

    #[test]
    fn missing_stage_prior_is_reported() {
        let err = predict_prevalence(
            &lookup(),
            array![0.8, 0.2].view(),
            &context(TStage::EarlyLate, ScenarioPriors::default(), false),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::MissingPrior(_)));
    }

    #[test]
    fn unconstrained_midline_prevalence_is_one() {
        let model = midline_reference();
        let params = array![0.3, 0.1, 0.05, 0.02, 0.5, 0.4, 0.2, 0.5];
        let priors = ScenarioPriors {
            early_prob: Some(0.4),
            midline_ext_prob: Some(0.25),
        };
        for midline_ext in [Some(true), Some(false), None] {
            let ctx = PrevalenceContext {
                t_stage: TStage::EarlyLate,
                midline_ext,
                priors,
                diagnosis: SyntheticDiagnosis::new(
                    &Pattern::default(),
                    model.lnls(),
                    SpSn::default(),
                ),
                invert: false,
            };
            let value = predict_prevalence(&model, params.view(), &ctx).unwrap();
            assert_abs_diff_eq!(value, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn table_priors_count_eligible_rows() {
        let stages = ["early", "early", "late", "late", "late", "unknown"];
        let midline = [Some(true), Some(false), Some(true), None, Some(false), Some(true)];
        let table = ClinicalTable::new(
            3,
            vec![
                TableColumn::text(&["info", "tumor", "t_stage"], &stages),
                TableColumn::flags(&["info", "tumor", "midline_extension"], &midline),
            ],
        )
        .unwrap();

        let early = stage_probability(&table, &TStage::early()).unwrap().unwrap();
        assert_abs_diff_eq!(early, 2.0 / 6.0, epsilon = 1e-12);

        let late = midline_ext_probability(&table, &TStage::late()).unwrap().unwrap();
        assert_abs_diff_eq!(late, 1.0 / 3.0, epsilon = 1e-12);
        let both = midline_ext_probability(&table, &TStage::EarlyLate).unwrap().unwrap();
        assert_abs_diff_eq!(both, 2.0 / 5.0, epsilon = 1e-12);
        assert_eq!(midline_ext_probability(&table, &TStage::from("T4")).unwrap(), None);
    }
}
