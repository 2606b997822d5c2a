//! Risk of a hidden involvement given a (possibly partial) diagnosis.

use crate::marginal::EvalError;
use crate::model::{ModelCapability, RiskQuery, SyntheticDiagnosis};
use crate::pattern;
use crate::scenario::{RiskScenario, TStage};
use ndarray::ArrayView1;

/// Scenario-scoped inputs of a risk prediction, built once per scenario.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub t_stage: String,
    pub midline_ext: Option<bool>,
    pub query: RiskQuery,
    pub invert: bool,
}

impl RiskContext {
    /// Cleans both patterns over `lnls` so models can index every level on
    /// every side. An absent diagnosis becomes an all-unknown one.
    pub fn new(scenario: &RiskScenario, lnls: &[String]) -> Result<Self, EvalError> {
        let t_stage = match &scenario.t_stage {
            TStage::Stage(stage) => stage.clone(),
            TStage::EarlyLate => {
                return Err(EvalError::UnsupportedStage(scenario.t_stage.to_string()));
            }
        };
        let query = RiskQuery {
            involvement: pattern::clean(Some(&scenario.involvement), lnls),
            given: SyntheticDiagnosis {
                pattern: pattern::clean(scenario.given_diagnosis.as_ref(), lnls),
                spsn: scenario.given_diagnosis_spsn,
            },
        };
        Ok(Self {
            t_stage,
            midline_ext: scenario.midline_ext,
            query,
            invert: scenario.invert,
        })
    }
}

/// Predicted risk for one sample, inverted to `1 - r` when asked.
///
/// Midline extension only reaches models that know about it; unilateral
/// models read the `ipsi` parts of the query.
pub fn predict_risk(
    model: &ModelCapability,
    params: ArrayView1<f64>,
    context: &RiskContext,
) -> Result<f64, EvalError> {
    let query = &context.query;
    let stage = context.t_stage.as_str();
    let risk = match model {
        ModelCapability::Unilateral(model) => model.risk(params, query, stage)?,
        ModelCapability::Bilateral(model) => model.risk(params, query, stage)?,
        ModelCapability::MidlineBilateral(model) => {
            model.risk(params, query, stage, context.midline_ext)?
        }
    };
    Ok(if context.invert { 1.0 - risk } else { risk })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphSettings, ModelSettings};
    use crate::model::ModelError;
    use crate::pattern::{Pattern, Side, Status};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn scenario(t_stage: &str, given: Option<Pattern>, invert: bool) -> RiskScenario {
        RiskScenario {
            name: "III".to_string(),
            involvement: Pattern::ipsi_only([("III", Status::Involved)]),
            given_diagnosis: given,
            given_diagnosis_spsn: [0.8, 0.8].into(),
            t_stage: TStage::from(t_stage),
            midline_ext: None,
            invert,
        }
    }

    fn lnls() -> Vec<String> {
        vec!["II".to_string(), "III".to_string()]
    }

    fn model(kind: &str) -> ModelCapability {
        let settings = ModelSettings {
            kind: kind.to_string(),
            ..ModelSettings::default()
        };
        let graph = GraphSettings {
            lnls: lnls(),
            edges: vec![("II".into(), "III".into())],
        };
        ModelCapability::from_settings(&settings, &graph).unwrap()
    }

    #[test]
    fn context_cleans_missing_diagnosis() {
        let context = RiskContext::new(&scenario("early", None, false), &lnls()).unwrap();
        assert_eq!(context.query.given.pattern.ipsi.len(), 2);
        assert_eq!(context.query.given.pattern.status(Side::Contra, "II"), Status::Unknown);
        assert_eq!(context.query.involvement.contra.len(), 2);
    }

    #[test]
    fn early_late_is_not_a_risk_stage() {
        let err = RiskContext::new(&scenario("early/late", None, false), &lnls()).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedStage(stage) if stage == "early/late"));
    }

    #[test]
    fn evidence_of_upstream_involvement_raises_risk() {
        let model = model("unilateral");
        let params = array![0.3, 0.05, 0.4, 0.6];
        let prior = RiskContext::new(&scenario("late", None, false), &lnls()).unwrap();
        let given = Pattern::ipsi_only([("II", Status::Involved)]);
        let posterior = RiskContext::new(&scenario("late", Some(given), false), &lnls()).unwrap();

        let before = predict_risk(&model, params.view(), &prior).unwrap();
        let after = predict_risk(&model, params.view(), &posterior).unwrap();
        assert!(after > before);
        assert!((0.0..=1.0).contains(&after));
    }

    #[test]
    fn inverted_risk_is_complement() {
        let model = model("bilateral");
        let params = array![0.3, 0.1, 0.05, 0.02, 0.4, 0.6];
        let given = Pattern::ipsi_only([("II", Status::Involved)]);
        let normal = RiskContext::new(&scenario("early", Some(given.clone()), false), &lnls())
            .unwrap();
        let inverted = RiskContext::new(&scenario("early", Some(given), true), &lnls()).unwrap();
        let risk = predict_risk(&model, params.view(), &normal).unwrap();
        let complement = predict_risk(&model, params.view(), &inverted).unwrap();
        assert_abs_diff_eq!(risk + complement, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn midline_extension_reaches_midline_models() {
        let model = model("midline");
        let params = array![0.3, 0.1, 0.05, 0.02, 0.5, 0.4, 0.2, 0.5];
        let mut contra = scenario("late", None, false);
        contra.involvement = Pattern {
            ipsi: Default::default(),
            contra: [("II".to_string(), Status::Involved)].into_iter().collect(),
        };
        let mut risks = Vec::new();
        for midline_ext in [Some(true), Some(false)] {
            contra.midline_ext = midline_ext;
            let context = RiskContext::new(&contra, &lnls()).unwrap();
            risks.push(predict_risk(&model, params.view(), &context).unwrap());
        }
        assert!(risks[0] > risks[1]);
    }

    #[test]
    fn impossible_diagnosis_is_reported() {
        let model = model("unilateral");
        // No spread at all, yet level II is diagnosed through a perfect channel.
        let params = array![0.0, 0.0, 0.0, 0.5];
        let given = Pattern::ipsi_only([("II", Status::Involved)]);
        let mut perfect = scenario("early", Some(given), false);
        perfect.given_diagnosis_spsn = Default::default();
        let context = RiskContext::new(&perfect, &lnls()).unwrap();
        let err = predict_risk(&model, params.view(), &context).unwrap_err();
        assert!(matches!(err, EvalError::Model(ModelError::ImpossibleDiagnosis)));
    }
}
