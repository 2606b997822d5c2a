//! # Scenario Runner
//!
//! Evaluates one scenario over the thinned posterior samples. Everything
//! that depends only on the scenario (priors, synthetic diagnosis) is
//! resolved once up front; the per-sample work is a pure function of the
//! sample, the scenario context and the shared model.

use crate::marginal::{EvalError, PrevalenceContext, ScenarioPriors, predict_prevalence};
use crate::matcher::{ObservedCounts, count_observed};
use crate::model::ModelCapability;
use crate::risk::{RiskContext, predict_risk};
use crate::samples::PosteriorSamples;
use crate::scenario::{PrevalenceScenario, RiskScenario};
use crate::table::ClinicalTable;
use indicatif::ProgressBar;
use ndarray::{Array1, ArrayView1, Axis};
use rayon::prelude::*;

/// How the samples are consumed.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Use every `stride`-th sample, starting with the first.
    pub stride: usize,
    /// Evaluate samples on the rayon pool instead of one after another.
    pub parallel: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stride: 1,
            parallel: false,
        }
    }
}

/// Predicted values of a prevalence scenario and the observed counts they
/// are compared against.
#[derive(Debug, Clone)]
pub struct PrevalenceOutcome {
    pub values: Array1<f64>,
    pub observed: ObservedCounts,
}

pub struct ScenarioRunner<'a> {
    model: &'a ModelCapability,
    samples: &'a PosteriorSamples,
    options: RunOptions,
    progress: ProgressBar,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        model: &'a ModelCapability,
        samples: &'a PosteriorSamples,
        options: RunOptions,
    ) -> Result<Self, EvalError> {
        if samples.num_params() != model.num_params() {
            return Err(EvalError::ParamCount {
                expected: model.num_params(),
                found: samples.num_params(),
            });
        }
        // Reject a zero stride before any scenario is touched.
        samples.thinned(options.stride)?;
        Ok(Self {
            model,
            samples,
            options,
            progress: ProgressBar::hidden(),
        })
    }

    /// Reports every evaluated sample on `progress`. The bar is restarted
    /// for each scenario, with one step per thinned sample.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Number of values every scenario produces.
    pub fn num_predictions(&self) -> Result<usize, EvalError> {
        Ok(self.samples.thinned_len(self.options.stride)?)
    }

    /// Builds the context of a prevalence scenario, estimating its priors
    /// from `table`.
    pub fn prevalence_context(
        &self,
        scenario: &PrevalenceScenario,
        table: &ClinicalTable,
    ) -> Result<PrevalenceContext, EvalError> {
        let priors =
            ScenarioPriors::resolve(table, self.model, &scenario.t_stage, scenario.midline_ext)?;
        Ok(PrevalenceContext::new(scenario, self.model.lnls(), priors))
    }

    /// Lazily predicts one prevalence per thinned sample, in sample order.
    pub fn prevalence_stream(
        &self,
        context: PrevalenceContext,
    ) -> Result<impl Iterator<Item = Result<f64, EvalError>> + 'a, EvalError> {
        self.stream(context, predict_prevalence)
    }

    /// Lazily predicts one risk per thinned sample, in sample order.
    pub fn risk_stream(
        &self,
        context: RiskContext,
    ) -> Result<impl Iterator<Item = Result<f64, EvalError>> + 'a, EvalError> {
        self.stream(context, predict_risk)
    }

    pub fn prevalences(
        &self,
        scenario: &PrevalenceScenario,
        table: &ClinicalTable,
    ) -> Result<PrevalenceOutcome, EvalError> {
        let observed = count_observed(table, scenario, self.model.lnls())?;
        let context = self.prevalence_context(scenario, table)?;
        self.restart_progress(&scenario.name)?;
        let values = self.evaluate(context, predict_prevalence)?;
        log::info!(
            "Scenario '{}': {} of {} patients match, mean prediction {:.4}.",
            scenario.name,
            observed.matched,
            observed.total,
            values.mean().unwrap_or(f64::NAN)
        );
        Ok(PrevalenceOutcome { values, observed })
    }

    pub fn risks(&self, scenario: &RiskScenario) -> Result<Array1<f64>, EvalError> {
        let context = RiskContext::new(scenario, self.model.lnls())?;
        self.restart_progress(&scenario.name)?;
        let values = self.evaluate(context, predict_risk)?;
        log::info!(
            "Scenario '{}': mean risk {:.4}.",
            scenario.name,
            values.mean().unwrap_or(f64::NAN)
        );
        Ok(values)
    }

    fn restart_progress(&self, name: &str) -> Result<(), EvalError> {
        self.progress.reset();
        self.progress.set_length(self.num_predictions()? as u64);
        self.progress.set_message(name.to_string());
        Ok(())
    }

    fn stream<C, F>(
        &self,
        context: C,
        predict: F,
    ) -> Result<impl Iterator<Item = Result<f64, EvalError>> + 'a, EvalError>
    where
        C: 'a,
        F: Fn(&ModelCapability, ArrayView1<f64>, &C) -> Result<f64, EvalError> + 'a,
    {
        let model = self.model;
        Ok(self
            .samples
            .iter_thinned(self.options.stride)?
            .map(move |params| predict(model, params, &context)))
    }

    /// Applies `predict` to every thinned sample. Output index equals thinned
    /// sample index in both modes.
    fn evaluate<C, F>(&self, context: C, predict: F) -> Result<Array1<f64>, EvalError>
    where
        C: Sync + 'a,
        F: Fn(&ModelCapability, ArrayView1<f64>, &C) -> Result<f64, EvalError> + Sync + 'a,
    {
        let progress = &self.progress;
        let values = if self.options.parallel {
            let model = self.model;
            let thinned = self.samples.thinned(self.options.stride)?;
            thinned
                .axis_iter(Axis(0))
                .into_par_iter()
                .map(|params| {
                    let value = predict(model, params, &context);
                    progress.inc(1);
                    value
                })
                .collect::<Result<Vec<f64>, EvalError>>()?
        } else {
            self.stream(context, predict)?
                .inspect(|_| progress.inc(1))
                .collect::<Result<Vec<f64>, EvalError>>()?
        };
        Ok(Array1::from(values))
    }
}
