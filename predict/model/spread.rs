//! Reference hidden Markov spread model.
//!
//! The hidden state of one side is the set of involved lymph node levels,
//! encoded as a bit mask (bit `v` set means level `v` is involved). In every
//! time step a healthy level `v` becomes involved with probability
//!
//! ```text
//! 1 - (1 - b_v) * prod_{u involved, u -> v} (1 - t_uv)
//! ```
//!
//! where `b_v` is the spread probability from the primary tumor and `t_uv`
//! the spread probability along the edge `u -> v`. Involved levels stay
//! involved. The time of diagnosis is binomially distributed over
//! `0..=max_t`, with a fixed parameter for early and a sampled one for late
//! t-stages.

use super::{
    BilateralModel, MidlineLikelihood, MidlineModel, ModelError, RiskQuery, SpreadModel,
    SyntheticDiagnosis, UnilateralModel,
};
use crate::pattern::SidePattern;
use crate::scenario::{EARLY, LATE, SpSn};
use ndarray::{Array1, Array2, ArrayView1, Zip, s};

/// Upper bound on the levels per side; the state space has `2^V` entries.
pub const MAX_LEVELS: usize = 10;

/// Lymph node levels of one side and the edges of spread between them.
#[derive(Debug, Clone)]
pub struct LymphGraph {
    lnls: Vec<String>,
    edges: Vec<(usize, usize)>,
}

impl LymphGraph {
    pub fn new(lnls: &[String], edges: &[(String, String)]) -> Result<Self, ModelError> {
        if lnls.is_empty() {
            return Err(ModelError::EmptyGraph);
        }
        if lnls.len() > MAX_LEVELS {
            return Err(ModelError::TooManyLevels(lnls.len()));
        }
        let index = |name: &String| {
            lnls.iter()
                .position(|lnl| lnl == name)
                .ok_or_else(|| ModelError::UnknownLevel(name.clone()))
        };
        let edges = edges
            .iter()
            .map(|(from, to)| Ok((index(from)?, index(to)?)))
            .collect::<Result<Vec<_>, ModelError>>()?;
        Ok(Self {
            lnls: lnls.to_vec(),
            edges,
        })
    }

    pub fn lnls(&self) -> &[String] {
        &self.lnls
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    fn num_states(&self) -> usize {
        1 << self.lnls.len()
    }

    /// State-to-state transition probabilities for one time step.
    fn transition_matrix(&self, base: ArrayView1<f64>, trans: ArrayView1<f64>) -> Array2<f64> {
        let num_lnls = self.lnls.len();
        let num_states = self.num_states();
        let mut matrix = Array2::zeros((num_states, num_states));

        for from in 0..num_states {
            let spread: Vec<f64> = (0..num_lnls)
                .map(|lnl| {
                    if from & (1 << lnl) != 0 {
                        return 0.0;
                    }
                    let stay_healthy = self
                        .edges
                        .iter()
                        .zip(trans.iter())
                        .filter(|((src, dst), _)| *dst == lnl && from & (1 << *src) != 0)
                        .fold(1.0 - base[lnl], |acc, (_, t)| acc * (1.0 - t));
                    1.0 - stay_healthy
                })
                .collect();

            // Supersets of `from` only: involved levels never heal.
            for to in (0..num_states).filter(|to| to & from == from) {
                matrix[[from, to]] = spread
                    .iter()
                    .enumerate()
                    .filter(|(lnl, _)| from & (1 << *lnl) == 0)
                    .map(|(lnl, p)| if to & (1 << lnl) != 0 { *p } else { 1.0 - p })
                    .product();
            }
        }
        matrix
    }

    /// Probability of observing `diagnosis` from each hidden state.
    fn observation(&self, diagnosis: &SidePattern, spsn: SpSn) -> Array1<f64> {
        Array1::from_shape_fn(self.num_states(), |state| {
            self.lnls
                .iter()
                .enumerate()
                .map(|(lnl, name)| {
                    let involved = state & (1 << lnl) != 0;
                    match diagnosis.get(name).and_then(|s| s.as_bool()) {
                        None => 1.0,
                        Some(true) if involved => spsn.sensitivity,
                        Some(true) => 1.0 - spsn.specificity,
                        Some(false) if involved => 1.0 - spsn.sensitivity,
                        Some(false) => spsn.specificity,
                    }
                })
                .product()
        })
    }

    /// One for every hidden state consistent with `involvement`, else zero.
    fn indicator(&self, involvement: &SidePattern) -> Array1<f64> {
        Array1::from_shape_fn(self.num_states(), |state| {
            let consistent = self.lnls.iter().enumerate().all(|(lnl, name)| {
                match involvement.get(name).and_then(|s| s.as_bool()) {
                    None => true,
                    Some(wanted) => (state & (1 << lnl) != 0) == wanted,
                }
            });
            if consistent { 1.0 } else { 0.0 }
        })
    }
}

/// Distribution over hidden states at every time step, starting healthy.
/// Row `t` holds the distribution after `t` transitions.
fn evolve(transition: &Array2<f64>, max_t: usize) -> Array2<f64> {
    let mut dist = Array2::zeros((max_t + 1, transition.nrows()));
    dist[[0, 0]] = 1.0;
    for t in 0..max_t {
        let next = dist.row(t).dot(transition);
        dist.row_mut(t + 1).assign(&next);
    }
    dist
}

/// Contralateral evolution split by midline extension. Lateral mass crosses
/// the midline with probability `rate` at every step, step 0 included.
fn evolve_midline(
    lateral_transition: &Array2<f64>,
    extended_transition: &Array2<f64>,
    rate: f64,
    max_t: usize,
) -> (Array2<f64>, Array2<f64>) {
    let num_states = lateral_transition.nrows();
    let mut lateral = Array2::zeros((max_t + 1, num_states));
    let mut extended = Array2::zeros((max_t + 1, num_states));
    lateral[[0, 0]] = 1.0 - rate;
    extended[[0, 0]] = rate;
    for t in 0..max_t {
        let moved = lateral.row(t).dot(lateral_transition);
        let kept = extended.row(t).dot(extended_transition);
        lateral.row_mut(t + 1).assign(&(&moved * (1.0 - rate)));
        extended.row_mut(t + 1).assign(&(kept + &moved * rate));
    }
    (lateral, extended)
}

fn binomial_pmf(max_t: usize, p: f64) -> Array1<f64> {
    let mut pmf = Array1::zeros(max_t + 1);
    let mut coefficient = 1.0;
    for k in 0..=max_t {
        if k > 0 {
            coefficient *= (max_t - k + 1) as f64 / k as f64;
        }
        pmf[k] = coefficient * p.powi(k as i32) * (1.0 - p).powi((max_t - k) as i32);
    }
    pmf
}

fn check_probability(index: usize, value: f64) -> Result<f64, ModelError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ModelError::InvalidParam { index, value })
    }
}

/// Diagnosis time distributions per t-stage.
#[derive(Debug, Clone, Copy)]
pub struct TimePrior {
    max_t: usize,
    early_p: f64,
}

impl TimePrior {
    pub fn new(max_t: usize, early_p: f64) -> Result<Self, ModelError> {
        Ok(Self {
            max_t,
            early_p: check_probability(0, early_p)?,
        })
    }

    fn pmf(&self, t_stage: &str, late_p: f64) -> Result<Array1<f64>, ModelError> {
        match t_stage {
            EARLY => Ok(binomial_pmf(self.max_t, self.early_p)),
            LATE => Ok(binomial_pmf(self.max_t, late_p)),
            other => Err(ModelError::UnknownStage(other.to_string())),
        }
    }
}

/// Validates a sample: right length, every entry a probability.
fn check_params(params: ArrayView1<f64>, expected: usize) -> Result<(), ModelError> {
    if params.len() != expected {
        return Err(ModelError::ParamLength {
            expected,
            found: params.len(),
        });
    }
    for (index, value) in params.iter().enumerate() {
        check_probability(index, *value)?;
    }
    Ok(())
}

fn ratio(numerator: f64, denominator: f64) -> Result<f64, ModelError> {
    if denominator <= 0.0 {
        return Err(ModelError::ImpossibleDiagnosis);
    }
    Ok(numerator / denominator)
}

// --- Unilateral ---
//
// Sample layout: V base probabilities, E edge probabilities, late_p.

pub struct UnilateralSpread {
    graph: LymphGraph,
    prior: TimePrior,
}

impl UnilateralSpread {
    pub fn new(graph: LymphGraph, prior: TimePrior) -> Self {
        Self { graph, prior }
    }

    fn setup(
        &self,
        params: ArrayView1<f64>,
        t_stage: &str,
    ) -> Result<(Array2<f64>, Array1<f64>), ModelError> {
        check_params(params, self.num_params())?;
        let v = self.graph.lnls.len();
        let e = self.graph.num_edges();
        let transition = self
            .graph
            .transition_matrix(params.slice(s![..v]), params.slice(s![v..v + e]));
        let pmf = self.prior.pmf(t_stage, params[v + e])?;
        Ok((evolve(&transition, self.prior.max_t), pmf))
    }
}

impl SpreadModel for UnilateralSpread {
    fn lnls(&self) -> &[String] {
        &self.graph.lnls
    }

    fn num_params(&self) -> usize {
        self.graph.lnls.len() + self.graph.num_edges() + 1
    }

    fn diag_time_pmf(
        &self,
        params: ArrayView1<f64>,
        t_stage: &str,
    ) -> Result<Array1<f64>, ModelError> {
        check_params(params, self.num_params())?;
        self.prior.pmf(t_stage, params[params.len() - 1])
    }
}

impl UnilateralModel for UnilateralSpread {
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<f64, ModelError> {
        let (dist, pmf) = self.setup(params, t_stage)?;
        let obs = self.graph.observation(&diagnosis.pattern.ipsi, diagnosis.spsn);
        Ok(pmf.dot(&dist.dot(&obs)))
    }

    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
    ) -> Result<f64, ModelError> {
        let (dist, pmf) = self.setup(params, t_stage)?;
        let obs = self
            .graph
            .observation(&query.given.pattern.ipsi, query.given.spsn);
        let hit = &obs * &self.graph.indicator(&query.involvement.ipsi);
        ratio(pmf.dot(&dist.dot(&hit)), pmf.dot(&dist.dot(&obs)))
    }
}

// --- Bilateral ---
//
// Sample layout: V ipsi base, V contra base, E edge probabilities shared by
// both sides, late_p.

pub struct BilateralSpread {
    graph: LymphGraph,
    prior: TimePrior,
}

struct BilateralSetup {
    ipsi: Array2<f64>,
    contra: Array2<f64>,
    pmf: Array1<f64>,
}

impl BilateralSpread {
    pub fn new(graph: LymphGraph, prior: TimePrior) -> Self {
        Self { graph, prior }
    }

    fn setup(&self, params: ArrayView1<f64>, t_stage: &str) -> Result<BilateralSetup, ModelError> {
        check_params(params, self.num_params())?;
        let v = self.graph.lnls.len();
        let e = self.graph.num_edges();
        let trans = params.slice(s![2 * v..2 * v + e]);
        let ipsi = self.graph.transition_matrix(params.slice(s![..v]), trans);
        let contra = self.graph.transition_matrix(params.slice(s![v..2 * v]), trans);
        Ok(BilateralSetup {
            ipsi: evolve(&ipsi, self.prior.max_t),
            contra: evolve(&contra, self.prior.max_t),
            pmf: self.prior.pmf(t_stage, params[2 * v + e])?,
        })
    }
}

impl SpreadModel for BilateralSpread {
    fn lnls(&self) -> &[String] {
        &self.graph.lnls
    }

    fn num_params(&self) -> usize {
        2 * self.graph.lnls.len() + self.graph.num_edges() + 1
    }

    fn diag_time_pmf(
        &self,
        params: ArrayView1<f64>,
        t_stage: &str,
    ) -> Result<Array1<f64>, ModelError> {
        check_params(params, self.num_params())?;
        self.prior.pmf(t_stage, params[params.len() - 1])
    }
}

impl BilateralModel for BilateralSpread {
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<f64, ModelError> {
        let setup = self.setup(params, t_stage)?;
        let pattern = &diagnosis.pattern;
        let ipsi = setup.ipsi.dot(&self.graph.observation(&pattern.ipsi, diagnosis.spsn));
        let contra = setup
            .contra
            .dot(&self.graph.observation(&pattern.contra, diagnosis.spsn));
        Ok(setup.pmf.dot(&(ipsi * contra)))
    }

    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
    ) -> Result<f64, ModelError> {
        let setup = self.setup(params, t_stage)?;
        let sides = SideTerms::new(&self.graph, query);
        let hit = setup.ipsi.dot(&sides.ipsi_hit) * setup.contra.dot(&sides.contra_hit);
        let all = setup.ipsi.dot(&sides.ipsi_obs) * setup.contra.dot(&sides.contra_obs);
        ratio(setup.pmf.dot(&hit), setup.pmf.dot(&all))
    }
}

/// Observation vectors of a risk query, with and without the involvement
/// indicator applied.
struct SideTerms {
    ipsi_obs: Array1<f64>,
    ipsi_hit: Array1<f64>,
    contra_obs: Array1<f64>,
    contra_hit: Array1<f64>,
}

impl SideTerms {
    fn new(graph: &LymphGraph, query: &RiskQuery) -> Self {
        let given = &query.given;
        let ipsi_obs = graph.observation(&given.pattern.ipsi, given.spsn);
        let contra_obs = graph.observation(&given.pattern.contra, given.spsn);
        let ipsi_hit = &ipsi_obs * &graph.indicator(&query.involvement.ipsi);
        let contra_hit = &contra_obs * &graph.indicator(&query.involvement.contra);
        Self {
            ipsi_obs,
            ipsi_hit,
            contra_obs,
            contra_hit,
        }
    }
}

// --- Midline ---
//
// Sample layout: V ipsi base, V contra base of lateralized tumors, the mixing
// weight alpha, E edge probabilities, the midline extension rate, late_p.
// Contra base probabilities of extended tumors are
// `alpha * ipsi + (1 - alpha) * contra`.

pub struct MidlineSpread {
    graph: LymphGraph,
    prior: TimePrior,
}

struct MidlineSetup {
    ipsi: Array2<f64>,
    lateral: Array2<f64>,
    extended: Array2<f64>,
    pmf: Array1<f64>,
}

impl MidlineSpread {
    pub fn new(graph: LymphGraph, prior: TimePrior) -> Self {
        Self { graph, prior }
    }

    fn setup(&self, params: ArrayView1<f64>, t_stage: &str) -> Result<MidlineSetup, ModelError> {
        check_params(params, self.num_params())?;
        let v = self.graph.lnls.len();
        let e = self.graph.num_edges();
        let ipsi_base = params.slice(s![..v]);
        let lateral_base = params.slice(s![v..2 * v]);
        let alpha = params[2 * v];
        let trans = params.slice(s![2 * v + 1..2 * v + 1 + e]);
        let rate = params[2 * v + 1 + e];
        let late_p = params[2 * v + 2 + e];

        let mut extended_base = Array1::<f64>::zeros(v);
        Zip::from(&mut extended_base)
            .and(&ipsi_base)
            .and(&lateral_base)
            .for_each(|ext, ipsi, lat| *ext = alpha * ipsi + (1.0 - alpha) * lat);

        let ipsi = self.graph.transition_matrix(ipsi_base, trans);
        let lateral = self.graph.transition_matrix(lateral_base, trans);
        let extended = self.graph.transition_matrix(extended_base.view(), trans);
        let (lateral, extended) = evolve_midline(&lateral, &extended, rate, self.prior.max_t);
        Ok(MidlineSetup {
            ipsi: evolve(&ipsi, self.prior.max_t),
            lateral,
            extended,
            pmf: self.prior.pmf(t_stage, late_p)?,
        })
    }
}

impl SpreadModel for MidlineSpread {
    fn lnls(&self) -> &[String] {
        &self.graph.lnls
    }

    fn num_params(&self) -> usize {
        2 * self.graph.lnls.len() + self.graph.num_edges() + 3
    }

    fn diag_time_pmf(
        &self,
        params: ArrayView1<f64>,
        t_stage: &str,
    ) -> Result<Array1<f64>, ModelError> {
        check_params(params, self.num_params())?;
        self.prior.pmf(t_stage, params[params.len() - 1])
    }
}

impl MidlineModel for MidlineSpread {
    fn likelihood(
        &self,
        params: ArrayView1<f64>,
        diagnosis: &SyntheticDiagnosis,
        t_stage: &str,
    ) -> Result<MidlineLikelihood, ModelError> {
        let setup = self.setup(params, t_stage)?;
        let pattern = &diagnosis.pattern;
        let ipsi = setup.ipsi.dot(&self.graph.observation(&pattern.ipsi, diagnosis.spsn));
        let contra_obs = self.graph.observation(&pattern.contra, diagnosis.spsn);
        let extended = &ipsi * &setup.extended.dot(&contra_obs);
        let lateral = &ipsi * &setup.lateral.dot(&contra_obs);
        Ok(MidlineLikelihood {
            extended: setup.pmf.dot(&extended),
            lateral: setup.pmf.dot(&lateral),
        })
    }

    fn risk(
        &self,
        params: ArrayView1<f64>,
        query: &RiskQuery,
        t_stage: &str,
        midline_ext: Option<bool>,
    ) -> Result<f64, ModelError> {
        let setup = self.setup(params, t_stage)?;
        let contra = match midline_ext {
            Some(true) => setup.extended,
            Some(false) => setup.lateral,
            None => setup.extended + &setup.lateral,
        };
        let sides = SideTerms::new(&self.graph, query);
        let hit = setup.ipsi.dot(&sides.ipsi_hit) * contra.dot(&sides.contra_hit);
        let all = setup.ipsi.dot(&sides.ipsi_obs) * contra.dot(&sides.contra_obs);
        ratio(setup.pmf.dot(&hit), setup.pmf.dot(&all))
    }

    fn midline_ext_rate(&self, params: ArrayView1<f64>) -> Result<f64, ModelError> {
        check_params(params, self.num_params())?;
        Ok(params[params.len() - 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marginal::cumulative_midline_probability;
    use crate::pattern::{Pattern, Status};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn graph() -> LymphGraph {
        LymphGraph::new(
            &["II".to_string(), "III".to_string()],
            &[("II".to_string(), "III".to_string())],
        )
        .unwrap()
    }

    #[test]
    fn transition_rows_are_distributions() {
        let matrix = graph().transition_matrix(array![0.3, 0.1].view(), array![0.5].view());
        for row in matrix.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        // From "II involved" level III is reached with 1 - 0.9 * 0.5.
        assert_abs_diff_eq!(matrix[[0b01, 0b11]], 0.55, epsilon = 1e-12);
        assert_eq!(matrix[[0b11, 0b01]], 0.0);
    }

    #[test]
    fn binomial_pmf_sums_to_one() {
        let pmf = binomial_pmf(10, 0.3);
        assert_eq!(pmf.len(), 11);
        assert_abs_diff_eq!(pmf.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(binomial_pmf(4, 0.0)[0], 1.0);
    }

    #[test]
    fn unilateral_likelihoods_of_all_diagnoses_sum_to_one() {
        let model = UnilateralSpread::new(graph(), TimePrior::new(5, 0.3).unwrap());
        let params = array![0.3, 0.1, 0.4, 0.6];
        let mut total = 0.0;
        for (ii, iii) in [(true, true), (true, false), (false, true), (false, false)] {
            let pattern = Pattern::ipsi_only([("II", Status::from(ii)), ("III", Status::from(iii))]);
            let diagnosis = SyntheticDiagnosis::new(&pattern, model.lnls(), SpSn::default());
            total += model.likelihood(params.view(), &diagnosis, "late").unwrap();
        }
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn risk_without_evidence_equals_prevalence() {
        let model = UnilateralSpread::new(graph(), TimePrior::new(5, 0.3).unwrap());
        let params = array![0.3, 0.1, 0.4, 0.6];
        let involvement = Pattern::ipsi_only([("III", Status::Involved)]);
        let query = RiskQuery {
            involvement: involvement.clone(),
            given: SyntheticDiagnosis::new(&Pattern::default(), model.lnls(), SpSn::default()),
        };
        let risk = model.risk(params.view(), &query, "early").unwrap();
        let diagnosis = SyntheticDiagnosis::new(&involvement, model.lnls(), SpSn::default());
        let prevalence = model.likelihood(params.view(), &diagnosis, "early").unwrap();
        assert_abs_diff_eq!(risk, prevalence, epsilon = 1e-12);
    }

    #[test]
    fn midline_split_matches_cumulative_probability() {
        let model = MidlineSpread::new(graph(), TimePrior::new(6, 0.3).unwrap());
        // ipsi base, contra base, alpha, edge, rate, late_p
        let params = array![0.3, 0.1, 0.05, 0.02, 0.5, 0.4, 0.2, 0.5];
        let empty = SyntheticDiagnosis::new(&Pattern::default(), model.lnls(), SpSn::default());
        let joint = model.likelihood(params.view(), &empty, "early").unwrap();

        let pmf = model.diag_time_pmf(params.view(), "early").unwrap();
        let rate = model.midline_ext_rate(params.view()).unwrap();
        let rates = Array1::from_elem(pmf.len(), rate);
        let expected = cumulative_midline_probability(pmf.view(), rates.view());

        assert_abs_diff_eq!(joint.extended, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(joint.extended + joint.lateral, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn wrong_sample_length_is_reported() {
        let model = BilateralSpread::new(graph(), TimePrior::new(5, 0.3).unwrap());
        let empty = SyntheticDiagnosis::new(&Pattern::default(), model.lnls(), SpSn::default());
        let err = model
            .likelihood(array![0.1, 0.2].view(), &empty, "early")
            .unwrap_err();
        assert!(matches!(err, ModelError::ParamLength { expected: 6, found: 2 }));
    }

    #[test]
    fn unknown_stage_and_bad_probabilities_are_rejected() {
        let model = UnilateralSpread::new(graph(), TimePrior::new(5, 0.3).unwrap());
        let empty = SyntheticDiagnosis::new(&Pattern::default(), model.lnls(), SpSn::default());
        let stage = model.likelihood(array![0.3, 0.1, 0.4, 0.6].view(), &empty, "T3");
        assert!(matches!(stage, Err(ModelError::UnknownStage(_))));
        let param = model.likelihood(array![0.3, 1.5, 0.4, 0.6].view(), &empty, "early");
        assert!(matches!(param, Err(ModelError::InvalidParam { index: 1, .. })));
    }
}
