//! Collects per-scenario predictions and their provenance into an
//! [`ArrayStore`].

use crate::matcher::ObservedCounts;
use crate::runner::PrevalenceOutcome;
use crate::scenario::{PrevalenceScenario, RiskScenario, scalar_metadata};
use crate::store::{ArrayStore, AttrValue, Dataset, StoreError};
use ndarray::Array1;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default)]
pub struct ResultAggregator {
    store: ArrayStore,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the predicted prevalences under the scenario name, with every
    /// scalar scenario field and the observed counts as attributes.
    pub fn record_prevalence(
        &mut self,
        scenario: &PrevalenceScenario,
        outcome: PrevalenceOutcome,
    ) {
        let mut dataset = dataset(scenario, outcome.values);
        let ObservedCounts { matched, total } = outcome.observed;
        dataset
            .attrs
            .insert("num_match".to_string(), AttrValue::Int(matched as i64));
        dataset
            .attrs
            .insert("num_total".to_string(), AttrValue::Int(total as i64));
        self.store.insert(scenario.name.clone(), dataset);
    }

    pub fn record_risk(&mut self, scenario: &RiskScenario, values: Array1<f64>) {
        let dataset = dataset(scenario, values);
        self.store.insert(scenario.name.clone(), dataset);
    }

    pub fn len(&self) -> usize {
        self.store.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.datasets.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.store.save(path)?;
        log::info!(
            "Wrote {} scenario results to '{}'.",
            self.len(),
            path.display()
        );
        Ok(())
    }

    pub fn into_store(self) -> ArrayStore {
        self.store
    }
}

fn dataset<T: Serialize>(scenario: &T, values: Array1<f64>) -> Dataset {
    Dataset {
        values: values.into_dyn(),
        attrs: scalar_metadata(scenario),
    }
}
