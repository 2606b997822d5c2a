#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod marginal;
pub mod matcher;
pub mod model;
pub mod pattern;
pub mod results;
pub mod risk;
pub mod runner;
pub mod samples;
pub mod scenario;
pub mod store;
pub mod table;

pub use marginal::EvalError;
pub use model::{ModelCapability, ModelError};
pub use runner::{RunOptions, ScenarioRunner};
