#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::error::Error;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use lyscenario::config::ParamsFile;
use lyscenario::results::ResultAggregator;
use lyscenario::samples::{DEFAULT_DATASET, PosteriorSamples};
use lyscenario::store::ArrayStore;
use lyscenario::table::load_clinical_table;
use lyscenario::{ModelCapability, RunOptions, ScenarioRunner};

#[derive(Parser)]
#[command(
    name = "lyscenario",
    about = "Prevalence and risk scenarios from lymphatic spread model posteriors",
    long_about = "Evaluates user-defined prevalence and risk scenarios over the posterior \
                 samples of a lymphatic progression model and compares predicted \
                 prevalences with the ones observed in a clinical dataset."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict prevalences and count the observed ones
    Prevalences(PrevalenceArgs),
    /// Predict risks of hidden involvement given a diagnosis
    Risks(RiskArgs),
    /// List the datasets of an array store
    Inspect {
        /// Path to the array store
        #[arg(value_name = "STORE")]
        store: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Parameter file with the model, graph and scenario definitions
    #[arg(long, default_value = "params.toml")]
    params: PathBuf,

    /// Use only every n-th posterior sample
    #[arg(long, value_name = "N", default_value = "1")]
    thin: usize,

    /// Name of the posterior samples dataset inside the samples store
    #[arg(long, default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Evaluate the samples of each scenario in parallel
    #[arg(long)]
    parallel: bool,
}

impl CommonArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            stride: self.thin,
            parallel: self.parallel,
        }
    }
}

#[derive(Args)]
struct PrevalenceArgs {
    /// Array store holding the posterior samples
    #[arg(value_name = "SAMPLES")]
    samples: PathBuf,

    /// Clinical dataset (CSV with 2 or 3 header rows)
    #[arg(value_name = "DATA")]
    data: PathBuf,

    /// Array store the predictions are written to
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct RiskArgs {
    /// Array store holding the posterior samples
    #[arg(value_name = "SAMPLES")]
    samples: PathBuf,

    /// Array store the predictions are written to
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Prevalences(args) => run_prevalences(args),
        Commands::Risks(args) => run_risks(args),
        Commands::Inspect { store } => run_inspect(store),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// A bar over the samples of one scenario; the runner sets its length and
/// message whenever a scenario starts.
fn sample_progress_bar(kind: &'static str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:>11.bold} [{bar:40.cyan/blue}] {pos}/{len} samples ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_prefix(kind);

    pb
}

/// Model and samples shared by both scenario kinds.
fn load_inputs(
    common: &CommonArgs,
    samples: &Path,
) -> Result<(ParamsFile, ModelCapability, PosteriorSamples), Box<dyn Error>> {
    let params = ParamsFile::load(&common.params)?;
    let model = ModelCapability::from_settings(&params.model, &params.graph)?;
    let samples = PosteriorSamples::load(samples, &common.dataset)?;
    Ok((params, model, samples))
}

/// Ends a run in which some scenarios failed with an error; the ones that
/// succeeded have been written already.
fn check_failures(failed: usize, total: usize) -> Result<(), Box<dyn Error>> {
    if failed > 0 {
        return Err(format!("{failed} of {total} scenarios failed; see the log above.").into());
    }
    Ok(())
}

fn run_prevalences(args: PrevalenceArgs) -> Result<(), Box<dyn Error>> {
    let (params, model, samples) = load_inputs(&args.common, &args.samples)?;
    let table = load_clinical_table(&args.data, model.header_rows())?;
    let pb = sample_progress_bar("prevalences");
    let runner = ScenarioRunner::new(&model, &samples, args.common.options())?
        .with_progress(pb.clone());
    log::info!(
        "Evaluating {} prevalence scenarios over {} samples.",
        params.prevalences.len(),
        runner.num_predictions()?
    );

    let mut results = ResultAggregator::new();
    let mut failed = 0;
    for scenario in &params.prevalences {
        match runner.prevalences(scenario, &table) {
            Ok(outcome) => results.record_prevalence(scenario, outcome),
            Err(e) => {
                log::error!("Prevalence scenario '{}' failed: {e}", scenario.name);
                failed += 1;
            }
        }
    }
    pb.finish_and_clear();

    results.save(&args.output)?;
    check_failures(failed, params.prevalences.len())
}

fn run_risks(args: RiskArgs) -> Result<(), Box<dyn Error>> {
    let (params, model, samples) = load_inputs(&args.common, &args.samples)?;
    let pb = sample_progress_bar("risks");
    let runner = ScenarioRunner::new(&model, &samples, args.common.options())?
        .with_progress(pb.clone());
    log::info!(
        "Evaluating {} risk scenarios over {} samples.",
        params.risks.len(),
        runner.num_predictions()?
    );

    let mut results = ResultAggregator::new();
    let mut failed = 0;
    for scenario in &params.risks {
        match runner.risks(scenario) {
            Ok(values) => results.record_risk(scenario, values),
            Err(e) => {
                log::error!("Risk scenario '{}' failed: {e}", scenario.name);
                failed += 1;
            }
        }
    }
    pb.finish_and_clear();

    results.save(&args.output)?;
    check_failures(failed, params.risks.len())
}

fn run_inspect(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let store = ArrayStore::load(&path)?;
    println!("{} datasets in {}", store.datasets.len(), path.display());
    for (name, dataset) in &store.datasets {
        let shape = dataset.values.shape().iter().join(" x ");
        let mean = dataset.values.mean().unwrap_or(f64::NAN);
        println!("  {name}: [{shape}] mean {mean:.4}");
        if !dataset.attrs.is_empty() {
            let attrs = dataset
                .attrs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .join(", ");
            println!("    {attrs}");
        }
    }
    Ok(())
}
