#![deny(unused_variables)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::process;

use msepm::data::{
    ObservationTable, StateTable, check_sample_alignment, default_state_names, load_observations,
    load_states, write_states,
};
use msepm::{CvConfig, EpmConfig, EpmCv, EpmModel, FitReport, TrainedEpm};

#[derive(Parser)]
#[command(
    name = "msepm",
    version,
    about = "Multistate epigenetic pacemaker",
    long_about = "Fits per-feature linear models and refines per-sample latent states \
                 (e.g. epigenetic age) from a features × samples observation matrix \
                 by alternating least squares."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Hyperparameters shared by every command that trains a model.
#[derive(Args, Clone)]
struct FitArgs {
    /// Maximum number of alternating-least-squares iterations
    #[arg(long, default_value = "100")]
    iter_limit: usize,

    /// Worker threads for the per-feature regressions (0 = one per logical CPU)
    #[arg(long, default_value = "1")]
    jobs: usize,

    /// Minimum error improvement required to keep iterating
    #[arg(long, default_value = "0.001")]
    tolerance: f64,

    /// Step size of the latent-state gradient update
    #[arg(long, default_value = "0.01")]
    learning_rate: f64,

    /// Rescale states into the range of the initial estimate after every update
    #[arg(long)]
    normalize_states: bool,

    /// Show a progress bar while fitting
    #[arg(long)]
    verbose: bool,
}

impl FitArgs {
    fn to_config(&self) -> EpmConfig {
        let n_jobs = if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        };
        EpmConfig {
            iter_limit: self.iter_limit,
            n_jobs,
            error_tolerance: self.tolerance,
            learning_rate: self.learning_rate,
            normalize_states: self.normalize_states,
            verbose: self.verbose,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from initial state estimates and observations
    #[command(about = "Train a model (outputs: model.toml)")]
    Fit {
        /// TSV with an optional sample_id column and one column per state dimension
        states: PathBuf,

        /// TSV with a header of sample ids, an optional feature_id column, one row per feature
        observations: PathBuf,

        /// Where to write the trained model
        #[arg(long, default_value = "model.toml")]
        model: PathBuf,

        /// Also write the refined training states to this TSV
        #[arg(long)]
        fitted_states: Option<PathBuf>,

        #[command(flatten)]
        fit: FitArgs,
    },

    /// Predict latent states for new observations
    #[command(about = "Apply a trained model (outputs: predictions.tsv)")]
    Predict {
        /// Observation TSV, features in the same order as during training
        observations: PathBuf,

        /// Path to trained model file (.toml)
        #[arg(long)]
        model: PathBuf,

        #[arg(long, default_value = "predictions.tsv")]
        output: PathBuf,
    },

    /// Correlate predicted states with known states
    Score {
        states: PathBuf,
        observations: PathBuf,

        /// Path to trained model file (.toml)
        #[arg(long)]
        model: PathBuf,
    },

    /// Cross-validated out-of-fold predictions, plus a model trained on all samples
    #[command(about = "Cross-validate (outputs: out_of_fold.tsv, model.toml)")]
    Cv {
        states: PathBuf,
        observations: PathBuf,

        #[arg(long, default_value = "3")]
        folds: usize,

        /// Shuffle samples before assigning folds
        #[arg(long)]
        randomize: bool,

        /// Seed for --randomize
        #[arg(long, default_value = "0")]
        seed: u64,

        #[arg(long, default_value = "out_of_fold.tsv")]
        output: PathBuf,

        #[arg(long, default_value = "model.toml")]
        model: PathBuf,

        #[command(flatten)]
        fit: FitArgs,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Fit {
            states,
            observations,
            model,
            fitted_states,
            fit,
        }) => fit_command(&states, &observations, &model, fitted_states.as_deref(), &fit),
        Some(Commands::Predict {
            observations,
            model,
            output,
        }) => predict_command(&observations, &model, &output),
        Some(Commands::Score {
            states,
            observations,
            model,
        }) => score_command(&states, &observations, &model),
        Some(Commands::Cv {
            states,
            observations,
            folds,
            randomize,
            seed,
            output,
            model,
            fit,
        }) => {
            let config = CvConfig {
                cv_folds: folds,
                randomize_sample_order: randomize,
                seed,
                epm: fit.to_config(),
            };
            cv_command(&states, &observations, config, &output, &model)
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_training_inputs(
    states_path: &Path,
    observations_path: &Path,
) -> Result<(StateTable, ObservationTable), Box<dyn std::error::Error>> {
    let states = load_states(states_path)?;
    let observations = load_observations(observations_path)?;
    check_sample_alignment(&states, &observations)?;
    println!(
        "Loaded {} samples with {} state dimension(s) and {} features",
        states.states.nrows(),
        states.states.ncols(),
        observations.observations.nrows()
    );
    Ok((states, observations))
}

fn print_report(report: &FitReport) {
    println!("Fit {}", report.termination);
    if let Some(first) = report.first_error() {
        println!(
            "Total error: {:.6} (first iteration: {:.6})",
            report.final_error, first
        );
    }
    if report.rank_deficient() {
        println!(
            "Warning: state matrix was rank deficient (rank {} of {})",
            report.min_design_rank, report.state_dims
        );
    }
}

fn fit_command(
    states_path: &Path,
    observations_path: &Path,
    model_path: &Path,
    fitted_states_path: Option<&Path>,
    args: &FitArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (states, observations) = load_training_inputs(states_path, observations_path)?;

    let mut model = EpmModel::new(args.to_config());
    let report = model.fit(states.states.view(), observations.observations.view(), None)?;
    print_report(&report);

    if let (Some(path), Some(refined)) = (fitted_states_path, model.fitted_states()) {
        write_states(path, &states.sample_ids, &states.state_names, refined)?;
        println!("Fitted states saved to: {}", path.display());
    }

    let trained = model.into_trained().ok_or(msepm::EpmError::Untrained)?;
    trained.save(model_path)?;
    println!("Model saved to: {}", model_path.display());
    Ok(())
}

fn predict_command(
    observations_path: &Path,
    model_path: &Path,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", model_path.display());
    let trained = TrainedEpm::load(model_path)?;
    let observations = load_observations(observations_path)?;
    println!(
        "Predicting {} samples from {} features (model trained on {} features)",
        observations.sample_ids.len(),
        observations.feature_ids.len(),
        trained.n_features()
    );

    let predictions: Array2<f64> = trained.predict(observations.observations.view())?;
    let names = default_state_names(trained.state_dims());
    write_states(output_path, &observations.sample_ids, &names, predictions.view())?;
    println!("Predictions saved to: {}", output_path.display());
    Ok(())
}

fn score_command(
    states_path: &Path,
    observations_path: &Path,
    model_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = EpmModel::from_trained(TrainedEpm::load(model_path)?);
    let (states, observations) = load_training_inputs(states_path, observations_path)?;
    let scores = model.score(states.states.view(), observations.observations.view())?;
    for (name, r) in states.state_names.iter().zip(scores.iter()) {
        println!("{name}\tpearson_r={r:.6}");
    }
    Ok(())
}

fn cv_command(
    states_path: &Path,
    observations_path: &Path,
    config: CvConfig,
    output_path: &Path,
    model_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (states, observations) = load_training_inputs(states_path, observations_path)?;
    let cv = EpmCv::new(config);
    println!(
        "Running {}-fold cross-validation{}",
        cv.config().cv_folds,
        if cv.config().randomize_sample_order {
            " with shuffled samples"
        } else {
            ""
        }
    );
    let result = cv.fit(states.states.view(), observations.observations.view())?;

    for (fold, report) in result.fold_reports.iter().enumerate() {
        println!(
            "Fold {}: {} held-out samples, {}",
            fold + 1,
            result.folds[fold].len(),
            report.termination
        );
    }
    write_states(
        output_path,
        &states.sample_ids,
        &states.state_names,
        result.out_of_fold.view(),
    )?;
    println!("Out-of-fold predictions saved to: {}", output_path.display());

    print_report(&result.final_report);
    let trained = result.model.into_trained().ok_or(msepm::EpmError::Untrained)?;
    trained.save(model_path)?;
    println!("Model saved to: {}", model_path.display());
    Ok(())
}
