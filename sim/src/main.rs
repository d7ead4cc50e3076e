//! PURSUIT SIM: Monte-Carlo evaluation of expert-fusion strategies for a pursuer UAV.
//!
//! Every selected algorithm is run for the configured number of episodes against either a smooth
//! or an adversarial target. Episode `i` uses seed `seed + i` for every algorithm, so all
//! algorithms face the same UAV start and (for the smooth target) the same trajectory.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags

mod common;

use clap::{Args, Parser, Subcommand};
use common::{episode_csv_path, init_logger, summary_csv_path, validate_output_path};
use log::{error, info};
use pursuit::particle::ParticleResamplingStrategy;
use pursuit::ObservationPolicy;
use pursuit::sim::{Algorithm, MonteCarloSummary, SimulationConfig, TargetMode, run_episodes};
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "PURSUIT SIM: Monte-Carlo evaluation of expert-fusion strategies for a pursuer UAV.

A UAV with a limited forward field of view chases a moving target by choosing one of four
headings each round. Three directional experts (previous position, particle filter and
trajectory fitting) advise on the heading, and the advice is either followed directly, averaged,
or fused online by the Exp4-IX adversarial bandit.

For each algorithm the first episode is written to <output>/<algorithm>_episode.csv and the
per-round mean and standard deviation of the cumulative distance across episodes to
<output>/<algorithm>_summary.csv.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Monte-Carlo evaluation of expert-fusion strategies for a pursuer UAV.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run simulation from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Run the episodes of each algorithm in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the pursuit simulation",
        long_about = "Run every selected algorithm for the requested number of episodes and write per-episode traces and Monte-Carlo summaries as CSV."
    )]
    Run(RunArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Simulation parameters given on the command line
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Rounds per episode
    #[arg(long, default_value_t = 1000)]
    rounds: usize,

    /// Episodes per algorithm
    #[arg(long, default_value_t = 1)]
    episodes: usize,

    /// Seed of the first episode
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Target behaviour
    #[arg(long, value_enum, default_value_t = TargetMode::Smooth)]
    target_mode: TargetMode,

    /// Algorithms to evaluate (comma separated); all of them when omitted
    #[arg(long, value_enum, value_delimiter = ',')]
    algorithms: Vec<Algorithm>,

    /// Number of particles of the particle-filter expert
    #[arg(long, default_value_t = 1000)]
    num_particles: usize,

    /// Standard deviation of the per-round particle diffusion
    #[arg(long, default_value_t = pursuit::particle::DEFAULT_PROCESS_NOISE_STD)]
    process_noise_std: f64,

    /// Particle resampling scheme
    #[arg(long, value_enum, default_value_t = ParticleResamplingStrategy::Multinomial)]
    resampling: ParticleResamplingStrategy,

    /// Exp4-IX confidence parameter in (0, 1)
    #[arg(long, default_value_t = 0.01)]
    delta: f64,

    /// UAV displacement per round
    #[arg(long, default_value_t = 20.0)]
    uav_step: f64,

    /// Adversarial target displacement per round
    #[arg(long, default_value_t = 20.0)]
    target_step: f64,

    /// When the particle filter is fed the true target position
    #[arg(long, value_enum, default_value_t = ObservationPolicy::SkipWhenHidden)]
    observation_policy: ObservationPolicy,

    /// Output directory for CSV results
    #[arg(short, long, default_value = "results")]
    output: PathBuf,
}

impl RunArgs {
    fn to_config(&self, parallel: bool) -> SimulationConfig {
        let algorithms = if self.algorithms.is_empty() {
            Algorithm::ALL.to_vec()
        } else {
            self.algorithms.clone()
        };
        SimulationConfig {
            rounds: self.rounds,
            episodes: self.episodes,
            seed: self.seed,
            target_mode: self.target_mode,
            algorithms,
            num_particles: self.num_particles,
            process_noise_std: self.process_noise_std,
            resampling: self.resampling,
            delta: self.delta,
            uav_step: self.uav_step,
            target_step: self.target_step,
            observation_policy: self.observation_policy,
            output: self.output.clone(),
            parallel,
            ..SimulationConfig::default()
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file; the format follows the extension (.toml, .json, .yaml)
    #[arg(short, long, default_value = "pursuit.toml")]
    output: PathBuf,
}

fn run_simulation(config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;
    validate_output_path(&config.output)?;

    info!("Target mode: {:?}", config.target_mode);
    info!("Rounds: {}, episodes: {}, seed: {}", config.rounds, config.episodes, config.seed);
    info!("Output: {}", config.output.display());
    info!("Parallel: {}", config.parallel);

    let mut finals = Vec::with_capacity(config.algorithms.len());
    for &algorithm in &config.algorithms {
        info!(
            "Running {} ({})",
            algorithm,
            if algorithm.is_fusion() { "fusion of all experts" } else { "single expert" }
        );
        let episodes = run_episodes(config, algorithm).inspect_err(|e| {
            error!("{} failed: {}", algorithm, e);
        })?;

        let summary = MonteCarloSummary::from_episodes(algorithm, &episodes)?;
        if let Some(first) = episodes.first() {
            let path = episode_csv_path(&config.output, algorithm);
            first.to_csv(&path)?;
            info!("Episode trace written to {}", path.display());
        }
        let path = summary_csv_path(&config.output, algorithm);
        summary.to_csv(&path)?;
        info!(
            "{}: mean final cumulative distance {:.2} over {} episode(s), summary written to {}",
            algorithm,
            summary.final_mean(),
            summary.episodes,
            path.display()
        );
        finals.push((algorithm, summary.final_mean()));
    }

    finals.sort_by(|a, b| a.1.total_cmp(&b.1));
    for (rank, (algorithm, distance)) in finals.iter().enumerate() {
        info!("#{} {}: {:.2}", rank + 1, algorithm, distance);
    }
    Ok(())
}

fn run_from_config(config_path: &Path, cli_parallel: bool) -> Result<(), Box<dyn Error>> {
    info!("Loading configuration from {}", config_path.display());
    let mut config = SimulationConfig::from_file(config_path)?;

    // Override parallel setting if CLI flag is set
    if cli_parallel {
        config.parallel = true;
    }
    info!("Configuration loaded successfully");
    run_simulation(&config)
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = SimulationConfig::default();
    config.to_file(&args.output)?;
    info!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let result = if let Some(ref config_path) = cli.config {
        run_from_config(config_path, cli.parallel)
    } else {
        match cli.command {
            Some(Command::Run(args)) => run_simulation(&args.to_config(cli.parallel)),
            Some(Command::CreateConfig(args)) => create_config_file(&args),
            None => {
                eprintln!("Error: No command provided. Use -h or --help for usage information.");
                std::process::exit(1);
            }
        }
    };
    if let Err(ref e) = result {
        error!("{}", e);
    }
    result
}
