//! Simulation configuration, the per-round decision loop and Monte-Carlo summaries.
//!
//! An episode pits one [`Algorithm`] against one target realisation for a fixed number of rounds.
//! Each round the target moves, every expert advises on the fresh observation, the fusion policy
//! turns the advice matrix into an action distribution, the UAV samples and executes an action, and
//! the realized reward is fed back to the fusion policy.
//!
//! Two independent random streams are derived from the episode seed. The environment stream draws
//! the UAV spawn point and the target (its control points, or its evasive choices) and the agent
//! stream drives particle noise, resampling and action sampling. The same seed therefore yields the
//! same UAV start and the same smooth trajectory for every algorithm, which keeps comparisons paired.
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, trace};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bandit::{AverageFusion, Exp4Ix, Exp4IxConfig, FusionPolicy, assemble_advice, sample_action};
use crate::environment::{AdversarialTarget, SmoothTarget, Target, TrajectoryConfig, Uav};
use crate::error::{PursuitError, Result};
use crate::experts::{Expert, Observation, PreviousPositionExpert, TrajectoryFittingExpert};
use crate::particle::{ObservationPolicy, ParticleFilter, ParticleFilterExpert, ParticleResamplingStrategy};
use crate::visibility::in_view;
use crate::{NUM_ACTIONS, Orientation, Position};

/// Cumulative distance grows by `distance / DISTANCE_SCALE` each round
pub const DISTANCE_SCALE: f64 = 100.0;

// Mixed into the episode seed to derive the agent stream from the environment stream.
const AGENT_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Target behaviour for an episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum TargetMode {
    /// Precomputed spline trajectory
    #[default]
    Smooth,
    /// Evasive target reacting to the UAV
    Adversarial,
}

/// Decision strategy evaluated by an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    PreviousPosition,
    ParticleFilter,
    TrajectoryFitting,
    AverageFusion,
    #[cfg_attr(feature = "clap", value(name = "exp4-ix"))]
    Exp4Ix,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::PreviousPosition,
        Algorithm::ParticleFilter,
        Algorithm::TrajectoryFitting,
        Algorithm::AverageFusion,
        Algorithm::Exp4Ix,
    ];

    /// Identifier used in file names and logs
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::PreviousPosition => "previous_position",
            Algorithm::ParticleFilter => "particle_filter",
            Algorithm::TrajectoryFitting => "trajectory_fitting",
            Algorithm::AverageFusion => "average_fusion",
            Algorithm::Exp4Ix => "exp4ix",
        }
    }

    /// Whether the algorithm fuses all experts rather than following a single one
    pub fn is_fusion(self) -> bool {
        matches!(self, Algorithm::AverageFusion | Algorithm::Exp4Ix)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parameters of a simulation run. Every field has a default, so partial files are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Rounds per episode; also the Exp4-IX horizon
    pub rounds: usize,
    /// Episodes per algorithm
    pub episodes: usize,
    /// Seed of the first episode; episode `i` uses `seed + i`
    pub seed: u64,
    pub target_mode: TargetMode,
    pub algorithms: Vec<Algorithm>,
    pub num_particles: usize,
    pub process_noise_std: f64,
    pub resampling: ParticleResamplingStrategy,
    /// Exp4-IX confidence parameter
    pub delta: f64,
    pub uav_step: f64,
    /// Per-round displacement of the adversarial target
    pub target_step: f64,
    pub observation_policy: ObservationPolicy,
    /// Directory receiving the CSV results
    pub output: PathBuf,
    /// Run episodes on a thread pool
    pub parallel: bool,
    pub trajectory: TrajectoryConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            rounds: 1000,
            episodes: 1,
            seed: 0,
            target_mode: TargetMode::default(),
            algorithms: Algorithm::ALL.to_vec(),
            num_particles: 1000,
            process_noise_std: crate::particle::DEFAULT_PROCESS_NOISE_STD,
            resampling: ParticleResamplingStrategy::default(),
            delta: 0.01,
            uav_step: 20.0,
            target_step: 20.0,
            observation_policy: ObservationPolicy::default(),
            output: PathBuf::from("results"),
            parallel: false,
            trajectory: TrajectoryConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Check every parameter before any episode starts.
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(PursuitError::config("rounds must be positive"));
        }
        if self.episodes == 0 {
            return Err(PursuitError::config("episodes must be positive"));
        }
        if self.algorithms.is_empty() {
            return Err(PursuitError::config("at least one algorithm is required"));
        }
        if self.num_particles == 0 {
            return Err(PursuitError::config("num_particles must be positive"));
        }
        if !(self.process_noise_std.is_finite() && self.process_noise_std >= 0.0) {
            return Err(PursuitError::config(format!(
                "process_noise_std must be finite and non-negative, got {}",
                self.process_noise_std
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(PursuitError::config(format!(
                "delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        for (name, step) in [("uav_step", self.uav_step), ("target_step", self.target_step)] {
            if !(step.is_finite() && step > 0.0) {
                return Err(PursuitError::config(format!(
                    "{} must be positive and finite, got {}",
                    name, step
                )));
            }
        }
        self.trajectory.validate()
    }

    /// Seed of episode `episode`
    pub fn episode_seed(&self, episode: usize) -> u64 {
        self.seed.wrapping_add(episode as u64)
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(serialization)
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(serialization)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(serialization)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(serialization)
    }

    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(serialization)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(serialization)
    }

    /// Write in the format named by the extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }

    /// Read in the format named by the extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn serialization(err: impl std::fmt::Display) -> PursuitError {
    PursuitError::Serialization(err.to_string())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(path: &Path) -> PursuitError {
    PursuitError::config(format!(
        "unsupported config file extension: {}",
        path.display()
    ))
}

/// Reward for the UAV ending the round at `uav` facing `orientation`.
///
/// `min(1, 1/d)` where `d` is the remaining distance to the target, if the target is in view;
/// zero otherwise.
pub fn realized_reward(target: &Position, uav: &Position, orientation: Orientation) -> f64 {
    if !in_view(target, uav, orientation) {
        return 0.0;
    }
    let distance = (target - uav).norm();
    if distance > 0.0 { (1.0 / distance).min(1.0) } else { 1.0 }
}

/// Experts consulted by `algorithm`, in advice-column order.
pub fn build_experts(
    config: &SimulationConfig,
    algorithm: Algorithm,
    uav_start: &Position,
) -> Result<Vec<Box<dyn Expert>>> {
    let previous = || -> Box<dyn Expert> { Box::new(PreviousPositionExpert::new()) };
    let trajectory = || -> Box<dyn Expert> { Box::new(TrajectoryFittingExpert::new()) };
    let particle = || -> Result<Box<dyn Expert>> {
        let filter = ParticleFilter::new(*uav_start, config.num_particles, config.process_noise_std)?
            .with_resampling_strategy(config.resampling);
        Ok(Box::new(ParticleFilterExpert::new(filter, config.observation_policy)))
    };
    Ok(match algorithm {
        Algorithm::PreviousPosition => vec![previous()],
        Algorithm::ParticleFilter => vec![particle()?],
        Algorithm::TrajectoryFitting => vec![trajectory()],
        Algorithm::AverageFusion | Algorithm::Exp4Ix => vec![previous(), particle()?, trajectory()],
    })
}

/// Fusion policy of `algorithm` over `num_experts` advice columns.
pub fn build_policy(
    config: &SimulationConfig,
    algorithm: Algorithm,
    num_experts: usize,
) -> Result<Box<dyn FusionPolicy>> {
    match algorithm {
        Algorithm::Exp4Ix => Ok(Box::new(Exp4Ix::new(Exp4IxConfig {
            horizon: config.rounds,
            num_actions: NUM_ACTIONS,
            num_experts,
            delta: config.delta,
        })?)),
        _ => Ok(Box::new(AverageFusion::new(num_experts)?)),
    }
}

/// State and outcome of one round.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundRecord {
    pub round: usize,
    /// UAV position after its move
    pub uav: Position,
    pub target: Position,
    /// Heading after the move
    pub orientation: Orientation,
    /// Whether the target was in view when the experts were consulted
    pub in_view: bool,
    pub action: usize,
    pub reward: f64,
    pub distance: f64,
    pub cumulative_distance: f64,
    /// Fusion trust in each expert after the update
    pub expert_weights: Vec<f64>,
}

/// Full trace of one episode.
#[derive(Clone, Debug)]
pub struct EpisodeResult {
    pub algorithm: Algorithm,
    pub seed: u64,
    pub uav_start: Position,
    pub target_start: Position,
    pub expert_names: Vec<String>,
    pub records: Vec<RoundRecord>,
}

impl EpisodeResult {
    pub fn final_cumulative_distance(&self) -> f64 {
        self.records
            .last()
            .map(|r| r.cumulative_distance)
            .unwrap_or(0.0)
    }

    pub fn cumulative_distances(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.cumulative_distance).collect()
    }

    /// Share of rounds in which the target was in view
    pub fn visible_fraction(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().filter(|r| r.in_view).count() as f64 / self.records.len() as f64
    }

    /// One row per round; expert trust goes in `w_<expert>` columns.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header: Vec<String> = [
            "round",
            "uav_x",
            "uav_y",
            "target_x",
            "target_y",
            "orientation",
            "in_view",
            "action",
            "reward",
            "distance",
            "cumulative_distance",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(self.expert_names.iter().map(|name| format!("w_{}", name)));
        writer.write_record(&header)?;
        for record in &self.records {
            let mut row = vec![
                record.round.to_string(),
                format!("{:.4}", record.uav.x),
                format!("{:.4}", record.uav.y),
                format!("{:.4}", record.target.x),
                format!("{:.4}", record.target.y),
                record.orientation.to_string(),
                record.in_view.to_string(),
                record.action.to_string(),
                format!("{:.8}", record.reward),
                format!("{:.4}", record.distance),
                format!("{:.6}", record.cumulative_distance),
            ];
            row.extend(record.expert_weights.iter().map(|w| format!("{:.8}", w)));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run one episode of `algorithm` with the given seed.
pub fn run_episode(config: &SimulationConfig, algorithm: Algorithm, seed: u64) -> Result<EpisodeResult> {
    config.validate()?;
    let mut env_rng = StdRng::seed_from_u64(seed);
    let mut agent_rng = StdRng::seed_from_u64(seed ^ AGENT_STREAM);

    let mut uav = Uav::random(config.uav_step, &mut env_rng)?;
    let uav_start = uav.start();
    let mut target: Box<dyn Target> = match config.target_mode {
        TargetMode::Smooth => Box::new(SmoothTarget::generate(
            &uav_start,
            config.rounds,
            &config.trajectory,
            &mut env_rng,
        )?),
        TargetMode::Adversarial => Box::new(AdversarialTarget::spawn(
            &uav_start,
            config.target_step,
            &mut env_rng,
        )?),
    };
    let target_start = target.position();

    let mut experts = build_experts(config, algorithm, &uav_start)?;
    let mut policy = build_policy(config, algorithm, experts.len())?;
    let expert_names: Vec<String> = experts.iter().map(|e| e.name().to_string()).collect();
    info!(
        "Starting {} episode (seed {}, {} rounds, {:?} target, experts {:?})",
        algorithm, seed, config.rounds, config.target_mode, expert_names
    );

    let mut records = Vec::with_capacity(config.rounds);
    let mut cumulative_distance = 0.0;
    for round in 0..config.rounds {
        let target_position = target.advance(&uav.position(), &mut env_rng);
        let observation = Observation::new(target_position, uav.position(), uav.orientation());
        let visible = observation.target_in_view();

        let columns: Vec<_> = experts
            .iter_mut()
            .map(|expert| expert.advise(&observation, &mut agent_rng))
            .collect();
        let advice = assemble_advice(&columns)?;
        let probs = policy.fuse(&advice)?;
        let action = sample_action(&probs, &mut agent_rng);
        let uav_position = uav.apply_action(action)?;
        let reward = realized_reward(&target_position, &uav_position, uav.orientation());
        policy.observe(&advice, &probs, action, reward)?;

        let distance = (target_position - uav_position).norm();
        cumulative_distance += distance / DISTANCE_SCALE;
        trace!(
            "round {}: visible {}, P = {:?}, action {}, reward {:.6}",
            round,
            visible,
            probs.as_slice(),
            action,
            reward
        );
        records.push(RoundRecord {
            round,
            uav: uav_position,
            target: target_position,
            orientation: uav.orientation(),
            in_view: visible,
            action,
            reward,
            distance,
            cumulative_distance,
            expert_weights: policy.expert_weights().iter().copied().collect(),
        });
    }

    let result = EpisodeResult {
        algorithm,
        seed,
        uav_start,
        target_start,
        expert_names,
        records,
    };
    info!(
        "Finished {} episode (seed {}): cumulative distance {:.2}, target visible {:.1}% of rounds",
        algorithm,
        seed,
        result.final_cumulative_distance(),
        100.0 * result.visible_fraction()
    );
    Ok(result)
}

/// Per-round statistics of the cumulative distance across episodes.
#[derive(Clone, Debug, PartialEq)]
pub struct MonteCarloSummary {
    pub algorithm: Algorithm,
    pub episodes: usize,
    pub mean: Vec<f64>,
    /// Population standard deviation
    pub std_dev: Vec<f64>,
}

impl MonteCarloSummary {
    /// Aggregate episodes of one algorithm; they must all have the same number of rounds.
    pub fn from_episodes(algorithm: Algorithm, episodes: &[EpisodeResult]) -> Result<Self> {
        let Some(first) = episodes.first() else {
            return Err(PursuitError::config("cannot summarise zero episodes"));
        };
        let rounds = first.records.len();
        if let Some(bad) = episodes.iter().find(|e| e.records.len() != rounds) {
            return Err(PursuitError::config(format!(
                "episode with seed {} has {} rounds, expected {}",
                bad.seed,
                bad.records.len(),
                rounds
            )));
        }
        let n = episodes.len() as f64;
        let mut mean = vec![0.0; rounds];
        let mut std_dev = vec![0.0; rounds];
        for round in 0..rounds {
            let values = episodes.iter().map(|e| e.records[round].cumulative_distance);
            let m = values.clone().sum::<f64>() / n;
            let variance = values.map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean[round] = m;
            std_dev[round] = variance.sqrt();
        }
        debug!("Summarised {} {} episodes over {} rounds", episodes.len(), algorithm, rounds);
        Ok(MonteCarloSummary {
            algorithm,
            episodes: episodes.len(),
            mean,
            std_dev,
        })
    }

    /// Mean cumulative distance after the last round
    pub fn final_mean(&self) -> f64 {
        self.mean.last().copied().unwrap_or(0.0)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["round", "mean_cumulative_distance", "std_cumulative_distance"])?;
        for (round, (m, s)) in self.mean.iter().zip(self.std_dev.iter()).enumerate() {
            writer.write_record(&[round.to_string(), format!("{:.6}", m), format!("{:.6}", s)])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run `config.episodes` episodes of `algorithm`, on the rayon pool when `config.parallel` is set.
///
/// Episodes are independent and seeded by index, so both paths return identical results in
/// episode order.
pub fn run_episodes(config: &SimulationConfig, algorithm: Algorithm) -> Result<Vec<EpisodeResult>> {
    if config.parallel {
        (0..config.episodes)
            .into_par_iter()
            .map(|i| run_episode(config, algorithm, config.episode_seed(i)))
            .collect()
    } else {
        (0..config.episodes)
            .map(|i| run_episode(config, algorithm, config.episode_seed(i)))
            .collect()
    }
}

/// Run every episode of `algorithm` and summarise them.
pub fn run_monte_carlo(config: &SimulationConfig, algorithm: Algorithm) -> Result<MonteCarloSummary> {
    let episodes = run_episodes(config, algorithm)?;
    MonteCarloSummary::from_episodes(algorithm, &episodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use tempfile::tempdir;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            rounds: 60,
            num_particles: 50,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.algorithms.len(), 5);
        assert_eq!(config.observation_policy, ObservationPolicy::SkipWhenHidden);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let base = SimulationConfig::default();
        let cases = vec![
            SimulationConfig { rounds: 0, ..base.clone() },
            SimulationConfig { episodes: 0, ..base.clone() },
            SimulationConfig { algorithms: Vec::new(), ..base.clone() },
            SimulationConfig { num_particles: 0, ..base.clone() },
            SimulationConfig { delta: 1.0, ..base.clone() },
            SimulationConfig { uav_step: 0.0, ..base.clone() },
            SimulationConfig { target_step: f64::INFINITY, ..base.clone() },
            SimulationConfig { process_noise_std: -1.0, ..base.clone() },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn config_round_trips_through_every_format() {
        let dir = tempdir().unwrap();
        let config = SimulationConfig {
            rounds: 250,
            seed: 42,
            target_mode: TargetMode::Adversarial,
            algorithms: vec![Algorithm::Exp4Ix, Algorithm::ParticleFilter],
            observation_policy: ObservationPolicy::Privileged,
            ..SimulationConfig::default()
        };
        for name in ["config.json", "config.yaml", "config.yml", "config.toml"] {
            let path = dir.path().join(name);
            config.to_file(&path).unwrap();
            let loaded = SimulationConfig::from_file(&path).unwrap();
            assert_eq!(loaded, config, "{} did not round trip", name);
        }
        let bad = dir.path().join("config.txt");
        let err = config.to_file(&bad).unwrap_err();
        assert!(matches!(err, PursuitError::InvalidConfiguration(_)));
    }

    #[test]
    fn malformed_config_files_are_serialization_errors() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("broken.json");
        std::fs::write(&json, r#"{ "rounds": "many" }"#).unwrap();
        let err = SimulationConfig::from_file(&json).unwrap_err();
        assert!(matches!(err, PursuitError::Serialization(_)), "{:?}", err);

        let toml_path = dir.path().join("broken.toml");
        std::fs::write(&toml_path, "rounds = [").unwrap();
        let err = SimulationConfig::from_file(&toml_path).unwrap_err();
        assert!(matches!(err, PursuitError::Serialization(_)), "{:?}", err);

        let missing = SimulationConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, PursuitError::Io(_)));
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "rounds": 10, "target_mode": "adversarial" }"#).unwrap();
        let config = SimulationConfig::from_file(&path).unwrap();
        assert_eq!(config.rounds, 10);
        assert_eq!(config.target_mode, TargetMode::Adversarial);
        assert_eq!(config.num_particles, 1000);
        assert_eq!(config.trajectory, TrajectoryConfig::default());
    }

    #[test]
    fn reward_is_inverse_distance_when_visible() {
        let uav = Position::new(5000.0, 5000.0);
        let target = Position::new(5000.0, 5500.0);
        assert_approx_eq!(realized_reward(&target, &uav, Orientation::Up), 1.0 / 500.0);
        assert_eq!(realized_reward(&target, &uav, Orientation::Down), 0.0);
        let close = Position::new(5000.0, 5000.5);
        assert_eq!(realized_reward(&close, &uav, Orientation::Up), 1.0);
    }

    #[test]
    fn episodes_are_reproducible() {
        let config = small_config();
        for algorithm in Algorithm::ALL {
            let a = run_episode(&config, algorithm, 3).unwrap();
            let b = run_episode(&config, algorithm, 3).unwrap();
            assert_eq!(a.records, b.records, "{} is not deterministic", algorithm);
            assert_eq!(a.records.len(), config.rounds);
        }
    }

    #[test]
    fn same_seed_gives_same_world_for_every_algorithm() {
        let config = small_config();
        let runs: Vec<EpisodeResult> = Algorithm::ALL
            .iter()
            .map(|a| run_episode(&config, *a, 17).unwrap())
            .collect();
        for run in &runs[1..] {
            assert_eq!(run.uav_start, runs[0].uav_start);
            assert_eq!(run.target_start, runs[0].target_start);
            let targets: Vec<Position> = run.records.iter().map(|r| r.target).collect();
            let reference: Vec<Position> = runs[0].records.iter().map(|r| r.target).collect();
            assert_eq!(targets, reference);
        }
    }

    #[test]
    fn episode_records_are_consistent() {
        let config = SimulationConfig {
            target_mode: TargetMode::Adversarial,
            ..small_config()
        };
        let result = run_episode(&config, Algorithm::Exp4Ix, 1).unwrap();
        assert_eq!(result.expert_names, vec!["previous_position", "particle_filter", "trajectory_fitting"]);
        let mut previous = result.uav_start;
        let mut total = 0.0;
        for record in &result.records {
            assert_approx_eq!((record.uav - previous).norm(), config.uav_step, 1e-9);
            assert_eq!(record.orientation.index(), record.action);
            assert!((0.0..=1.0).contains(&record.reward));
            assert_eq!(record.expert_weights.len(), 3);
            assert_approx_eq!(record.expert_weights.iter().sum::<f64>(), 1.0, 1e-9);
            total += record.distance / DISTANCE_SCALE;
            assert_approx_eq!(record.cumulative_distance, total, 1e-9);
            previous = record.uav;
        }
    }

    #[test]
    fn single_expert_algorithms_report_one_weight() {
        let result = run_episode(&small_config(), Algorithm::TrajectoryFitting, 2).unwrap();
        assert_eq!(result.expert_names, vec!["trajectory_fitting"]);
        assert!(result.records.iter().all(|r| r.expert_weights == vec![1.0]));
    }

    #[test]
    fn episode_csv_has_weight_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.csv");
        let result = run_episode(&small_config(), Algorithm::AverageFusion, 5).unwrap();
        result.to_csv(&path).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 14);
        assert_eq!(&headers[11], "w_previous_position");
        assert_eq!(&headers[13], "w_trajectory_fitting");
        assert_eq!(reader.records().count(), 60);
    }

    #[test]
    fn monte_carlo_summary_aggregates_episodes() {
        let config = SimulationConfig {
            rounds: 30,
            episodes: 3,
            num_particles: 20,
            ..SimulationConfig::default()
        };
        let summary = run_monte_carlo(&config, Algorithm::PreviousPosition).unwrap();
        assert_eq!(summary.episodes, 3);
        assert_eq!(summary.mean.len(), 30);
        assert!(summary.std_dev.iter().all(|s| *s >= 0.0));
        assert!(summary.mean.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(summary.final_mean(), summary.mean[29]);

        let episodes: Vec<EpisodeResult> = (0..3)
            .map(|i| run_episode(&config, Algorithm::PreviousPosition, config.episode_seed(i)).unwrap())
            .collect();
        let expected = episodes.iter().map(|e| e.final_cumulative_distance()).sum::<f64>() / 3.0;
        assert_approx_eq!(summary.final_mean(), expected, 1e-9);

        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        summary.to_csv(&path).unwrap();
        assert_eq!(csv::Reader::from_path(&path).unwrap().records().count(), 30);
    }

    #[test]
    fn parallel_and_sequential_episodes_agree() {
        let config = SimulationConfig {
            rounds: 25,
            episodes: 3,
            num_particles: 20,
            ..SimulationConfig::default()
        };
        let parallel = SimulationConfig {
            parallel: true,
            ..config.clone()
        };
        let a = run_episodes(&config, Algorithm::AverageFusion).unwrap();
        let b = run_episodes(&parallel, Algorithm::AverageFusion).unwrap();
        assert_eq!(a.len(), 3);
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert_eq!(x.seed, config.episode_seed(i));
            assert_eq!(x.seed, y.seed);
            assert_eq!(x.records, y.records);
        }
        assert_eq!(
            run_monte_carlo(&config, Algorithm::AverageFusion).unwrap(),
            run_monte_carlo(&parallel, Algorithm::AverageFusion).unwrap()
        );
    }

    #[test]
    fn summary_rejects_ragged_episodes() {
        let a = run_episode(&small_config(), Algorithm::PreviousPosition, 0).unwrap();
        let short = SimulationConfig { rounds: 10, ..small_config() };
        let b = run_episode(&short, Algorithm::PreviousPosition, 1).unwrap();
        assert!(MonteCarloSummary::from_episodes(Algorithm::PreviousPosition, &[a, b]).is_err());
        assert!(MonteCarloSummary::from_episodes(Algorithm::PreviousPosition, &[]).is_err());
    }
}
