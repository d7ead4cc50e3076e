//! Sequential importance resampling particle filter for the target position.
//!
//! The filter approximates the posterior over the target's planar position with `N` equally sized
//! particle and weight vectors. Each round runs the same cycle:
//!
//! 1. [`ParticleFilter::predict`]: every particle diffuses by independent zero-mean Gaussian noise
//!    with a fixed standard deviation. Weights are untouched.
//! 2. [`ParticleFilter::update`]: weights become `exp(-‖particle - observation‖)`, floored by
//!    [`WEIGHT_FLOOR`] and normalised, so a fully underflowed likelihood degrades to uniform weights
//!    instead of dividing by zero.
//! 3. [`ParticleFilter::resample`]: `N` particles are drawn with replacement according to the
//!    weights and the weights reset to exactly `1/N`. Resampling runs every round; there is no
//!    effective-sample-size gate.
//! 4. [`ParticleFilter::estimate`]: the weighted mean of the particles.
//!
//! Resampling every round without injecting new diversity lets the population collapse onto a few
//! ancestors over long runs. That is a property of this approximation, not an error, and is left
//! as is. [`ParticleFilter::effective_sample_size`] is exposed so callers can observe it.
use log::{debug, trace};
use nalgebra::DVector;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::error::{PursuitError, Result};
use crate::experts::{Expert, Observation, heading_fallback, positional_advice};
use crate::Position;

/// Default standard deviation of the per-round diffusion, in arena units
pub const DEFAULT_PROCESS_NOISE_STD: f64 = 10.0;
/// Added to every likelihood before normalisation
pub const WEIGHT_FLOOR: f64 = 1e-300;

/// When the particle-filter expert feeds the true target position to [`ParticleFilter::update`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ObservationPolicy {
    /// Update only in rounds where the target is in view; hidden rounds are pure dead reckoning.
    #[default]
    SkipWhenHidden,
    /// Update every round with the true target position, visible or not.
    Privileged,
}

/// How [`ParticleFilter::resample`] draws its ancestor indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ParticleResamplingStrategy {
    /// Independent categorical draws
    #[default]
    Multinomial,
    /// One uniform offset, evenly spaced pointers
    Systematic,
    /// Deterministic floor(N w) copies, systematic draws over the residuals
    Residual,
}

impl ParticleResamplingStrategy {
    /// Draw `weights.len()` ancestor indices. `weights` must be non-negative with a positive sum.
    pub fn indices<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::Multinomial => multinomial_indices(weights, rng),
            ParticleResamplingStrategy::Systematic => systematic_indices(weights, rng),
            ParticleResamplingStrategy::Residual => residual_indices(weights, rng),
        }
    }
}

fn cumulative_sum(weights: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect()
}

fn multinomial_indices<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let cdf = cumulative_sum(weights);
    let total = cdf.last().copied().unwrap_or(0.0);
    (0..n)
        .map(|_| {
            let u = rng.random::<f64>() * total;
            cdf.partition_point(|&c| c <= u).min(n - 1)
        })
        .collect()
}

fn systematic_indices<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let cdf = cumulative_sum(weights);
    let total = cdf[n - 1];
    let step = total / n as f64;
    let mut u = rng.random::<f64>() * step;
    let mut indices = Vec::with_capacity(n);
    let mut i = 0;
    for _ in 0..n {
        while i + 1 < n && u >= cdf[i] {
            i += 1;
        }
        indices.push(i);
        u += step;
    }
    indices
}

fn residual_indices<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let scaled = w / total * n as f64;
        let copies = scaled.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = scaled - copies as f64;
    }
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let sum_residual: f64 = residual.iter().sum();
        let step = sum_residual / remaining as f64;
        let mut u = rng.random::<f64>() * step;
        let mut i = 0;
        let mut cumsum = residual[0];
        for _ in 0..remaining {
            while u > cumsum && i + 1 < n {
                i += 1;
                cumsum += residual[i];
            }
            indices.push(i);
            u += step;
        }
    }
    indices
}

/// Particle approximation of the target position posterior.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Position>,
    weights: DVector<f64>,
    process_noise: Normal<f64>,
    resampling_strategy: ParticleResamplingStrategy,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.estimate();
        let min_weight = self.weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().copied().fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("mean_position", &format_args!("({:.2}, {:.2})", mean.x, mean.y))
            .field("process_noise_std", &self.process_noise.std_dev())
            .field("resampling_strategy", &self.resampling_strategy)
            .finish()
    }
}

impl ParticleFilter {
    /// Create a filter with `num_particles` particles all placed at `start`, uniformly weighted.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `num_particles` is zero or `process_noise_std` is negative or not
    /// finite.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pursuit::{ParticleFilter, Position};
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let mut pf = ParticleFilter::new(Position::new(5000.0, 5000.0), 500, 10.0).unwrap();
    /// pf.predict(&mut rng);
    /// pf.update(&Position::new(5003.0, 4998.0));
    /// pf.resample(&mut rng);
    /// let estimate = pf.estimate();
    /// assert!((estimate - Position::new(5000.0, 5000.0)).norm() < 50.0);
    /// ```
    pub fn new(start: Position, num_particles: usize, process_noise_std: f64) -> Result<Self> {
        if num_particles == 0 {
            return Err(PursuitError::config("particle filter needs at least one particle"));
        }
        Self::from_particles(vec![start; num_particles], process_noise_std)
    }

    /// Create a filter from an explicit, uniformly weighted particle set.
    pub fn from_particles(particles: Vec<Position>, process_noise_std: f64) -> Result<Self> {
        if particles.is_empty() {
            return Err(PursuitError::config("particle filter needs at least one particle"));
        }
        if !process_noise_std.is_finite() || process_noise_std < 0.0 {
            return Err(PursuitError::config(format!(
                "process noise standard deviation must be finite and non-negative, got {}",
                process_noise_std
            )));
        }
        let process_noise = Normal::new(0.0, process_noise_std)
            .map_err(|e| PursuitError::config(format!("process noise: {}", e)))?;
        let n = particles.len();
        Ok(ParticleFilter {
            particles,
            weights: DVector::from_element(n, 1.0 / n as f64),
            process_noise,
            resampling_strategy: ParticleResamplingStrategy::default(),
        })
    }

    pub fn with_resampling_strategy(mut self, strategy: ParticleResamplingStrategy) -> Self {
        self.resampling_strategy = strategy;
        self
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[Position] {
        &self.particles
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn process_noise_std(&self) -> f64 {
        self.process_noise.std_dev()
    }

    /// Put every particle back at `start` with uniform weights, keeping N and the noise scale.
    pub fn reset(&mut self, start: &Position) {
        let n = self.particles.len();
        self.particles.iter_mut().for_each(|p| *p = *start);
        self.weights = DVector::from_element(n, 1.0 / n as f64);
    }

    /// Diffuse every particle by independent Gaussian noise.
    pub fn predict<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for particle in self.particles.iter_mut() {
            particle.x += self.process_noise.sample(rng);
            particle.y += self.process_noise.sample(rng);
        }
    }

    /// Reweight the particles against an observed target position.
    pub fn update(&mut self, observed: &Position) {
        let mut underflowed = true;
        for (weight, particle) in self.weights.iter_mut().zip(self.particles.iter()) {
            let likelihood = (-(particle - observed).norm()).exp();
            if likelihood > 0.0 {
                underflowed = false;
            }
            *weight = likelihood + WEIGHT_FLOOR;
        }
        if underflowed {
            debug!(
                "All particle likelihoods underflowed for observation ({:.2}, {:.2}); weights fall back to uniform",
                observed.x, observed.y
            );
        }
        let total = self.weights.sum();
        self.weights /= total;
    }

    /// Draw a new particle set with replacement according to the weights, then reset weights to 1/N.
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let indices = self
            .resampling_strategy
            .indices(self.weights.as_slice(), rng);
        self.particles = indices.iter().map(|&i| self.particles[i]).collect();
        let n = self.particles.len();
        self.weights.fill(1.0 / n as f64);
    }

    /// Weighted mean of the particle positions.
    pub fn estimate(&self) -> Position {
        self.particles
            .iter()
            .zip(self.weights.iter())
            .fold(Position::zeros(), |acc, (particle, &w)| acc + particle * w)
    }

    /// `1 / Σ w²`, between 1 (collapsed) and N (uniform)
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares = self.weights.norm_squared();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
}

/// Expert adapter that runs one full filter cycle per round and steers toward the estimate.
///
/// The advice is positional only when the target is in view this round; otherwise the heading
/// fallback is returned even though the filter still advanced.
#[derive(Clone, Debug)]
pub struct ParticleFilterExpert {
    filter: ParticleFilter,
    policy: ObservationPolicy,
    last_estimate: Option<Position>,
}

impl ParticleFilterExpert {
    pub fn new(filter: ParticleFilter, policy: ObservationPolicy) -> Self {
        ParticleFilterExpert {
            filter,
            policy,
            last_estimate: None,
        }
    }

    pub fn filter(&self) -> &ParticleFilter {
        &self.filter
    }

    pub fn policy(&self) -> ObservationPolicy {
        self.policy
    }

    /// Estimate produced by the most recent [`Expert::advise`] call
    pub fn last_estimate(&self) -> Option<Position> {
        self.last_estimate
    }
}

impl Expert for ParticleFilterExpert {
    fn name(&self) -> &str {
        "particle_filter"
    }

    fn advise(&mut self, observation: &Observation, rng: &mut dyn RngCore) -> DVector<f64> {
        let visible = observation.target_in_view();
        self.filter.predict(rng);
        match (visible, self.policy) {
            (true, _) | (false, ObservationPolicy::Privileged) => {
                self.filter.update(&observation.target)
            }
            (false, ObservationPolicy::SkipWhenHidden) => {}
        }
        let ess = self.filter.effective_sample_size();
        self.filter.resample(rng);
        let estimate = self.filter.estimate();
        self.last_estimate = Some(estimate);
        trace!(
            "Particle filter estimate ({:.2}, {:.2}), ESS before resampling {:.1}, target visible: {}",
            estimate.x,
            estimate.y,
            ess,
            visible
        );
        if visible {
            positional_advice(&(estimate - observation.uav))
        } else {
            heading_fallback(observation.orientation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Orientation;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spread_filter(n: usize) -> ParticleFilter {
        let particles = (0..n)
            .map(|i| Position::new(4000.0 + 10.0 * i as f64, 6000.0 - 5.0 * i as f64))
            .collect();
        ParticleFilter::from_particles(particles, DEFAULT_PROCESS_NOISE_STD).unwrap()
    }

    #[test]
    fn construction_rejects_invalid_parameters() {
        assert!(ParticleFilter::new(Position::zeros(), 0, 10.0).is_err());
        assert!(ParticleFilter::new(Position::zeros(), 10, -1.0).is_err());
        assert!(ParticleFilter::new(Position::zeros(), 10, f64::NAN).is_err());
        assert!(ParticleFilter::from_particles(Vec::new(), 10.0).is_err());
    }

    #[test]
    fn new_filter_is_uniform_at_start() {
        let start = Position::new(3000.0, 7000.0);
        let pf = ParticleFilter::new(start, 100, 10.0).unwrap();
        assert_eq!(pf.num_particles(), 100);
        assert!(pf.particles().iter().all(|p| *p == start));
        assert!(pf.weights().iter().all(|&w| w == 0.01));
        assert_approx_eq!(pf.effective_sample_size(), 100.0, 1e-9);
    }

    #[test]
    fn predict_moves_particles_without_touching_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        let start = Position::new(5000.0, 5000.0);
        let mut pf = ParticleFilter::new(start, 200, 10.0).unwrap();
        let weights_before = pf.weights().clone();
        pf.predict(&mut rng);
        assert_eq!(pf.weights(), &weights_before);
        assert!(pf.particles().iter().any(|p| *p != start));
        let spread = pf
            .particles()
            .iter()
            .map(|p| (p - start).norm())
            .fold(0.0, f64::max);
        assert!(spread < 100.0, "noise of sigma 10 should stay local, got {}", spread);
    }

    #[test]
    fn zero_noise_predict_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let start = Position::new(5000.0, 5000.0);
        let mut pf = ParticleFilter::new(start, 10, 0.0).unwrap();
        pf.predict(&mut rng);
        assert!(pf.particles().iter().all(|p| *p == start));
    }

    #[test]
    fn update_favours_particles_near_observation() {
        let mut pf = spread_filter(5);
        let observed = pf.particles()[2];
        pf.update(&observed);
        assert_approx_eq!(pf.weights().sum(), 1.0, 1e-12);
        let best = pf
            .weights()
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, &w)| if w > acc.1 { (i, w) } else { acc });
        assert_eq!(best.0, 2);
    }

    #[test]
    fn update_with_underflowing_likelihood_stays_finite() {
        let mut pf = spread_filter(8);
        pf.update(&Position::new(0.0, 0.0));
        assert!(pf.weights().iter().all(|w| w.is_finite() && *w > 0.0));
        assert_approx_eq!(pf.weights().sum(), 1.0, 1e-12);
        for w in pf.weights().iter() {
            assert_approx_eq!(*w, 1.0 / 8.0, 1e-12);
        }
    }

    #[test]
    fn resample_keeps_count_and_resets_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        for strategy in [
            ParticleResamplingStrategy::Multinomial,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Residual,
        ] {
            let mut pf = spread_filter(50).with_resampling_strategy(strategy);
            let observed = pf.particles()[10];
            pf.update(&observed);
            pf.resample(&mut rng);
            assert_eq!(pf.num_particles(), 50, "{:?}", strategy);
            assert!(pf.weights().iter().all(|&w| w == 1.0 / 50.0), "{:?}", strategy);
            // nearly all mass sat on particle 10
            let copies = pf.particles().iter().filter(|p| **p == observed).count();
            assert!(copies >= 45, "{:?} kept only {} copies", strategy, copies);
        }
    }

    #[test]
    fn estimate_is_weighted_mean() {
        let particles = vec![Position::new(0.0, 0.0), Position::new(10.0, 20.0)];
        let mut pf = ParticleFilter::from_particles(particles, 1.0).unwrap();
        assert_eq!(pf.estimate(), Position::new(5.0, 10.0));
        pf.update(&Position::new(0.0, 0.0));
        let estimate = pf.estimate();
        assert!(estimate.x < 1e-6 && estimate.y < 1e-6);
    }

    #[test]
    fn single_particle_estimate_tracks_the_particle() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut pf = ParticleFilter::new(Position::new(5000.0, 5000.0), 1, 10.0).unwrap();
        for step in 0..20 {
            pf.predict(&mut rng);
            assert_eq!(pf.estimate(), pf.particles()[0]);
            pf.update(&Position::new(5000.0 + step as f64, 5000.0));
            assert_eq!(pf.estimate(), pf.particles()[0]);
            pf.resample(&mut rng);
            assert_eq!(pf.weights()[0], 1.0);
            assert_eq!(pf.estimate(), pf.particles()[0]);
        }
    }

    #[test]
    fn reset_returns_particles_to_start() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut pf = ParticleFilter::new(Position::new(100.0, 100.0), 20, 10.0).unwrap();
        pf.predict(&mut rng);
        pf.update(&Position::new(105.0, 100.0));
        let start = Position::new(2000.0, 3000.0);
        pf.reset(&start);
        assert!(pf.particles().iter().all(|p| *p == start));
        assert!(pf.weights().iter().all(|&w| w == 1.0 / 20.0));
    }

    #[test]
    fn expert_returns_fallback_when_target_hidden() {
        let mut rng = StdRng::seed_from_u64(9);
        let uav = Position::new(5000.0, 5000.0);
        let filter = ParticleFilter::new(uav, 100, 10.0).unwrap();
        let mut expert = ParticleFilterExpert::new(filter, ObservationPolicy::SkipWhenHidden);
        let obs = Observation::new(Position::new(5000.0, 6500.0), uav, Orientation::Up);
        let advice = expert.advise(&obs, &mut rng);
        assert_eq!(advice, heading_fallback(Orientation::Up));
        assert!(expert.last_estimate().is_some());
    }

    #[test]
    fn hidden_rounds_leave_estimate_near_start_unless_privileged() {
        let uav = Position::new(5000.0, 5000.0);
        let hidden_target = Position::new(5000.0, 5030.0);
        // facing down, a target 30 units north is not visible
        let obs = Observation::new(hidden_target, uav, Orientation::Down);
        assert!(!obs.target_in_view());

        let mut rng = StdRng::seed_from_u64(21);
        let filter = ParticleFilter::new(uav, 500, 10.0).unwrap();
        let mut blind = ParticleFilterExpert::new(filter.clone(), ObservationPolicy::SkipWhenHidden);
        let mut privileged = ParticleFilterExpert::new(filter, ObservationPolicy::Privileged);
        for _ in 0..10 {
            blind.advise(&obs, &mut rng);
            privileged.advise(&obs, &mut rng);
        }
        let blind_error = (blind.last_estimate().unwrap() - hidden_target).norm();
        let privileged_error = (privileged.last_estimate().unwrap() - hidden_target).norm();
        assert!(
            privileged_error < blind_error,
            "privileged {} vs blind {}",
            privileged_error,
            blind_error
        );
    }

    #[test]
    fn expert_steers_toward_visible_target() {
        let mut rng = StdRng::seed_from_u64(13);
        let uav = Position::new(5000.0, 5000.0);
        let target = Position::new(5600.0, 5000.0);
        let filter = ParticleFilter::new(target, 200, 10.0).unwrap();
        let mut expert = ParticleFilterExpert::new(filter, ObservationPolicy::SkipWhenHidden);
        let obs = Observation::new(target, uav, Orientation::Right);
        let advice = expert.advise(&obs, &mut rng);
        assert_approx_eq!(advice.sum(), 1.0, 1e-12);
        assert!(advice[Orientation::Right.index()] > 0.9);
    }
}
