//! Expert-advice fusion: the Exp4-IX adversarial bandit and a plain averaging baseline.
//!
//! Each round the caller stacks the experts' distributions into an advice matrix `E_t` with one row
//! per action and one column per expert, asks a [`FusionPolicy`] for the fused action distribution
//! `P_t`, samples an action from it with [`sample_action`], acts, and reports the realized reward
//! back through [`FusionPolicy::observe`].
//!
//! ## Exp4-IX
//!
//! The engine keeps a trust distribution `Q` over the `M` experts and their cumulative estimated
//! losses `S`. With `n` planned rounds, `k` actions and confidence `δ` it fixes
//!
//! $$
//! \eta = \sqrt{\frac{2 (\ln M + \ln(k + 1) - \ln \delta)}{n k}}, \qquad \gamma = \eta / 2
//! $$
//!
//! and then, every round:
//!
//! - `P_t = E_t Q`.
//! - After action `A_t` earns reward `r`, the loss vector is `1` for every action except `A_t`,
//!   which gets `1 - r`. Unplayed actions count as worst case; this is not full-information Exp4.
//! - Implicit exploration: `L̂[a] = L[a] / (P_t[a] + γ)`. `γ > 0` keeps the importance weight
//!   bounded even when `P_t[a] = 0`.
//! - `S += E_tᵀ L̂`, then `Q = exp(-η S) / Σ exp(-η S)`, evaluated with the exponent shifted by its
//!   maximum so neither overflow nor total underflow can occur on long runs.
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::NUM_ACTIONS;
use crate::error::{PursuitError, Result};

/// Advice matrix: one row per action, one column per expert
pub type AdviceMatrix = DMatrix<f64>;

/// Allowed deviation of an advice column sum from 1
pub const ADVICE_TOLERANCE: f64 = 1e-6;

/// Stack expert distributions as the columns of an advice matrix, preserving their order.
pub fn assemble_advice(columns: &[DVector<f64>]) -> Result<AdviceMatrix> {
    let Some(first) = columns.first() else {
        return Err(PursuitError::config("advice matrix needs at least one expert"));
    };
    if let Some(bad) = columns.iter().find(|c| c.len() != first.len()) {
        return Err(PursuitError::AdviceShape {
            expected_rows: first.len(),
            expected_cols: columns.len(),
            rows: bad.len(),
            cols: columns.len(),
        });
    }
    Ok(DMatrix::from_columns(columns))
}

/// Check the shape of `advice` and that every column is a probability distribution.
pub fn validate_advice(advice: &AdviceMatrix, num_actions: usize, num_experts: usize) -> Result<()> {
    if advice.nrows() != num_actions || advice.ncols() != num_experts {
        return Err(PursuitError::AdviceShape {
            expected_rows: num_actions,
            expected_cols: num_experts,
            rows: advice.nrows(),
            cols: advice.ncols(),
        });
    }
    for (expert, column) in advice.column_iter().enumerate() {
        if let Some(p) = column.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(PursuitError::InvalidAdvice {
                expert,
                reason: format!("entry {} is negative or not finite", p),
            });
        }
        let total = column.sum();
        if (total - 1.0).abs() > ADVICE_TOLERANCE {
            return Err(PursuitError::InvalidAdvice {
                expert,
                reason: format!("column sums to {}", total),
            });
        }
    }
    Ok(())
}

/// Draw an action index from a categorical distribution by inverse CDF.
pub fn sample_action<R: Rng + ?Sized>(probs: &DVector<f64>, rng: &mut R) -> usize {
    let u = rng.random::<f64>() * probs.sum();
    let mut cumulative = 0.0;
    for (action, p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return action;
        }
    }
    // round-off: return the last action with positive mass
    probs
        .iter()
        .rposition(|p| *p > 0.0)
        .unwrap_or(probs.len().saturating_sub(1))
}

/// Combines an advice matrix into one action distribution and learns from realized rewards.
pub trait FusionPolicy {
    /// Fused action distribution for this round's advice
    fn fuse(&self, advice: &AdviceMatrix) -> Result<DVector<f64>>;

    /// Report the reward in `[0, 1]` earned by `action`, drawn from `probs = fuse(advice)`.
    fn observe(
        &mut self,
        advice: &AdviceMatrix,
        probs: &DVector<f64>,
        action: usize,
        reward: f64,
    ) -> Result<()>;

    /// Current trust in each expert, in advice-column order
    fn expert_weights(&self) -> DVector<f64>;
}

/// Exp4-IX construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exp4IxConfig {
    /// Planned number of rounds `n`; only sizes the learning rate.
    pub horizon: usize,
    /// Number of actions `k`
    pub num_actions: usize,
    /// Number of experts `M`, fixed for the engine's lifetime
    pub num_experts: usize,
    /// Confidence parameter `δ` in (0, 1)
    pub delta: f64,
}

impl Default for Exp4IxConfig {
    fn default() -> Self {
        Exp4IxConfig {
            horizon: 1000,
            num_actions: NUM_ACTIONS,
            num_experts: 3,
            delta: 0.01,
        }
    }
}

impl Exp4IxConfig {
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(PursuitError::config("Exp4-IX horizon must be positive"));
        }
        if self.num_actions == 0 {
            return Err(PursuitError::config("Exp4-IX needs at least one action"));
        }
        if self.num_experts == 0 {
            return Err(PursuitError::config("Exp4-IX needs at least one expert"));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(PursuitError::config(format!(
                "Exp4-IX confidence delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        Ok(())
    }

    /// Learning rate `η` for these parameters
    pub fn learning_rate(&self) -> f64 {
        let m = self.num_experts as f64;
        let k = self.num_actions as f64;
        let n = self.horizon as f64;
        (2.0 * (m.ln() + (k + 1.0).ln() - self.delta.ln()) / (n * k)).sqrt()
    }
}

/// Exp4-IX fusion engine.
///
/// Built once per episode. `Q` and `S` persist across all rounds of that episode and can be
/// cleared with [`Exp4Ix::reset`]; an episode with a different number of experts needs a new engine.
#[derive(Debug, Clone)]
pub struct Exp4Ix {
    config: Exp4IxConfig,
    eta: f64,
    gamma: f64,
    expert_weights: DVector<f64>,
    cumulative_loss: DVector<f64>,
    rounds: usize,
}

impl Exp4Ix {
    /// Build the engine, failing fast on an invalid configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pursuit::{Exp4Ix, Exp4IxConfig};
    ///
    /// let engine = Exp4Ix::new(Exp4IxConfig { horizon: 100, num_actions: 4, num_experts: 3, delta: 0.01 }).unwrap();
    /// assert_eq!(engine.expert_weights().len(), 3);
    /// assert!((engine.gamma() - engine.eta() / 2.0).abs() < 1e-15);
    /// assert!(Exp4Ix::new(Exp4IxConfig { delta: 1.0, ..Exp4IxConfig::default() }).is_err());
    /// ```
    pub fn new(config: Exp4IxConfig) -> Result<Self> {
        config.validate()?;
        let eta = config.learning_rate();
        let m = config.num_experts;
        Ok(Exp4Ix {
            config,
            eta,
            gamma: eta / 2.0,
            expert_weights: DVector::from_element(m, 1.0 / m as f64),
            cumulative_loss: DVector::zeros(m),
            rounds: 0,
        })
    }

    pub fn config(&self) -> &Exp4IxConfig {
        &self.config
    }

    /// Learning rate `η`
    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Implicit exploration parameter `γ = η / 2`
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Trust distribution `Q` over experts
    pub fn expert_weights(&self) -> &DVector<f64> {
        &self.expert_weights
    }

    /// Cumulative estimated loss `S` per expert
    pub fn cumulative_loss(&self) -> &DVector<f64> {
        &self.cumulative_loss
    }

    /// Number of completed updates
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Back to uniform `Q` and zero `S`.
    pub fn reset(&mut self) {
        let m = self.config.num_experts;
        self.expert_weights = DVector::from_element(m, 1.0 / m as f64);
        self.cumulative_loss = DVector::zeros(m);
        self.rounds = 0;
    }

    /// `P_t = E_t Q`
    pub fn get_probs(&self, advice: &AdviceMatrix) -> Result<DVector<f64>> {
        validate_advice(advice, self.config.num_actions, self.config.num_experts)?;
        Ok(advice * &self.expert_weights)
    }

    /// Fold the outcome of one round into `S` and `Q`.
    pub fn observe_and_update(
        &mut self,
        advice: &AdviceMatrix,
        probs: &DVector<f64>,
        action: usize,
        reward: f64,
    ) -> Result<()> {
        let k = self.config.num_actions;
        validate_advice(advice, k, self.config.num_experts)?;
        if probs.len() != k {
            return Err(PursuitError::InvalidDistribution(format!(
                "expected {} entries, got {}",
                k,
                probs.len()
            )));
        }
        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(PursuitError::InvalidDistribution(format!(
                "entries must be finite and non-negative: {:?}",
                probs.as_slice()
            )));
        }
        if action >= k {
            return Err(PursuitError::ActionOutOfRange {
                action,
                num_actions: k,
            });
        }
        if !reward.is_finite() || !(0.0..=1.0).contains(&reward) {
            return Err(PursuitError::InvalidReward(reward));
        }

        let mut losses = DVector::from_element(k, 1.0);
        losses[action] = 1.0 - reward;
        let estimated = losses.zip_map(probs, |loss, p| loss / (p + self.gamma));
        let expert_losses = advice.tr_mul(&estimated);
        self.cumulative_loss += &expert_losses;
        self.expert_weights = exponential_weights(&self.cumulative_loss, self.eta);
        self.rounds += 1;

        trace!("Exp4-IX estimated expert losses {:?}", expert_losses.as_slice());
        debug!(
            "Exp4-IX round {}: action {} reward {:.4}, Q = {:?}",
            self.rounds,
            action,
            reward,
            self.expert_weights.as_slice()
        );
        Ok(())
    }
}

// Lowest exponent kept by `exponential_weights`; `exp` of it stays a normal f64.
const MIN_LOG_WEIGHT: f64 = -700.0;

/// `exp(-η S)` normalised, shifted by the smallest cumulative loss.
///
/// The exponent is clamped at [`MIN_LOG_WEIGHT`] so a far-behind expert keeps a tiny positive
/// weight instead of underflowing to zero.
fn exponential_weights(cumulative_loss: &DVector<f64>, eta: f64) -> DVector<f64> {
    let min_loss = cumulative_loss.min();
    let weights = cumulative_loss.map(|s| (-eta * (s - min_loss)).max(MIN_LOG_WEIGHT).exp());
    let total = weights.sum();
    weights / total
}

impl FusionPolicy for Exp4Ix {
    fn fuse(&self, advice: &AdviceMatrix) -> Result<DVector<f64>> {
        self.get_probs(advice)
    }

    fn observe(
        &mut self,
        advice: &AdviceMatrix,
        probs: &DVector<f64>,
        action: usize,
        reward: f64,
    ) -> Result<()> {
        self.observe_and_update(advice, probs, action, reward)
    }

    fn expert_weights(&self) -> DVector<f64> {
        self.expert_weights.clone()
    }
}

/// Equal-weight mixture of the experts' advice. Never learns.
///
/// With a single expert this returns that expert's advice unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageFusion {
    num_experts: usize,
}

impl AverageFusion {
    pub fn new(num_experts: usize) -> Result<Self> {
        if num_experts == 0 {
            return Err(PursuitError::config("average fusion needs at least one expert"));
        }
        Ok(AverageFusion { num_experts })
    }

    pub fn num_experts(&self) -> usize {
        self.num_experts
    }
}

impl FusionPolicy for AverageFusion {
    fn fuse(&self, advice: &AdviceMatrix) -> Result<DVector<f64>> {
        validate_advice(advice, advice.nrows(), self.num_experts)?;
        Ok(advice.column_sum() / self.num_experts as f64)
    }

    fn observe(
        &mut self,
        advice: &AdviceMatrix,
        _probs: &DVector<f64>,
        action: usize,
        _reward: f64,
    ) -> Result<()> {
        if action >= advice.nrows() {
            return Err(PursuitError::ActionOutOfRange {
                action,
                num_actions: advice.nrows(),
            });
        }
        Ok(())
    }

    fn expert_weights(&self) -> DVector<f64> {
        DVector::from_element(self.num_experts, 1.0 / self.num_experts as f64)
    }
}
