//! Error types shared by the estimation, fusion and simulation modules.
//!
//! Configuration problems surface at construction time. Malformed expert advice
//! is rejected at the call that receives it. Rounds where the target is not
//! visible are not errors and never produce one.

use std::io;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PursuitError>;

#[derive(Debug, thiserror::Error)]
pub enum PursuitError {
    /// A constructor or configuration received a value outside its valid domain.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The advice matrix does not have one row per action and one column per expert.
    #[error(
        "advice matrix is {rows}x{cols}, expected {expected_rows}x{expected_cols} (actions x experts)"
    )]
    AdviceShape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    /// An expert column is not a probability distribution.
    #[error("advice from expert {expert} is not a distribution: {reason}")]
    InvalidAdvice { expert: usize, reason: String },

    /// An action distribution handed back to the engine is malformed.
    #[error("invalid action distribution: {0}")]
    InvalidDistribution(String),

    #[error("action {action} is outside the action space of size {num_actions}")]
    ActionOutOfRange { action: usize, num_actions: usize },

    /// Rewards must be finite and lie in [0, 1].
    #[error("reward {0} is outside [0, 1]")]
    InvalidReward(f64),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PursuitError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        PursuitError::InvalidConfiguration(message.into())
    }
}
