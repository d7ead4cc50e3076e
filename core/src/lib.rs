//! Online decision fusion for a pursuer UAV
//!
//! This crate implements the decision core of a pursuer ("UAV") that picks one of four discrete
//! headings each round in order to close on a moving target that it can only see inside a limited
//! field of view. Several independent directional predictors ("experts") each produce a probability
//! distribution over the four headings. An adversarial multi-armed bandit (Exp4-IX) fuses those
//! distributions into a single action distribution and learns, round by round, which experts to
//! trust from the realized outcome of the action it actually took.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): positions, advice matrices and weight vectors.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr):
//!   random number generation for particle noise, resampling and action sampling.
//! - [`serde`](https://crates.io/crates/serde) and [`csv`](https://crates.io/crates/csv): simulation
//!   configuration files and result export.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [visibility]: the field-of-view predicate deciding whether the target is observable.
//! - [experts]: the [`experts::Expert`] capability and the previous-position and trajectory-fitting
//!   predictors, together with the shared positional scoring and heading fallback.
//! - [particle]: the sequential importance resampling particle filter and its expert adapter.
//! - [bandit]: the Exp4-IX fusion engine, average fusion and action sampling.
//! - [environment]: the UAV and target models used by the simulation harness.
//! - [sim]: simulation configuration, the per-round decision loop and Monte-Carlo summaries.
//! - [error]: the crate error type.
//!
//! ## Coordinates, headings and actions
//!
//! Positions are planar points in an arena bounded to $[0, 10000]^2$, represented as
//! [`nalgebra::Vector2<f64>`]. The `y` axis points "up" and the `x` axis points "right". The UAV
//! heading is one of four [`Orientation`] values encoded `Up = 0`, `Right = 1`, `Down = 2` and
//! `Left = 3`. The same encoding is the action index space of every distribution in this crate:
//! entry `a` of an expert's advice, of the fused distribution and of the loss vectors refers to the
//! heading whose code is `a`. Keeping a single index space means the chosen action, the UAV's new
//! heading and the orientation-biased fallback all line up without any translation table.
//!
//! ## Per-round data flow
//!
//! ```text
//! state ─┬─> experts ───────────────┐
//!        └─> particle filter expert ─┴─> advice matrix E_t (4 x M) ─> fusion ─> P_t
//!                                                                         │
//!          realized loss <── state update <── sampled action A_t <────────┘
//!                 └──────────────> fusion weight update
//! ```
//!
//! Every stochastic operation receives its random source explicitly. Nothing in this crate touches
//! process-global random state, so an episode is fully determined by the seed of the generator that
//! the caller threads through it, and independent episodes can run on separate threads without any
//! coordination.
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub mod bandit;
pub mod environment;
pub mod error;
pub mod experts;
pub mod particle;
pub mod sim;
pub mod visibility;

pub use bandit::{
    AdviceMatrix, AverageFusion, Exp4Ix, Exp4IxConfig, FusionPolicy, assemble_advice, sample_action,
};
pub use error::{PursuitError, Result};
pub use experts::{Expert, PreviousPositionExpert, TrajectoryFittingExpert};
pub use particle::{ObservationPolicy, ParticleFilter, ParticleFilterExpert};
pub use visibility::in_view;

/// Planar position in arena units
pub type Position = Vector2<f64>;

/// Number of discrete actions (one per heading)
pub const NUM_ACTIONS: usize = 4;
/// Lower bound of both arena axes
pub const ARENA_MIN: f64 = 0.0;
/// Upper bound of both arena axes
pub const ARENA_MAX: f64 = 10_000.0;

/// Clamp a position component-wise into the arena.
pub fn clamp_to_arena(position: &Position) -> Position {
    Position::new(
        position.x.clamp(ARENA_MIN, ARENA_MAX),
        position.y.clamp(ARENA_MIN, ARENA_MAX),
    )
}

/// UAV heading. The discriminant is both the orientation code and the action index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Orientation {
    /// All headings in action-index order
    pub const ALL: [Orientation; NUM_ACTIONS] = [
        Orientation::Up,
        Orientation::Right,
        Orientation::Down,
        Orientation::Left,
    ];

    /// Action index / orientation code of this heading
    pub fn index(self) -> usize {
        self as usize
    }

    /// Heading for an orientation code, `None` for codes outside `0..4`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Unit displacement of one step along this heading.
    pub fn unit_step(self) -> Position {
        match self {
            Orientation::Up => Position::new(0.0, 1.0),
            Orientation::Right => Position::new(1.0, 0.0),
            Orientation::Down => Position::new(0.0, -1.0),
            Orientation::Left => Position::new(-1.0, 0.0),
        }
    }
}

impl TryFrom<usize> for Orientation {
    type Error = PursuitError;

    fn try_from(index: usize) -> Result<Self> {
        Orientation::from_index(index).ok_or(PursuitError::ActionOutOfRange {
            action: index,
            num_actions: NUM_ACTIONS,
        })
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Up => "up",
            Orientation::Right => "right",
            Orientation::Down => "down",
            Orientation::Left => "left",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_codes_match_action_indices() {
        for (i, orientation) in Orientation::ALL.iter().enumerate() {
            assert_eq!(orientation.index(), i);
            assert_eq!(Orientation::from_index(i), Some(*orientation));
        }
        assert_eq!(Orientation::from_index(4), None);
    }

    #[test]
    fn orientation_try_from_rejects_unknown_codes() {
        assert_eq!(Orientation::try_from(2).unwrap(), Orientation::Down);
        match Orientation::try_from(7) {
            Err(PursuitError::ActionOutOfRange {
                action,
                num_actions,
            }) => {
                assert_eq!(action, 7);
                assert_eq!(num_actions, NUM_ACTIONS);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unit_steps_follow_axis_conventions() {
        assert_eq!(Orientation::Up.unit_step(), Position::new(0.0, 1.0));
        assert_eq!(Orientation::Right.unit_step(), Position::new(1.0, 0.0));
        assert_eq!(Orientation::Down.unit_step(), Position::new(0.0, -1.0));
        assert_eq!(Orientation::Left.unit_step(), Position::new(-1.0, 0.0));
    }

    #[test]
    fn clamp_keeps_positions_inside_arena() {
        let clamped = clamp_to_arena(&Position::new(-5.0, 12_000.0));
        assert_eq!(clamped, Position::new(0.0, 10_000.0));
        let inside = Position::new(2500.0, 7500.0);
        assert_eq!(clamp_to_arena(&inside), inside);
    }
}
