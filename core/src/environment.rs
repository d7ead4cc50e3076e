//! UAV and target models driving the simulation harness.
//!
//! The arena is the square $[0, 10000]^2$. Both agents are spawned inside the inner square
//! $[2000, 8000]^2$, the target within a few hundred units of the UAV so the first sightings happen
//! early. Two target behaviours are provided:
//!
//! - [`SmoothTarget`] follows a precomputed curve: a Catmull-Rom spline through random control
//!   points, sampled once per round and refined so it never jumps more than a fixed distance between
//!   consecutive rounds.
//! - [`AdversarialTarget`] reacts to the UAV: it locks a heading for a random number of rounds,
//!   half of the time choosing the heading that takes it farthest from the pursuer, and turns back
//!   whenever it gets close to the arena border.
use log::debug;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{PursuitError, Result};
use crate::{NUM_ACTIONS, Orientation, Position, clamp_to_arena};

/// Lower bound of the spawn square
pub const SPAWN_MIN: f64 = 2000.0;
/// Upper bound of the spawn square
pub const SPAWN_MAX: f64 = 8000.0;
/// Half-width of the box around the UAV in which the target starts
pub const START_JITTER: f64 = 200.0;
/// Distance from the arena edge at which the adversarial target turns back
pub const BORDER_MARGIN: f64 = 1000.0;
/// Shortest adversarial heading lock, in rounds
pub const MIN_LOCK_ROUNDS: u32 = 10;
/// Longest adversarial heading lock, in rounds
pub const MAX_LOCK_ROUNDS: u32 = 30;

fn clamp_to_spawn(position: &Position) -> Position {
    Position::new(
        position.x.clamp(SPAWN_MIN, SPAWN_MAX),
        position.y.clamp(SPAWN_MIN, SPAWN_MAX),
    )
}

/// Target start position: uniform within [`START_JITTER`] of `uav` on each axis, kept inside the
/// spawn square.
pub fn start_near<R: Rng + ?Sized>(uav: &Position, rng: &mut R) -> Position {
    let jitter = Position::new(
        rng.random_range(-START_JITTER..=START_JITTER),
        rng.random_range(-START_JITTER..=START_JITTER),
    );
    clamp_to_spawn(&(uav + jitter))
}

/// The pursuer: a point that moves a fixed step along one of four headings per round.
#[derive(Clone, Debug, PartialEq)]
pub struct Uav {
    start: Position,
    start_orientation: Orientation,
    position: Position,
    orientation: Orientation,
    step: f64,
    path: Vec<Position>,
    orientations: Vec<Orientation>,
}

impl Uav {
    pub fn new(start: Position, orientation: Orientation, step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(PursuitError::config(format!(
                "UAV step must be positive and finite, got {}",
                step
            )));
        }
        let start = clamp_to_arena(&start);
        Ok(Uav {
            start,
            start_orientation: orientation,
            position: start,
            orientation,
            step,
            path: vec![start],
            orientations: vec![orientation],
        })
    }

    /// Uniform start in the spawn square with a uniform random heading.
    pub fn random<R: Rng + ?Sized>(step: f64, rng: &mut R) -> Result<Self> {
        let start = Position::new(
            rng.random_range(SPAWN_MIN..=SPAWN_MAX),
            rng.random_range(SPAWN_MIN..=SPAWN_MAX),
        );
        let orientation = Orientation::ALL[rng.random_range(0..NUM_ACTIONS)];
        Uav::new(start, orientation, step)
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Every position held so far, starting with the spawn point
    pub fn path(&self) -> &[Position] {
        &self.path
    }

    pub fn orientations(&self) -> &[Orientation] {
        &self.orientations
    }

    /// Turn to the heading coded by `action` and move one step along it, staying in the arena.
    pub fn apply_action(&mut self, action: usize) -> Result<Position> {
        let heading = Orientation::try_from(action)?;
        self.orientation = heading;
        self.position = clamp_to_arena(&(self.position + heading.unit_step() * self.step));
        self.path.push(self.position);
        self.orientations.push(heading);
        Ok(self.position)
    }

    /// Back to the spawn point and heading with an empty history.
    pub fn reset(&mut self) {
        self.position = self.start;
        self.orientation = self.start_orientation;
        self.path = vec![self.start];
        self.orientations = vec![self.start_orientation];
    }
}

/// A moving target.
pub trait Target {
    /// Current true position
    fn position(&self) -> Position;

    /// Move to the next round's position. `uav` is where the pursuer currently is.
    fn advance(&mut self, uav: &Position, rng: &mut dyn RngCore) -> Position;

    /// Return to the initial state.
    fn reset(&mut self);

    /// Positions taken by [`Target::advance`] so far, preceded by the start position.
    fn path(&self) -> &[Position];
}

/// Parameters of the smooth target trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Number of spline control points, at least 4
    pub control_points: usize,
    /// Smallest distance between consecutive control points
    pub min_control_distance: f64,
    /// Largest distance between consecutive control points
    pub max_control_distance: f64,
    /// Largest allowed jump between consecutive trajectory samples
    pub max_frame_distance: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        TrajectoryConfig {
            control_points: 20,
            min_control_distance: 200.0,
            max_control_distance: 600.0,
            max_frame_distance: 24.0,
        }
    }
}

impl TrajectoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.control_points < 4 {
            return Err(PursuitError::config(format!(
                "a smooth trajectory needs at least 4 control points, got {}",
                self.control_points
            )));
        }
        if !(self.min_control_distance >= 0.0
            && self.min_control_distance <= self.max_control_distance
            && self.max_control_distance.is_finite())
        {
            return Err(PursuitError::config(format!(
                "control distance range [{}, {}] is invalid",
                self.min_control_distance, self.max_control_distance
            )));
        }
        if !(self.max_frame_distance.is_finite() && self.max_frame_distance > 0.0) {
            return Err(PursuitError::config(format!(
                "max frame distance must be positive, got {}",
                self.max_frame_distance
            )));
        }
        Ok(())
    }
}

/// Uniform Catmull-Rom spline through `points`, evaluated at `samples` evenly spaced parameters
/// from the first control point to the last. The end segments use phantom neighbours reflected
/// through the end points, so collinear control points give a straight line.
pub fn catmull_rom(points: &[Position], samples: usize) -> Vec<Position> {
    match points.len() {
        0 => return Vec::new(),
        1 => return vec![points[0]; samples],
        _ => {}
    }
    let segments = points.len() - 1;
    let span = if samples > 1 {
        segments as f64 / (samples - 1) as f64
    } else {
        0.0
    };
    (0..samples)
        .map(|s| {
            let t = s as f64 * span;
            let segment = (t.floor() as usize).min(segments - 1);
            let u = t - segment as f64;
            let p1 = points[segment];
            let p2 = points[segment + 1];
            let p0 = if segment == 0 {
                p1 * 2.0 - p2
            } else {
                points[segment - 1]
            };
            let p3 = if segment + 1 == segments {
                p2 * 2.0 - p1
            } else {
                points[segment + 2]
            };
            let u2 = u * u;
            let u3 = u2 * u;
            (p1 * 2.0
                + (p2 - p0) * u
                + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * u2
                + (p1 * 3.0 - p0 - p2 * 3.0 + p3) * u3)
                * 0.5
        })
        .collect()
}

/// Insert evenly spaced points wherever consecutive samples are more than `max_step` apart.
pub fn refine(trajectory: &[Position], max_step: f64) -> Vec<Position> {
    let Some(first) = trajectory.first() else {
        return Vec::new();
    };
    let mut refined = vec![*first];
    for pair in trajectory.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let gap = (to - from).norm();
        if gap > max_step {
            let pieces = (gap / max_step).ceil() as usize;
            for j in 1..pieces {
                refined.push(from + (to - from) * (j as f64 / pieces as f64));
            }
        }
        refined.push(to);
    }
    refined
}

/// Target replaying a precomputed smooth trajectory, one sample per round.
#[derive(Clone, Debug)]
pub struct SmoothTarget {
    control_points: Vec<Position>,
    trajectory: Vec<Position>,
    cursor: usize,
    position: Position,
    path: Vec<Position>,
}

impl SmoothTarget {
    /// Draw control points starting next to `uav_start` and build a trajectory with at least
    /// `rounds` samples.
    pub fn generate<R: Rng + ?Sized>(
        uav_start: &Position,
        rounds: usize,
        config: &TrajectoryConfig,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if rounds == 0 {
            return Err(PursuitError::config("trajectory needs at least one round"));
        }
        let mut control_points = Vec::with_capacity(config.control_points);
        control_points.push(start_near(uav_start, rng));
        while control_points.len() < config.control_points {
            let last = control_points[control_points.len() - 1];
            let angle = rng.random_range(0.0..std::f64::consts::TAU);
            let radius =
                rng.random_range(config.min_control_distance..=config.max_control_distance);
            let next = last + Position::new(angle.cos(), angle.sin()) * radius;
            control_points.push(clamp_to_spawn(&next));
        }
        let trajectory = refine(
            &catmull_rom(&control_points, rounds),
            config.max_frame_distance,
        );
        debug!(
            "Smooth target trajectory: {} control points, {} samples",
            control_points.len(),
            trajectory.len()
        );
        let mut target = SmoothTarget::from_trajectory(trajectory)?;
        target.control_points = control_points;
        Ok(target)
    }

    /// Replay an explicit trajectory.
    pub fn from_trajectory(trajectory: Vec<Position>) -> Result<Self> {
        let Some(&first) = trajectory.first() else {
            return Err(PursuitError::config("target trajectory is empty"));
        };
        Ok(SmoothTarget {
            control_points: Vec::new(),
            trajectory,
            cursor: 0,
            position: first,
            path: vec![first],
        })
    }

    pub fn control_points(&self) -> &[Position] {
        &self.control_points
    }

    pub fn trajectory(&self) -> &[Position] {
        &self.trajectory
    }
}

impl Target for SmoothTarget {
    fn position(&self) -> Position {
        self.position
    }

    /// The first call yields the first sample; after the last sample the target stays put.
    fn advance(&mut self, _uav: &Position, _rng: &mut dyn RngCore) -> Position {
        let index = self.cursor.min(self.trajectory.len() - 1);
        self.position = self.trajectory[index];
        self.cursor += 1;
        self.path.push(self.position);
        self.position
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.position = self.trajectory[0];
        self.path = vec![self.position];
    }

    fn path(&self) -> &[Position] {
        &self.path
    }
}

/// Axis heading whose next step lands farthest from `uav`. Ties go to the lower action index.
pub fn farthest_direction(position: &Position, uav: &Position, step: f64) -> Orientation {
    let mut best = Orientation::Up;
    let mut best_distance = f64::NEG_INFINITY;
    for heading in Orientation::ALL {
        let distance = (position + heading.unit_step() * step - uav).norm();
        if distance > best_distance {
            best_distance = distance;
            best = heading;
        }
    }
    best
}

/// Heading pointing back into the arena when `position` is within [`BORDER_MARGIN`] of an edge.
pub fn border_direction(position: &Position) -> Option<Orientation> {
    let far = crate::ARENA_MAX - BORDER_MARGIN;
    if position.x < BORDER_MARGIN {
        Some(Orientation::Right)
    } else if position.x > far {
        Some(Orientation::Left)
    } else if position.y < BORDER_MARGIN {
        Some(Orientation::Up)
    } else if position.y > far {
        Some(Orientation::Down)
    } else {
        None
    }
}

/// Target that actively evades the pursuer.
#[derive(Clone, Debug)]
pub struct AdversarialTarget {
    start: Position,
    position: Position,
    step: f64,
    heading: Orientation,
    lock_rounds: u32,
    path: Vec<Position>,
}

impl AdversarialTarget {
    pub fn new(start: Position, step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(PursuitError::config(format!(
                "target step must be positive and finite, got {}",
                step
            )));
        }
        let start = clamp_to_arena(&start);
        Ok(AdversarialTarget {
            start,
            position: start,
            step,
            heading: Orientation::Up,
            lock_rounds: 0,
            path: vec![start],
        })
    }

    /// Spawn next to the UAV the same way the smooth target does.
    pub fn spawn<R: Rng + ?Sized>(uav_start: &Position, step: f64, rng: &mut R) -> Result<Self> {
        AdversarialTarget::new(start_near(uav_start, rng), step)
    }

    pub fn heading(&self) -> Orientation {
        self.heading
    }

    /// Rounds left before a new heading is chosen
    pub fn lock_rounds(&self) -> u32 {
        self.lock_rounds
    }
}

impl Target for AdversarialTarget {
    fn position(&self) -> Position {
        self.position
    }

    fn advance(&mut self, uav: &Position, rng: &mut dyn RngCore) -> Position {
        if self.lock_rounds == 0 {
            self.heading = if rng.random_bool(0.5) {
                farthest_direction(&self.position, uav, self.step)
            } else {
                Orientation::ALL[rng.random_range(0..NUM_ACTIONS)]
            };
            self.lock_rounds = rng.random_range(MIN_LOCK_ROUNDS..=MAX_LOCK_ROUNDS);
        } else {
            self.lock_rounds -= 1;
        }
        if let Some(inward) = border_direction(&self.position) {
            self.heading = inward;
            self.lock_rounds = rng.random_range(MIN_LOCK_ROUNDS..=MAX_LOCK_ROUNDS);
        }
        self.position = clamp_to_arena(&(self.position + self.heading.unit_step() * self.step));
        self.path.push(self.position);
        self.position
    }

    fn reset(&mut self) {
        self.position = self.start;
        self.heading = Orientation::Up;
        self.lock_rounds = 0;
        self.path = vec![self.start];
    }

    fn path(&self) -> &[Position] {
        &self.path
    }
}
