//! Directional predictors ("experts") and the advice contract they share.
//!
//! Every expert maps the current round's [`Observation`] to a probability distribution over the
//! four actions, indexed by orientation code. Two rules are common to all of them:
//!
//! - When the expert has a usable target position (the target is in view, or the expert has a
//!   confident estimate of it) the raw scores are the positive parts of the displacement along each
//!   heading, `[max(0, d.y), max(0, d.x), max(0, -d.y), max(0, -d.x)]`, normalised by their sum. A
//!   zero displacement has no preferred heading and yields the uniform distribution.
//! - Otherwise the expert falls back to continuing the current heading: `[0.5; 4]` with `1.0` added
//!   at the current orientation, normalised, i.e. `0.5` for the current heading and `1/6` elsewhere.
//!
//! The particle-filter expert lives next to its estimator in [`crate::particle`].
use nalgebra::DVector;
use rand::RngCore;

use crate::visibility::in_view;
use crate::{NUM_ACTIONS, Orientation, Position};

/// What the environment hands every expert at the start of a round.
///
/// `target` is the true target position. Experts may only rely on it when
/// [`Observation::target_in_view`] holds; what they do otherwise is part of each expert's contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub target: Position,
    pub uav: Position,
    pub orientation: Orientation,
}

impl Observation {
    pub fn new(target: Position, uav: Position, orientation: Orientation) -> Self {
        Observation {
            target,
            uav,
            orientation,
        }
    }

    /// Field-of-view test for this round
    pub fn target_in_view(&self) -> bool {
        in_view(&self.target, &self.uav, self.orientation)
    }
}

/// Capability shared by every directional predictor.
///
/// The fusion engine only ever sees experts through this trait. Column order in the advice matrix
/// is the order in which the caller holds its experts, so that order must not change during an
/// episode.
pub trait Expert {
    /// Short identifier used in logs and result headers
    fn name(&self) -> &str;

    /// Advice for this round: a length-4 probability vector indexed by orientation code.
    fn advise(&mut self, observation: &Observation, rng: &mut dyn RngCore) -> DVector<f64>;
}

/// Distribution pointing along the positive components of `displacement`.
pub fn positional_advice(displacement: &Position) -> DVector<f64> {
    let scores = DVector::from_vec(vec![
        displacement.y.max(0.0),
        displacement.x.max(0.0),
        (-displacement.y).max(0.0),
        (-displacement.x).max(0.0),
    ]);
    let total = scores.sum();
    if total > 0.0 && total.is_finite() {
        scores / total
    } else {
        DVector::from_element(NUM_ACTIONS, 1.0 / NUM_ACTIONS as f64)
    }
}

/// Distribution favouring the current heading when no target information is available.
pub fn heading_fallback(orientation: Orientation) -> DVector<f64> {
    let mut scores = DVector::from_element(NUM_ACTIONS, 0.5);
    scores[orientation.index()] += 1.0;
    let total = scores.sum();
    scores / total
}

/// Steers toward the target's current position whenever it is in view.
#[derive(Clone, Debug, Default)]
pub struct PreviousPositionExpert;

impl PreviousPositionExpert {
    pub fn new() -> Self {
        PreviousPositionExpert
    }
}

impl Expert for PreviousPositionExpert {
    fn name(&self) -> &str {
        "previous_position"
    }

    fn advise(&mut self, observation: &Observation, _rng: &mut dyn RngCore) -> DVector<f64> {
        if observation.target_in_view() {
            positional_advice(&(observation.target - observation.uav))
        } else {
            heading_fallback(observation.orientation)
        }
    }
}

/// Extrapolates the target's next position from the sightings logged so far.
///
/// Every call to [`Expert::advise`] appends one entry to the sighting log: the target position when
/// it is in view, `None` otherwise. Log indices are round indices. Once at least two sightings exist
/// the expert extends the straight line through the two most recent ones to the next round index
/// and steers toward that point, whether or not the target is visible this round.
#[derive(Clone, Debug, Default)]
pub struct TrajectoryFittingExpert {
    sightings: Vec<Option<Position>>,
}

impl TrajectoryFittingExpert {
    pub fn new() -> Self {
        TrajectoryFittingExpert {
            sightings: Vec::new(),
        }
    }

    /// Sighting log, one entry per round
    pub fn sightings(&self) -> &[Option<Position>] {
        &self.sightings
    }

    pub fn reset(&mut self) {
        self.sightings.clear();
    }

    /// Log this round's sighting
    pub fn record(&mut self, observation: &Observation) {
        let sighting = observation.target_in_view().then_some(observation.target);
        self.sightings.push(sighting);
    }

    /// Linear extrapolation of the target position at the next round index.
    ///
    /// Returns `None` with fewer than two sightings.
    pub fn predict_next(&self) -> Option<Position> {
        let mut recent = self
            .sightings
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(i, s)| s.map(|p| (i as f64, p)));
        let (last_index, last) = recent.next()?;
        let (prev_index, prev) = recent.next()?;
        let next_index = self.sightings.len() as f64;
        let slope = (last - prev) / (last_index - prev_index);
        Some(last + slope * (next_index - last_index))
    }
}

impl Expert for TrajectoryFittingExpert {
    fn name(&self) -> &str {
        "trajectory_fitting"
    }

    fn advise(&mut self, observation: &Observation, _rng: &mut dyn RngCore) -> DVector<f64> {
        self.record(observation);
        match self.predict_next() {
            Some(predicted) => positional_advice(&(predicted - observation.uav)),
            None => heading_fallback(observation.orientation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn positional_advice_normalises_positive_parts() {
        let advice = positional_advice(&Position::new(300.0, 100.0));
        assert_approx_eq!(advice[Orientation::Up.index()], 0.25);
        assert_approx_eq!(advice[Orientation::Right.index()], 0.75);
        assert_approx_eq!(advice[Orientation::Down.index()], 0.0);
        assert_approx_eq!(advice[Orientation::Left.index()], 0.0);
    }

    #[test]
    fn positional_advice_with_zero_displacement_is_uniform() {
        let advice = positional_advice(&Position::zeros());
        for p in advice.iter() {
            assert_approx_eq!(*p, 0.25);
        }
    }

    #[test]
    fn heading_fallback_boosts_current_heading() {
        for orientation in Orientation::ALL {
            let advice = heading_fallback(orientation);
            assert_approx_eq!(advice.sum(), 1.0);
            for (i, p) in advice.iter().enumerate() {
                let expected = if i == orientation.index() { 0.5 } else { 1.0 / 6.0 };
                assert_approx_eq!(*p, expected);
            }
        }
    }

    #[test]
    fn previous_position_follows_visible_target() {
        let mut expert = PreviousPositionExpert::new();
        let obs = Observation::new(
            Position::new(5000.0, 5600.0),
            Position::new(5000.0, 5000.0),
            Orientation::Up,
        );
        let advice = expert.advise(&obs, &mut rng());
        assert_approx_eq!(advice[Orientation::Up.index()], 1.0);
    }

    #[test]
    fn previous_position_target_north_beyond_range_uses_fallback() {
        let mut expert = PreviousPositionExpert::new();
        let obs = Observation::new(
            Position::new(5000.0, 6500.0),
            Position::new(5000.0, 5000.0),
            Orientation::Up,
        );
        assert!(!obs.target_in_view());
        let advice = expert.advise(&obs, &mut rng());
        assert_eq!(advice, heading_fallback(Orientation::Up));
        assert_approx_eq!(advice[0], 0.5);
    }

    #[test]
    fn trajectory_expert_needs_two_sightings() {
        let mut expert = TrajectoryFittingExpert::new();
        let uav = Position::new(5000.0, 5000.0);
        let first = Observation::new(Position::new(5000.0, 5500.0), uav, Orientation::Up);
        let advice = expert.advise(&first, &mut rng());
        assert_eq!(advice, heading_fallback(Orientation::Up));
        assert!(expert.predict_next().is_none());

        let hidden = Observation::new(Position::new(9000.0, 9000.0), uav, Orientation::Up);
        let advice = expert.advise(&hidden, &mut rng());
        assert_eq!(advice, heading_fallback(Orientation::Up));
        assert_eq!(expert.sightings().len(), 2);
    }

    #[test]
    fn trajectory_expert_extrapolates_over_gaps() {
        let mut expert = TrajectoryFittingExpert::new();
        let uav = Position::new(5000.0, 5000.0);
        // sightings at rounds 0 and 2, nothing at round 1
        expert.record(&Observation::new(Position::new(4900.0, 5400.0), uav, Orientation::Up));
        expert.record(&Observation::new(Position::new(0.0, 0.0), uav, Orientation::Up));
        expert.record(&Observation::new(Position::new(5100.0, 5400.0), uav, Orientation::Up));
        let predicted = expert.predict_next().unwrap();
        assert_approx_eq!(predicted.x, 5200.0);
        assert_approx_eq!(predicted.y, 5400.0);
    }

    #[test]
    fn trajectory_expert_steers_toward_prediction_even_when_hidden() {
        let mut expert = TrajectoryFittingExpert::new();
        let uav = Position::new(5000.0, 5000.0);
        expert.advise(
            &Observation::new(Position::new(5500.0, 5000.0), uav, Orientation::Right),
            &mut rng(),
        );
        expert.advise(
            &Observation::new(Position::new(5600.0, 5000.0), uav, Orientation::Right),
            &mut rng(),
        );
        // hidden this round; the line through x = 5500, 5600 continues to x = 5800
        let advice = expert.advise(
            &Observation::new(Position::new(5700.0, 5000.0), uav, Orientation::Left),
            &mut rng(),
        );
        assert_approx_eq!(advice[Orientation::Right.index()], 1.0);
        expert.reset();
        assert!(expert.sightings().is_empty());
    }
}
