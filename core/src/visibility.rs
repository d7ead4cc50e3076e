//! Field-of-view predicate.
//!
//! The UAV sees an anisotropic rectangle in front of it: up to [`FORWARD_RANGE`] units along its
//! heading (strictly ahead, never level with it) and up to [`LATERAL_HALF_WIDTH`] units to either
//! side. The predicate is pure and is recomputed every round; visibility is never stored.
use crate::{Orientation, Position};

/// Maximum distance along the heading at which the target is visible
pub const FORWARD_RANGE: f64 = 1000.0;
/// Maximum distance perpendicular to the heading at which the target is visible
pub const LATERAL_HALF_WIDTH: f64 = 800.0;

/// Whether `target` lies inside the field of view of a UAV at `uav` facing `orientation`.
///
/// # Example
///
/// ```rust
/// use pursuit::{Orientation, Position, in_view};
///
/// let uav = Position::new(5000.0, 5000.0);
/// assert!(in_view(&Position::new(5100.0, 5900.0), &uav, Orientation::Up));
/// assert!(!in_view(&Position::new(5000.0, 6500.0), &uav, Orientation::Up));
/// ```
pub fn in_view(target: &Position, uav: &Position, orientation: Orientation) -> bool {
    let d = target - uav;
    match orientation {
        Orientation::Up => d.y > 0.0 && d.x.abs() <= LATERAL_HALF_WIDTH && d.y <= FORWARD_RANGE,
        Orientation::Right => {
            d.x > 0.0 && d.y.abs() <= LATERAL_HALF_WIDTH && d.x <= FORWARD_RANGE
        }
        Orientation::Down => {
            d.y < 0.0 && d.x.abs() <= LATERAL_HALF_WIDTH && d.y.abs() <= FORWARD_RANGE
        }
        Orientation::Left => {
            d.x < 0.0 && d.y.abs() <= LATERAL_HALF_WIDTH && d.x.abs() <= FORWARD_RANGE
        }
    }
}

/// [`in_view`] for a raw orientation code. Codes outside `0..4` never see anything.
pub fn in_view_code(target: &Position, uav: &Position, orientation_code: usize) -> bool {
    Orientation::from_index(orientation_code)
        .map(|orientation| in_view(target, uav, orientation))
        .unwrap_or(false)
}
