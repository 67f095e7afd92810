//! Conversions between step counts and physical distances.
//!
//! These run in the background context only (position reporting, block
//! preparation); the interrupt path never leaves integer steps.

use measurements::Distance;
use micromath::F32Ext;

/// Steps-per-millimeter for an axis driven through a belt or leadscrew.
///
/// Returns `None` for degenerate geometry.
pub fn steps_per_mm(steps_per_revolution: u32, mm_per_revolution: f64) -> Option<f64> {
    if steps_per_revolution == 0 || mm_per_revolution <= 0.0 {
        return None;
    }
    Some(f64::from(steps_per_revolution) / mm_per_revolution)
}

/// Physical distance covered by a signed step count.
pub fn distance_from_steps(steps: i32, steps_per_mm: f64) -> Distance {
    if steps_per_mm == 0.0 {
        return Distance::from_millimeters(0.0);
    }
    Distance::from_millimeters(f64::from(steps) / steps_per_mm)
}

/// Signed step count closest to a physical distance.
pub fn steps_from_distance(distance: Distance, steps_per_mm: f64) -> i32 {
    let steps = distance.as_millimeters() * steps_per_mm;
    // Round half away from zero on the magnitude; f64::abs/round live in
    // std, so spell it out over micromath's f32 floor.
    let magnitude = if steps >= 0.0 { steps } else { -steps };
    let rounded = ((magnitude + 0.5) as f32).floor() as i32;
    if steps < 0.0 {
        -rounded
    } else {
        rounded
    }
}
