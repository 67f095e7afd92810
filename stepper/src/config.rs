//! Engine configuration, consumed once at construction.

use common::{AxisMask, NUM_AXES};

use crate::kinematics::Kinematics;

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub kinematics: Kinematics,
    /// Ticks to wait between rewriting direction pins and the next step
    /// pulse, honoring the driver's direction setup time.
    pub dir_settle_ticks: u32,
    /// Minimum step pulse width. The engine raises and lowers the step pin
    /// back to back; the pin layer must stretch the high phase to this.
    pub min_pulse_width_ns: u32,
    /// Steps per millimeter per logical axis, for physical-unit reporting.
    pub steps_per_mm: [f64; NUM_AXES],
    /// Axes that home toward their maximum endstop.
    pub home_to_max: AxisMask,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kinematics: Kinematics::Cartesian,
            dir_settle_ticks: 1,
            min_pulse_width_ns: 2_000,
            steps_per_mm: [80.0, 80.0, 400.0, 93.0],
            home_to_max: AxisMask::new(),
        }
    }
}
