//! Multi-axis integer DDA (Bresenham) pulse distribution.
//!
//! One signed accumulator per motor lane. Every tick each accumulator gains
//! that lane's step count; crossing zero emits a pulse and subtracts the
//! dominant lane's total back out. All lanes finish on the same tick with
//! bounded per-step timing error, and no division is ever needed.

use common::NUM_AXES;

use crate::block::MotionBlock;

/// Set of physical motor lanes. Lane indices match [`common::Axis`] order;
/// what a lane *means* depends on the kinematics (e.g. lane 0 is the A motor
/// on CoreXY).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct MotorMask(u8);

impl MotorMask {
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn with(mut self, lane: usize) -> Self {
        self.0 |= 1 << lane;
        self
    }

    pub fn insert(&mut self, lane: usize) {
        self.0 |= 1 << lane;
    }

    pub const fn contains(self, lane: usize) -> bool {
        self.0 & (1 << lane) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Accumulators plus the machine's absolute motor positions.
///
/// Positions persist across blocks so the absolute coordinate stays
/// continuous; accumulators are reseeded per block.
pub struct Dda {
    counters: [i32; NUM_AXES],
    positions: [i32; NUM_AXES],
}

impl Dda {
    pub const fn new() -> Self {
        Self {
            counters: [0; NUM_AXES],
            positions: [0; NUM_AXES],
        }
    }

    /// Seed the accumulators for a fresh block.
    pub fn reset(&mut self, block: &MotionBlock) {
        let seed = -((block.step_event_count >> 1) as i32);
        self.counters = [seed; NUM_AXES];
    }

    /// Advance one step event: returns the lanes that pulse this event and
    /// commits their position change, signed by `reverse`.
    pub fn step(&mut self, block: &MotionBlock, reverse: MotorMask) -> MotorMask {
        let mut pulses = MotorMask::new();
        for lane in 0..NUM_AXES {
            self.counters[lane] += block.steps[lane] as i32;
            if self.counters[lane] > 0 {
                self.counters[lane] -= block.step_event_count as i32;
                self.positions[lane] += if reverse.contains(lane) { -1 } else { 1 };
                pulses.insert(lane);
            }
        }
        pulses
    }

    pub fn positions(&self) -> [i32; NUM_AXES] {
        self.positions
    }

    /// Overwrite the absolute motor positions (homing establishes these).
    pub fn set_positions(&mut self, positions: [i32; NUM_AXES]) {
        self.positions = positions;
    }
}

impl Default for Dda {
    fn default() -> Self {
        Self::new()
    }
}
