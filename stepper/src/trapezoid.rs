//! Trapezoidal rate generation for the active block.
//!
//! Three phases, selected by how many step events the block has completed:
//! ramp up over the leading `accelerate_until` events, cruise, ramp down
//! after `decelerate_after`. The ramp itself is time-based: every returned
//! interval is accumulated and multiplied against the block's fixed-point
//! acceleration constant, so no division or float ever runs here.

use math::fixed::mul_hi_u24;
use math::timing::{rate_to_interval, TickPlan};

use crate::block::MotionBlock;
use crate::engine::EngineDiagnostics;

pub struct Trapezoid {
    acceleration_time: u32,
    deceleration_time: u32,
    rate: u32,
    /// Rate reached when acceleration ended; deceleration ramps down from
    /// here. Equals the nominal rate whenever the block has a cruise phase.
    peak_rate: u32,
    step_loops: u8,
    step_loops_nominal: u8,
    interval_nominal: u32,
    clamp_warned: bool,
}

impl Trapezoid {
    pub const fn new() -> Self {
        Self {
            acceleration_time: 0,
            deceleration_time: 0,
            rate: 0,
            peak_rate: 0,
            step_loops: 1,
            step_loops_nominal: 1,
            interval_nominal: 0,
            clamp_warned: false,
        }
    }

    /// Latch a fresh block's rates and boundaries.
    pub fn reset(&mut self, block: &MotionBlock, diag: &mut EngineDiagnostics) {
        self.acceleration_time = 0;
        self.deceleration_time = 0;
        self.rate = block.initial_rate;
        self.peak_rate = block.initial_rate;
        self.clamp_warned = false;
        // An overspeed nominal rate is caught once here; the cruise phase
        // reuses the cached (already clamped) interval.
        let nominal = self.lookup(block.nominal_rate, diag);
        self.interval_nominal = nominal.interval;
        self.step_loops_nominal = nominal.step_loops;
        self.step_loops = rate_to_interval(block.initial_rate).step_loops;
    }

    /// Current step rate, steps per second.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Pulses the scheduler must batch on the upcoming interval.
    pub fn step_loops(&self) -> u8 {
        self.step_loops
    }

    /// Compute the timer interval for the next tick, given how many step
    /// events the block has already completed.
    pub fn next_interval(
        &mut self,
        block: &MotionBlock,
        completed: u32,
        diag: &mut EngineDiagnostics,
    ) -> TickPlan {
        let plan = if completed <= block.accelerate_until {
            let mut rate =
                block.initial_rate + mul_hi_u24(block.acceleration_rate, self.acceleration_time);
            if rate > block.nominal_rate {
                rate = block.nominal_rate;
            }
            let plan = self.lookup(rate, diag);
            self.acceleration_time += plan.interval;
            self.rate = rate;
            self.peak_rate = rate;
            plan
        } else if completed > block.decelerate_after {
            let drop = mul_hi_u24(block.acceleration_rate, self.deceleration_time);
            let mut rate = if drop >= self.peak_rate {
                block.final_rate
            } else {
                self.peak_rate - drop
            };
            if rate < block.final_rate {
                rate = block.final_rate;
            }
            let plan = self.lookup(rate, diag);
            self.deceleration_time += plan.interval;
            self.rate = rate;
            plan
        } else {
            self.rate = block.nominal_rate;
            self.peak_rate = block.nominal_rate;
            TickPlan {
                interval: self.interval_nominal,
                step_loops: self.step_loops_nominal,
                clamped: false,
            }
        };
        self.step_loops = plan.step_loops;
        plan
    }

    fn lookup(&mut self, rate: u32, diag: &mut EngineDiagnostics) -> TickPlan {
        let plan = rate_to_interval(rate);
        if plan.clamped {
            diag.step_rate_clamped = diag.step_rate_clamped.saturating_add(1);
            if !self.clamp_warned {
                self.clamp_warned = true;
                #[cfg(feature = "defmt-log")]
                defmt::warn!("step rate {} too high, interval clamped", rate);
            }
        }
        plan
    }
}

impl Default for Trapezoid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::prepare;
    use crate::kinematics::Kinematics;
    use math::timing::INTERVAL_FLOOR;

    fn scenario_block() -> MotionBlock {
        // 1000 steps, 1000 -> 4000 -> 1000 steps/s, ramps of 200 steps.
        prepare(
            Kinematics::Cartesian,
            [1_000, 0, 0, 0],
            1_000,
            4_000,
            1_000,
            37_500,
            0,
        )
        .unwrap()
    }

    fn run_profile(block: &MotionBlock) -> (Vec<u32>, u64) {
        let mut trapezoid = Trapezoid::new();
        let mut diag = EngineDiagnostics::default();
        trapezoid.reset(block, &mut diag);
        let mut rates = Vec::new();
        let mut elapsed = 0u64;
        let mut completed = 0u32;
        while completed < block.step_event_count {
            let plan = trapezoid.next_interval(block, completed, &mut diag);
            completed += u32::from(plan.step_loops).min(block.step_event_count - completed);
            rates.push(trapezoid.rate());
            elapsed += u64::from(plan.interval);
        }
        (rates, elapsed)
    }

    #[test]
    fn test_rate_shape_accel_cruise_decel() {
        let block = scenario_block();
        let (rates, _) = run_profile(&block);
        assert_eq!(rates.len(), 1_000);

        // Strictly increasing through the leading ramp.
        for pair in rates[..200].windows(2) {
            assert!(pair[1] > pair[0], "acceleration not strictly increasing");
        }
        // Flat at nominal through the cruise.
        for &rate in &rates[201..=800] {
            assert_eq!(rate, 4_000);
        }
        // Non-increasing through the trailing ramp, strictly falling overall.
        for pair in rates[801..].windows(2) {
            assert!(pair[1] <= pair[0], "deceleration increased the rate");
        }
        assert!(*rates.last().unwrap() < 1_200);
    }

    #[test]
    fn test_rate_stays_inside_clamps() {
        let block = scenario_block();
        let (rates, _) = run_profile(&block);
        let floor = block.initial_rate.min(block.final_rate);
        for &rate in &rates {
            assert!(rate >= floor);
            assert!(rate <= block.nominal_rate);
        }
    }

    #[test]
    fn test_elapsed_matches_time_integral() {
        // Ramps: (4000-1000)/37_500 = 80 ms each. Cruise: 600 steps at
        // 4000 steps/s = 150 ms. Total 310 ms at a 1 MHz timer.
        let block = scenario_block();
        let (_, elapsed) = run_profile(&block);
        let expected = 310_000i64;
        let error = (elapsed as i64 - expected).abs();
        assert!(
            error < 2_000,
            "elapsed {elapsed} deviates from integral by {error}"
        );
    }

    #[test]
    fn test_pure_cruise_block_is_flat() {
        let block = prepare(
            Kinematics::Cartesian,
            [500, 0, 0, 0],
            2_000,
            2_000,
            2_000,
            0,
            0,
        )
        .unwrap();
        let (rates, elapsed) = run_profile(&block);
        assert!(rates.iter().all(|&r| r == 2_000));
        // 500 steps at 2000 steps/s is 250 ms.
        assert!((elapsed as i64 - 250_000).abs() < 1_000);
    }

    #[test]
    fn test_fast_block_batches_pulses() {
        let block = prepare(
            Kinematics::Cartesian,
            [10_000, 0, 0, 0],
            2_000,
            30_000,
            2_000,
            200_000,
            0,
        )
        .unwrap();
        let mut trapezoid = Trapezoid::new();
        let mut diag = EngineDiagnostics::default();
        trapezoid.reset(&block, &mut diag);
        let mut completed = 0u32;
        let mut seen_quad = false;
        while completed < block.step_event_count {
            let plan = trapezoid.next_interval(&block, completed, &mut diag);
            assert!(matches!(plan.step_loops, 1 | 2 | 4));
            if plan.step_loops == 4 {
                seen_quad = true;
                assert!(trapezoid.rate() >= 20_000);
            }
            completed += u32::from(plan.step_loops).min(block.step_event_count - completed);
        }
        assert!(seen_quad, "30 kHz cruise never reached the fast regime");
        assert_eq!(diag.step_rate_clamped, 0);
    }

    #[test]
    fn test_overspeed_block_clamps_and_counts() {
        // A planner asking for 50 kHz exceeds the 40 kHz pulse ceiling.
        let block = prepare(
            Kinematics::Cartesian,
            [2_000, 0, 0, 0],
            50_000,
            50_000,
            50_000,
            0,
            0,
        )
        .unwrap();

        let mut trapezoid = Trapezoid::new();
        let mut diag = EngineDiagnostics::default();
        trapezoid.reset(&block, &mut diag);
        // The overspeed nominal rate is counted once when latched.
        assert_eq!(diag.step_rate_clamped, 1);

        // Cruise reuses the clamped interval without recounting.
        let plan = trapezoid.next_interval(&block, 500, &mut diag);
        assert_eq!(plan.interval, INTERVAL_FLOOR);
        assert_eq!(diag.step_rate_clamped, 1);

        // The ramp phase hits the clamp on every lookup.
        let plan = trapezoid.next_interval(&block, 0, &mut diag);
        assert_eq!(plan.interval, INTERVAL_FLOOR);
        assert!(plan.clamped);
        assert_eq!(diag.step_rate_clamped, 2);
    }
}
