//! The interrupt-driven scheduler tying the engine together.
//!
//! [`StepperEngine::tick`] is the single entry point a hardware timer
//! compare-match invokes. It never blocks, never allocates and does no
//! unbounded work: one block dequeue at most, a bounded pulse batch, one
//! endstop sweep, one table lookup. The returned value is the tick count to
//! program the timer with.

use common::{Axis, InputPinBase, OutputPinBase, NUM_AXES};
use math::conv::distance_from_steps;
use math::measurements::Distance;
use math::timing::IDLE_INTERVAL;

use crate::block::{MotionBlock, PlannerQueue, QueueError};
use crate::config::EngineConfig;
use crate::dda::{Dda, MotorMask};
use crate::endstop::{EndstopBank, EndstopPins, EndstopReport};
use crate::kinematics::Carriage;
use crate::trapezoid::Trapezoid;

/// Sticky counters polled by the background loop. Nothing in here is ever
/// raised as an error; saturating so a wrapping counter cannot lie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct EngineDiagnostics {
    /// Lookups that hit the interval floor ("step rate too high").
    pub step_rate_clamped: u16,
    /// Ticks spent idle because the planner had nothing queued.
    pub queue_underruns: u16,
}

/// Step/direction pin pair of one motor lane.
pub struct MotorPins<P> {
    pub step: P,
    pub dir: P,
}

/// All motor lanes, plus the optional second X carriage.
pub struct MotorBank<P> {
    lanes: [MotorPins<P>; NUM_AXES],
    x2: Option<MotorPins<P>>,
}

impl<P: OutputPinBase> MotorBank<P> {
    pub fn new(lanes: [MotorPins<P>; NUM_AXES], x2: Option<MotorPins<P>>) -> Self {
        Self { lanes, x2 }
    }

    /// Rewrite every direction output. A set bit drives that lane toward
    /// negative coordinates (direction pin high).
    fn write_directions(&mut self, reverse: MotorMask) {
        for (lane, pins) in self.lanes.iter_mut().enumerate() {
            if reverse.contains(lane) {
                pins.dir.set_high();
            } else {
                pins.dir.set_low();
            }
        }
        if let Some(x2) = &mut self.x2 {
            if reverse.contains(Axis::X.index()) {
                x2.dir.set_high();
            } else {
                x2.dir.set_low();
            }
        }
    }

    /// Emit one step pulse on each masked lane. The pin layer stretches the
    /// high phase to the configured minimum pulse width.
    fn pulse(&mut self, pulses: MotorMask, carriage: Carriage) {
        for lane in 0..NUM_AXES {
            if !pulses.contains(lane) {
                continue;
            }
            if lane == Axis::X.index() && carriage == Carriage::Second {
                if let Some(x2) = &mut self.x2 {
                    x2.step.set_high();
                    x2.step.set_low();
                    continue;
                }
            }
            let pins = &mut self.lanes[lane];
            pins.step.set_high();
            pins.step.set_low();
        }
    }

    /// Drive every step and direction output low.
    fn deassert_all(&mut self) {
        for pins in self.lanes.iter_mut() {
            pins.step.set_low();
            pins.dir.set_low();
        }
        if let Some(x2) = &mut self.x2 {
            x2.step.set_low();
            x2.dir.set_low();
        }
    }
}

pub struct StepperEngine<P, I> {
    config: EngineConfig,
    queue: PlannerQueue,
    current: Option<MotionBlock>,
    step_events_completed: u32,
    trapezoid: Trapezoid,
    dda: Dda,
    motors: MotorBank<P>,
    endstops: EndstopBank<I>,
    /// Direction bits last written to the pins; rewritten only on change.
    committed_dirs: Option<MotorMask>,
    current_dirs: MotorMask,
    diag: EngineDiagnostics,
}

impl<P: OutputPinBase, I: InputPinBase> StepperEngine<P, I> {
    pub fn new(config: EngineConfig, motors: MotorBank<P>, endstops: EndstopPins<I>) -> Self {
        let z_home_to_max = config.home_to_max.contains(Axis::Z);
        Self {
            config,
            queue: PlannerQueue::new(),
            current: None,
            step_events_completed: 0,
            trapezoid: Trapezoid::new(),
            dda: Dda::new(),
            motors,
            endstops: EndstopBank::new(endstops, z_home_to_max),
            committed_dirs: None,
            current_dirs: MotorMask::new(),
            diag: EngineDiagnostics::default(),
        }
    }

    /// Timer interrupt body. Returns the interval, in timer ticks, to
    /// program the compare register with.
    pub fn tick(&mut self) -> u32 {
        let block = match self.current {
            Some(block) => block,
            None => match self.queue.pop() {
                None => {
                    self.diag.queue_underruns = self.diag.queue_underruns.saturating_add(1);
                    return IDLE_INTERVAL;
                }
                Some(block) => {
                    let dirs = self.config.kinematics.resolve_direction(&block);
                    self.trapezoid.reset(&block, &mut self.diag);
                    self.dda.reset(&block);
                    self.step_events_completed = 0;
                    self.current_dirs = dirs;
                    self.current = Some(block);
                    if self.committed_dirs != Some(dirs) {
                        self.motors.write_directions(dirs);
                        self.committed_dirs = Some(dirs);
                        if self.config.dir_settle_ticks > 0 {
                            // Let the drivers settle before the first pulse.
                            return self.config.dir_settle_ticks;
                        }
                    }
                    block
                }
            },
        };

        let plan =
            self.trapezoid
                .next_interval(&block, self.step_events_completed, &mut self.diag);

        let carriage = self.config.kinematics.carriage_for(&block);
        for _ in 0..plan.step_loops {
            let pulses = self.dda.step(&block, self.current_dirs);
            self.motors.pulse(pulses, carriage);
            self.step_events_completed += 1;
            if self.step_events_completed >= block.step_event_count {
                break;
            }
        }

        let positions = self.config.kinematics.logical_position(&self.dda.positions());
        if self.endstops.sample_and_arbitrate(&block, &positions) {
            // Truncation is block-granular: pulses already emitted stand,
            // the remainder of the block is forfeited.
            self.step_events_completed = block.step_event_count;
        }

        if self.step_events_completed >= block.step_event_count {
            self.current = None;
        }
        plan.interval
    }

    // ---- background-context API (callers hold a critical section) ----

    pub fn push_block(&mut self, block: MotionBlock) -> Result<(), QueueError> {
        self.queue.push(block)
    }

    /// Discard all queued motion including the active block and leave every
    /// step/direction output de-asserted. Absolute positions keep counting
    /// the pulses that were actually emitted.
    pub fn quick_stop(&mut self) {
        self.queue.clear();
        self.current = None;
        self.step_events_completed = 0;
        self.motors.deassert_all();
        self.committed_dirs = None;
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn step_events_completed(&self) -> u32 {
        self.step_events_completed
    }

    /// Logical axis positions, in steps.
    pub fn position_steps(&self) -> [i32; NUM_AXES] {
        self.config.kinematics.logical_position(&self.dda.positions())
    }

    /// Logical position of one axis in physical units.
    pub fn position(&self, axis: Axis) -> Distance {
        let steps = self.position_steps()[axis.index()];
        distance_from_steps(steps, self.config.steps_per_mm[axis.index()])
    }

    /// Establish a known logical position (homing result).
    pub fn set_position_steps(&mut self, logical: [i32; NUM_AXES]) {
        self.dda
            .set_positions(self.config.kinematics.motor_position(&logical));
    }

    pub fn endstop_report(&self) -> EndstopReport {
        self.endstops.report()
    }

    pub fn clear_endstop_hits(&mut self) {
        self.endstops.clear_hits();
    }

    pub fn set_endstops_enabled(&mut self, enabled: bool) {
        self.endstops.set_enabled(enabled);
    }

    pub fn set_homing(&mut self, homing: bool) {
        self.endstops.set_homing(homing);
    }

    pub fn arm_probe(&mut self, armed: bool) {
        self.endstops.arm_probe(armed);
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        self.diag
    }
}
