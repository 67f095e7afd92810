//! Background-context facade over the shared engine.
//!
//! The timer interrupt and the main loop touch the same engine state, so
//! every access goes through a scoped critical section: interrupts are
//! disabled on entry and restored on every exit path. On the interrupt side
//! the section is free of contention by construction; on the background side
//! it bounds the time interrupts are held off to one short closure.

use core::cell::RefCell;
use core::time::Duration;

use common::{Axis, InputPinBase, OutputPinBase, TimerBase, NUM_AXES};
use critical_section::Mutex;
use math::measurements::Distance;

use crate::block::{MotionBlock, QueueError};
use crate::endstop::EndstopReport;
use crate::engine::{EngineDiagnostics, StepperEngine};

/// How often `synchronize` rechecks the queue while yielding.
const SYNC_POLL: Duration = Duration::from_millis(1);

pub struct MotionCore<P, I> {
    engine: Mutex<RefCell<StepperEngine<P, I>>>,
}

impl<P: OutputPinBase, I: InputPinBase> MotionCore<P, I> {
    pub fn new(engine: StepperEngine<P, I>) -> Self {
        Self {
            engine: Mutex::new(RefCell::new(engine)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut StepperEngine<P, I>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.engine.borrow_ref_mut(cs)))
    }

    /// Timer interrupt entry point. Returns the interval, in timer ticks,
    /// to program the compare register with.
    pub fn isr_tick(&self) -> u32 {
        self.with(|engine| engine.tick())
    }

    pub fn push_block(&self, block: MotionBlock) -> Result<(), QueueError> {
        self.with(|engine| engine.push_block(block))
    }

    pub fn is_idle(&self) -> bool {
        self.with(|engine| engine.is_idle())
    }

    /// Block the calling context until all queued motion has executed. The
    /// only operation here allowed to wait; it yields between polls and
    /// never touches the interrupt path. Callers needing a bounded wait
    /// wrap their own timeout around it.
    pub async fn synchronize<T: TimerBase>(&self) {
        while !self.is_idle() {
            T::after(SYNC_POLL).await;
        }
    }

    /// Emergency abort: discard all motion and de-assert every output.
    pub fn quick_stop(&self) {
        self.with(|engine| engine.quick_stop());
    }

    pub fn position_steps(&self) -> [i32; NUM_AXES] {
        self.with(|engine| engine.position_steps())
    }

    pub fn position(&self, axis: Axis) -> Distance {
        self.with(|engine| engine.position(axis))
    }

    pub fn set_position_steps(&self, logical: [i32; NUM_AXES]) {
        self.with(|engine| engine.set_position_steps(logical));
    }

    pub fn endstop_report(&self) -> EndstopReport {
        self.with(|engine| engine.endstop_report())
    }

    pub fn clear_endstop_hits(&self) {
        self.with(|engine| engine.clear_endstop_hits());
    }

    pub fn set_endstops_enabled(&self, enabled: bool) {
        self.with(|engine| engine.set_endstops_enabled(enabled));
    }

    pub fn set_homing(&self, homing: bool) {
        self.with(|engine| engine.set_homing(homing));
    }

    pub fn arm_probe(&self, armed: bool) {
        self.with(|engine| engine.arm_probe(armed));
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        self.with(|engine| engine.diagnostics())
    }
}
