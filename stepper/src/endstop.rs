//! Endstop sampling, edge detection and block truncation arbitration.
//!
//! Once per tick the bank samples every switch relevant to the direction the
//! current block is moving, edge-detects against the previous tick and
//! latches sticky hit bits. A genuine trigger forces the block to completion
//! at the next scheduler decision point; a pulse already emitted is never
//! taken back, so truncation is block-granular.

use common::{Axis, InputPinBase, NUM_AXES};

use crate::block::MotionBlock;

/// Static configuration of one switch.
///
/// `pull_up` is consumed by the integration layer when it initializes the
/// pin; it is carried here so one struct describes the switch completely.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct EndstopConfig {
    /// Switch reads low when pressed.
    pub invert: bool,
    pub pull_up: bool,
    /// Armed outside homing as well (crash protection).
    pub always_armed: bool,
}

pub struct Endstop<I> {
    pin: I,
    config: EndstopConfig,
}

impl<I: InputPinBase> Endstop<I> {
    pub fn new(pin: I, config: EndstopConfig) -> Self {
        Self { pin, config }
    }

    /// Pin state with polarity applied: `true` means pressed.
    fn level(&self) -> bool {
        self.pin.is_high() != self.config.invert
    }
}

/// Identity of one physical switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Switch {
    XMin,
    YMin,
    ZMin,
    XMax,
    YMax,
    ZMax,
    Z2,
    Probe,
}

impl Switch {
    const fn bit(self) -> u16 {
        1 << self as u16
    }

    /// The logical axis this switch limits, if any.
    pub const fn axis(self) -> Axis {
        match self {
            Switch::XMin | Switch::XMax => Axis::X,
            Switch::YMin | Switch::YMax => Axis::Y,
            Switch::ZMin | Switch::ZMax | Switch::Z2 | Switch::Probe => Axis::Z,
        }
    }
}

/// Set of switches, one bit each.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct SwitchMask(u16);

impl SwitchMask {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, switch: Switch) {
        self.0 |= switch.bit();
    }

    pub const fn contains(self, switch: Switch) -> bool {
        self.0 & switch.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Snapshot handed to the status/homing reporting layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct EndstopReport {
    pub hits: SwitchMask,
    /// Logical axis position at the most recent trigger on that axis.
    pub trigger_position: [i32; NUM_AXES],
}

/// All switches wired to the machine. Unused entries stay `None` and are
/// never sampled, so a floating input cannot cause spurious stops.
pub struct EndstopPins<I> {
    pub x_min: Option<Endstop<I>>,
    pub y_min: Option<Endstop<I>>,
    pub z_min: Option<Endstop<I>>,
    pub x_max: Option<Endstop<I>>,
    pub y_max: Option<Endstop<I>>,
    pub z_max: Option<Endstop<I>>,
    /// Second Z switch for dual-endstop gantries; paired with the Z switch
    /// on the homing side.
    pub z2: Option<Endstop<I>>,
    /// Bed probe; sampled only while explicitly armed.
    pub probe: Option<Endstop<I>>,
}

impl<I> Default for EndstopPins<I> {
    fn default() -> Self {
        Self {
            x_min: None,
            y_min: None,
            z_min: None,
            x_max: None,
            y_max: None,
            z_max: None,
            z2: None,
            probe: None,
        }
    }
}

pub struct EndstopBank<I> {
    pins: EndstopPins<I>,
    prev: SwitchMask,
    hits: SwitchMask,
    trigger_position: [i32; NUM_AXES],
    enabled: bool,
    homing: bool,
    probe_armed: bool,
    z_home_to_max: bool,
}

impl<I: InputPinBase> EndstopBank<I> {
    pub fn new(pins: EndstopPins<I>, z_home_to_max: bool) -> Self {
        Self {
            pins,
            prev: SwitchMask::new(),
            hits: SwitchMask::new(),
            trigger_position: [0; NUM_AXES],
            enabled: true,
            homing: false,
            probe_armed: false,
            z_home_to_max,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_homing(&mut self, homing: bool) {
        self.homing = homing;
    }

    pub fn is_homing(&self) -> bool {
        self.homing
    }

    pub fn arm_probe(&mut self, armed: bool) {
        self.probe_armed = armed;
    }

    pub fn report(&self) -> EndstopReport {
        EndstopReport {
            hits: self.hits,
            trigger_position: self.trigger_position,
        }
    }

    /// Acknowledge and clear the sticky hit bits.
    pub fn clear_hits(&mut self) {
        self.hits = SwitchMask::new();
    }

    fn monitored(&self, config: EndstopConfig) -> bool {
        self.enabled && (config.always_armed || self.homing)
    }

    /// Sample every relevant switch for the active block and decide whether
    /// the block must be truncated. Sticky bits and trigger positions are
    /// recorded here; the caller forces the block to completion.
    pub fn sample_and_arbitrate(
        &mut self,
        block: &MotionBlock,
        positions: &[i32; NUM_AXES],
    ) -> bool {
        let prev = self.prev;
        let enabled = self.enabled;
        let homing = self.homing;
        let hits = &mut self.hits;
        let trigger_position = &mut self.trigger_position;
        let mut live = SwitchMask::new();
        let mut truncate = false;

        let mut check = |endstop: &Option<Endstop<I>>, switch: Switch, axis: Axis| {
            if let Some(es) = endstop {
                if enabled && (es.config.always_armed || homing) && es.level() {
                    live.insert(switch);
                    if !prev.contains(switch) {
                        hits.insert(switch);
                        trigger_position[axis.index()] = positions[axis.index()];
                        truncate = true;
                    }
                }
            }
        };

        if block.moves(Axis::X) {
            if block.moving_negative(Axis::X) {
                check(&self.pins.x_min, Switch::XMin, Axis::X);
            } else {
                check(&self.pins.x_max, Switch::XMax, Axis::X);
            }
        }
        if block.moves(Axis::Y) {
            if block.moving_negative(Axis::Y) {
                check(&self.pins.y_min, Switch::YMin, Axis::Y);
            } else {
                check(&self.pins.y_max, Switch::YMax, Axis::Y);
            }
        }

        if block.moves(Axis::Z) {
            let negative = block.moving_negative(Axis::Z);
            let (switch, endstop) = if negative {
                (Switch::ZMin, &self.pins.z_min)
            } else {
                (Switch::ZMax, &self.pins.z_max)
            };
            // The companion switch shadows the homing-side Z endstop.
            let companion_side = negative != self.z_home_to_max;
            let z_position = positions[Axis::Z.index()];

            if let Some(es) = endstop {
                if self.monitored(es.config) {
                    let z_level = es.level();
                    let z_edge = z_level && !prev.contains(switch);
                    if z_level {
                        live.insert(switch);
                    }
                    if z_edge {
                        self.hits.insert(switch);
                        self.trigger_position[Axis::Z.index()] = z_position;
                    }

                    match (companion_side, &self.pins.z2) {
                        (true, Some(z2)) => {
                            let z2_level = z2.level();
                            let z2_edge = z2_level && !prev.contains(Switch::Z2);
                            if z2_level {
                                live.insert(Switch::Z2);
                            }
                            if z2_edge {
                                self.hits.insert(Switch::Z2);
                                self.trigger_position[Axis::Z.index()] = z_position;
                            }
                            let any_edge = z_edge || z2_edge;
                            if self.homing {
                                // Tolerate one misadjusted switch while
                                // homing; require both before stopping.
                                if z_level && z2_level && any_edge {
                                    truncate = true;
                                }
                            } else if any_edge {
                                truncate = true;
                            }
                        }
                        _ => {
                            if z_edge {
                                truncate = true;
                            }
                        }
                    }
                }
            }

            if self.probe_armed {
                if let Some(probe) = &self.pins.probe {
                    if probe.level() {
                        live.insert(Switch::Probe);
                        if !prev.contains(Switch::Probe) {
                            self.hits.insert(Switch::Probe);
                            self.trigger_position[Axis::Z.index()] = z_position;
                            truncate = true;
                        }
                    }
                }
            }
        }

        self.prev = live;
        truncate
    }
}
