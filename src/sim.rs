// In-memory hardware bench
//
// Implements every collaborator trait against one shared state so a run can
// be driven without a robot attached. Every output lands in an ordered event
// journal, which is what the tests assert against.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::hal::{BusParam, Clock, DutyBus, Hardware, ParamBus, Pins, RelayDriver, SpeedReading};

/// One observable hardware output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    PinWrite { pin: u8, high: bool },
    Pwm { pin: u8, duty: u8 },
    Delay { us: u32 },
    Relay { channel: u8, power: i8 },
    Duty { addr: u8, channel: u8, duty: i16 },
    Velocity { bus: usize, axis: u8, value: f32 },
    Position { bus: usize, axis: u8, value: f32 },
}

#[derive(Debug, Default)]
pub struct SimState {
    pub levels: HashMap<u8, bool>,
    pub analog: HashMap<u8, u16>,
    pub shift_in: VecDeque<u8>,
    pub now_ms: u32,
    pub speeds: HashMap<(u8, u8), SpeedReading>,
    pub params: HashMap<(usize, u8, BusParam), f32>,
    /// Make every bus write report failure
    pub fail_writes: bool,
    pub events: Vec<Event>,
}

/// Handle on the shared bench state
#[derive(Debug, Clone, Default)]
pub struct Sim {
    state: Rc<RefCell<SimState>>,
}

impl Sim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hardware bundle wired to this bench
    pub fn hardware(&self, param_buses: usize) -> Hardware {
        Hardware {
            pins: Box::new(SimPins(self.clone())),
            clock: Box::new(SimClock(self.clone())),
            duty: Box::new(SimDutyBus(self.clone())),
            relay: Box::new(SimRelay(self.clone())),
            param_buses: (0..param_buses)
                .map(|bus| Box::new(SimParamBus { sim: self.clone(), bus }) as Box<dyn ParamBus>)
                .collect(),
        }
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    fn record(&self, event: Event) {
        self.state().events.push(event);
    }

    pub fn set_level(&self, pin: u8, high: bool) {
        self.state().levels.insert(pin, high);
    }

    pub fn set_analog(&self, pin: u8, value: u16) {
        self.state().analog.insert(pin, value);
    }

    pub fn advance(&self, ms: u32) {
        let mut state = self.state();
        state.now_ms = state.now_ms.wrapping_add(ms);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Duty values written to one duty controller channel, in order
    pub fn duty_writes(&self, addr: u8, channel: u8) -> Vec<i16> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match *e {
                Event::Duty {
                    addr: a,
                    channel: c,
                    duty,
                } if a == addr && c == channel => Some(duty),
                _ => None,
            })
            .collect()
    }
}

struct SimPins(Sim);

impl Pins for SimPins {
    fn digital_read(&mut self, pin: u8) -> bool {
        self.0.state().levels.get(&pin).copied().unwrap_or(false)
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.0.state().levels.insert(pin, high);
        self.0.record(Event::PinWrite { pin, high });
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        self.0.state().analog.get(&pin).copied().unwrap_or(0)
    }

    fn pwm_write(&mut self, pin: u8, duty: u8) {
        self.0.record(Event::Pwm { pin, duty });
    }

    fn shift_in_msb(&mut self, _data: u8, _clock: u8) -> u8 {
        self.0.state().shift_in.pop_front().unwrap_or(0)
    }
}

struct SimClock(Sim);

impl Clock for SimClock {
    fn millis(&self) -> u32 {
        self.0.state.borrow().now_ms
    }

    fn delay_us(&mut self, us: u32) {
        self.0.record(Event::Delay { us });
    }
}

struct SimDutyBus(Sim);

impl DutyBus for SimDutyBus {
    fn set_duty(&mut self, addr: u8, channel: u8, duty: i16) -> bool {
        if self.0.state().fail_writes {
            return false;
        }
        self.0.record(Event::Duty {
            addr,
            channel,
            duty,
        });
        true
    }

    fn read_speed(&mut self, addr: u8, channel: u8) -> SpeedReading {
        self.0
            .state()
            .speeds
            .get(&(addr, channel))
            .copied()
            .unwrap_or_default()
    }
}

struct SimRelay(Sim);

impl RelayDriver for SimRelay {
    fn drive(&mut self, channel: u8, power: i8) -> bool {
        if self.0.state().fail_writes {
            return false;
        }
        self.0.record(Event::Relay { channel, power });
        true
    }
}

struct SimParamBus {
    sim: Sim,
    bus: usize,
}

impl ParamBus for SimParamBus {
    fn set_velocity(&mut self, axis: u8, value: f32) -> bool {
        if self.sim.state().fail_writes {
            return false;
        }
        self.sim.record(Event::Velocity {
            bus: self.bus,
            axis,
            value,
        });
        true
    }

    fn set_position(&mut self, axis: u8, value: f32) -> bool {
        if self.sim.state().fail_writes {
            return false;
        }
        self.sim.record(Event::Position {
            bus: self.bus,
            axis,
            value,
        });
        true
    }

    fn read_parameter(&mut self, axis: u8, param: BusParam) -> Option<f32> {
        self.sim.state().params.get(&(self.bus, axis, param)).copied()
    }
}
