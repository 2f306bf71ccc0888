// Maintenance cycle plus the loop that ticks it
//
// Each tick: apply any set-outputs command received since the last tick,
// re-drive the ramped and linked motors, then run the limit switch interlock.
// The interlock runs on every tick, command or not.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{HCI_BAUD, LOOP_HZ, RobotConfig};
use crate::dispatch::{is_set_outputs, respond, stage_outputs};
use crate::hal::Hardware;
use crate::link::{self, Frame, FrameReader};
use crate::messages::{Fault, RuntimeHealth, Status};
use crate::motor::{WriteStatus, halt_motor, write_motor};
use crate::registry::{MotorKind, MotorRecord, Registry};
use crate::sensor::is_limit_triggered;
use crate::sim::Sim;

/// What happened during one maintenance cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Motors whose set-point came from this tick's command
    pub staged: Vec<usize>,
    /// Motors whose write failed; they are retried on a later tick
    pub failed: Vec<usize>,
    /// Motors stopped by a tripped limit switch
    pub halted: Vec<usize>,
}

impl CycleReport {
    pub fn all_written(&self) -> bool {
        self.failed.is_empty()
    }

    fn note(&mut self, id: usize, status: WriteStatus) {
        if status.is_failed() && !self.failed.contains(&id) {
            self.failed.push(id);
        }
    }
}

/// Would the motor's current command carry it further in `direction`?
fn heading_into(motor: &MotorRecord, direction: i32) -> bool {
    let output = i32::from(motor.last_set).signum() == direction;
    if motor.is_closed_loop() {
        // set_pt is a position there, not a direction
        output
    } else {
        output || i32::from(motor.set_pt).signum() == direction
    }
}

pub struct Runtime {
    registry: Registry,
    hw: Hardware,
    health: RuntimeHealth,
    cmd_timeout_ms: Option<u32>,
    last_cmd_ms: Option<u32>,
}

impl Runtime {
    pub fn new(registry: Registry, hw: Hardware) -> Self {
        Self {
            registry,
            hw,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            cmd_timeout_ms: None,
            last_cmd_ms: None,
        }
    }

    /// Stage zero outputs when set-outputs commands stop arriving
    pub fn with_cmd_timeout(mut self, timeout: Duration) -> Self {
        self.cmd_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u32::MAX));
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Run one full cycle for the command parsed this tick
    ///
    /// Pass an empty command (or `valid = false`) on ticks without one.
    pub fn cycle(&mut self, cmd: &[u8], valid: bool) -> CycleReport {
        let mut report = CycleReport::default();
        self.apply_command(cmd, valid, &mut report);
        self.maintain(&mut report);
        report
    }

    /// Reply frame for read-sensors and diagnostic test commands
    pub fn respond(&mut self, cmd: &[u8], valid: bool) -> Option<Vec<u8>> {
        respond(&mut self.registry, &mut self.hw, cmd, valid)
    }

    /// Step 1: stage a valid set-outputs command and write the motors that
    /// are not re-driven later in the cycle
    pub fn apply_command(&mut self, cmd: &[u8], valid: bool, report: &mut CycleReport) {
        if !is_set_outputs(cmd, valid) {
            return;
        }
        self.on_command();

        let staged = stage_outputs(&mut self.registry, cmd, valid);
        for &id in &staged {
            let motor = self.registry.motor(id);
            if motor.is_bus_duty() || self.registry.is_linked(id) {
                continue;
            }
            let status = write_motor(&mut self.registry, &mut self.hw, id);
            report.note(id, status);
        }
        report.staged.extend(staged);
    }

    /// Steps 2 to 4: ramped motors, the linked pair, then the interlock
    pub fn maintain(&mut self, report: &mut CycleReport) {
        for id in 0..self.registry.motor_count() {
            if self.registry.motor(id).is_bus_duty() && !self.registry.is_linked(id) {
                let status = write_motor(&mut self.registry, &mut self.hw, id);
                report.note(id, status);
            }
        }

        if let Some([a, b]) = self.registry.linked_pair() {
            // Both ends, always, even if the first write fails
            let first = write_motor(&mut self.registry, &mut self.hw, a);
            let second = write_motor(&mut self.registry, &mut self.hw, b);
            report.note(a, first);
            report.note(b, second);
        }

        self.enforce_limits(report);
    }

    /// Stop every motor driving into a tripped limit switch
    fn enforce_limits(&mut self, report: &mut CycleReport) {
        for i in 0..self.registry.limit_switches().len() {
            let limit = self.registry.limit_switches()[i];
            if !is_limit_triggered(&mut self.registry, &mut self.hw, limit) {
                continue;
            }

            let sensor = self.registry.sensor(limit);
            let direction = i32::from(sensor.trip_direction);
            let Some(id) = sensor.which_motor else {
                continue;
            };
            if !heading_into(self.registry.motor(id), direction) {
                continue;
            }

            info!("Limit switch {} tripped, halting motor {}", limit, id);
            let status = halt_motor(&mut self.registry, &mut self.hw, id);
            report.note(id, status);
            if !report.halted.contains(&id) {
                report.halted.push(id);
            }
        }
    }

    fn on_command(&mut self) {
        self.last_cmd_ms = Some(self.hw.clock.millis());
        if self.health != RuntimeHealth::Ok {
            info!("Commands flowing, runtime healthy");
        }
        self.health = RuntimeHealth::Ok;
    }

    /// Watchdog: zero every set-point when commands go stale
    ///
    /// Ramped and linked motors are driven to zero by the cycle. Every other
    /// motor is halted here, on each stale tick until the zero sticks.
    pub fn check_watchdog(&mut self) -> RuntimeHealth {
        let Some(timeout) = self.cmd_timeout_ms else {
            return self.health;
        };
        let age = self
            .last_cmd_ms
            .map(|at| self.hw.clock.millis().wrapping_sub(at));
        if !age.is_none_or(|age| age > timeout) {
            return self.health;
        }

        if self.health != RuntimeHealth::CmdStale {
            warn!("Command stale ({:?} ms old), zeroing set-points", age);
            for motor in self.registry.motors_mut() {
                motor.set_pt = 0;
            }
            self.health = RuntimeHealth::CmdStale;
        }

        for id in 0..self.registry.motor_count() {
            let motor = self.registry.motor(id);
            let cycled = motor.is_bus_duty() || self.registry.is_linked(id);
            if motor.kind == MotorKind::None || cycled || motor.last_set == 0 {
                continue;
            }
            if halt_motor(&mut self.registry, &mut self.hw, id).is_failed() {
                warn!("Watchdog failed to stop motor {}", id);
            }
        }
        self.health
    }

    /// Halt every driven motor, used on shutdown
    pub fn stop_all(&mut self) {
        info!("Stopping all motors");
        for id in 0..self.registry.motor_count() {
            if self.registry.motor(id).kind == MotorKind::None {
                continue;
            }
            if halt_motor(&mut self.registry, &mut self.hw, id).is_failed() {
                warn!("Failed to stop motor {}", id);
            }
        }
    }
}

/// Options for the serial-driven runtime loop
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub port: String,
    pub baud: u32,
    pub loop_hz: u64,
    /// Zero disables the watchdog
    pub cmd_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config/robot.json"),
            port: String::from("/dev/ttyACM0"),
            baud: HCI_BAUD,
            loop_hz: LOOP_HZ,
            cmd_timeout: crate::config::CMD_TIMEOUT,
        }
    }
}

/// Tick period for a loop rate, kept within 1..=1000 Hz
pub fn tick_period(hz: u64) -> Duration {
    Duration::from_micros(1_000_000 / hz.clamp(1, 1000))
}

/// Read frames on a blocking thread and hand them to the loop
fn spawn_reader(
    port: Box<dyn serialport::SerialPort>,
) -> mpsc::UnboundedReceiver<Frame> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut reader = FrameReader::new(port);
        loop {
            match reader.read_frame() {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        break; // loop is gone
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Command link failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = RobotConfig::load(&opts.config)?;
    let buses = config.param_bus_count();
    let registry = config.into_registry()?;

    info!("Attaching simulated hardware bench ({} parameter buses)", buses);
    let sim = Sim::new();
    let mut runtime = Runtime::new(registry, sim.hardware(buses));
    if !opts.cmd_timeout.is_zero() {
        runtime = runtime.with_cmd_timeout(opts.cmd_timeout);
    }

    info!("Opening command link on {} at {} baud", opts.port, opts.baud);
    let port = link::open_port(&opts.port, opts.baud)?;
    let mut replies = port.try_clone()?;
    let mut frames = spawn_reader(port);

    let period = tick_period(opts.loop_hz);
    let step_ms = period.as_millis().max(1) as u32;
    let mut tick = interval(period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        opts.loop_hz,
        opts.cmd_timeout.as_millis()
    );

    let mut link_fault = Fault::None;
    let mut last_status = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => break,
        }
        sim.advance(step_ms);

        // 1. Drain all pending frames (non-blocking), answering as we go
        let mut report = CycleReport::default();
        while let Ok(frame) = frames.try_recv() {
            let valid = frame.is_valid();
            if let Some(reply) = runtime.respond(&frame.bytes, valid) {
                link_fault = link::write_reply(&mut replies, &reply);
            }
            runtime.apply_command(&frame.bytes, valid, &mut report);
        }

        // 2. Watchdog, then ramps, linked pair and interlock
        runtime.check_watchdog();
        runtime.maintain(&mut report);

        if !report.all_written() {
            debug!("Cycle finished with failed writes: {:?}", report.failed);
        }

        // 3. Report status changes
        let status = Status {
            health: runtime.health(),
            link: link_fault,
        };
        if last_status != Some(status) {
            info!("Status: {}", serde_json::to_string(&status)?);
            last_status = Some(status);
        }
    }

    runtime.stop_all();
    Ok(())
}
