// Motor writes for every supported actuator kind
//
// Provides:
// - Duty shaping (magnitude clamp, per-cycle ramp, relay power clamp)
// - Scoped select line for relay driver boards
// - The write dispatcher used by the maintenance cycle

mod select;
pub mod shaping;
mod writer;

pub use select::SelectLine;
pub use shaping::{constrain_mag, ramp, relay_power};
pub use writer::{WriteStatus, halt_motor, write_motor};
