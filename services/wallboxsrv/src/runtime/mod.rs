//! Station runtime: one task per configured station

pub mod control;
pub mod station;

pub use control::{run_control, spawn_stdin_reader, ControlCommand};
pub use station::{spawn_station, StationCommand, StationHandle, StationStatus, StationTiming};
