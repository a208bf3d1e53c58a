//! Compleo Wallbox Service (wallboxsrv)
//!
//! Polls Compleo wallboxes over Modbus TCP, decodes system and per charge
//! point registers into snapshots, and runs a smart-charging controller that
//! writes the maximum charging power and phase mode back to the device.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  ControlInputs  │───►│ StationSession  │───►│ ModbusTransport │
//! │ (mode, excess)  │    │ poll/decide/set │    │  (TCP / sim)    │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │
//!                                 ▼
//!                        ┌─────────────────┐
//!                        │  StationStatus  │
//!                        │ (watch channel) │
//!                        └─────────────────┘
//! ```
//!
//! Each configured station gets one [`StationSession`] driven by exactly one
//! task (see [`runtime`]). The session owns its connection and controller
//! memory; only [`ControlInputs`] and the published status cross tasks.
//!
//! # Register Spaces
//!
//! - **Holding registers** (FC03/FC06): setpoints, limits, phase mode
//! - **Input registers** (FC04): measurements, status, identity strings

pub mod controller;
pub mod core;
pub mod error;
pub mod inputs;
pub mod meter;
pub mod poller;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use controller::{ChargingController, ControlDecision, ControllerSettings, ControllerState};
pub use crate::core::config::{StationConfig, WallboxConfig};
pub use error::{Result, StationError};
pub use inputs::{ControlInputs, PointInputs};
pub use protocol::{ChargingMode, PhaseMode, RegisterMap};
pub use runtime::{spawn_station, StationHandle, StationStatus, StationTiming};
pub use session::StationSession;
pub use snapshot::{ChargePointSnapshot, StationSnapshot, SystemSnapshot};
pub use transport::{ModbusTransport, SimulatedStation, TcpModbusTransport};
