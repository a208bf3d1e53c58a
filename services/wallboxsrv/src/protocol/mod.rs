//! Compleo register protocol: addresses, decode tables, word codecs

pub mod codec;
pub mod codes;
pub mod register_map;

pub use codes::{ChargingMode, DeratingStatus, ErrorCode, PhaseMode, StatusCode};
pub use register_map::{BaseScheme, PointOffsets, RegisterBlock, RegisterMap, SystemRegisters};
