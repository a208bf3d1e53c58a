//! Modbus transport abstraction
//!
//! One fixed call signature for the station session, whatever client sits
//! below it. Implementations mark themselves disconnected after any transport
//! failure so that the next call reconnects.

pub mod reconnect;
pub mod simulator;
pub mod tcp;

use async_trait::async_trait;

use crate::error::{RegisterSpace, Result};
use crate::protocol::RegisterBlock;

pub use reconnect::{ConnectionState, ReconnectHelper, ReconnectPolicy};
pub use simulator::SimulatedStation;
pub use tcp::TcpModbusTransport;

/// Register-level access to one station over one connection
#[async_trait]
pub trait ModbusTransport: Send {
    /// Establish the connection, or reuse the live one
    async fn connect(&mut self) -> Result<()>;

    /// FC03 Read Holding Registers
    async fn read_holding(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>>;

    /// FC04 Read Input Registers
    async fn read_input(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>>;

    /// FC06 Write Single Register
    async fn write_register(&mut self, address: u16, value: u16, unit_id: u8) -> Result<()>;

    /// Close the connection; the next call reconnects
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;

    /// Read a block from whichever address space it lives in
    async fn read_block(&mut self, block: RegisterBlock, unit_id: u8) -> Result<Vec<u16>> {
        match block.space {
            RegisterSpace::Holding => self.read_holding(block.address, block.count, unit_id).await,
            RegisterSpace::Input => self.read_input(block.address, block.count, unit_id).await,
        }
    }
}
