//! Modbus TCP transport on top of tokio-modbus

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tracing::{debug, info, warn};

use super::reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use super::ModbusTransport;
use crate::error::{RegisterSpace, Result, StationError};

/// Modbus TCP client for one station
pub struct TcpModbusTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
    ctx: Option<Context>,
    reconnect: ReconnectHelper,
}

impl std::fmt::Debug for TcpModbusTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpModbusTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.ctx.is_some())
            .finish()
    }
}

impl TcpModbusTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        request_timeout: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            request_timeout,
            ctx: None,
            reconnect: ReconnectHelper::new(policy),
        }
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| StationError::connection(format!("Resolve {}:{}: {}", host, port, e)))?;
        addrs
            .next()
            .ok_or_else(|| StationError::connection(format!("No address for {}:{}", host, port)))
    }

    async fn context(&mut self) -> Result<&mut Context> {
        if self.ctx.is_none() {
            self.connect().await?;
        }
        self.ctx.as_mut().ok_or_else(StationError::not_connected)
    }

    fn drop_connection(&mut self, reason: &str) {
        if self.ctx.take().is_some() {
            warn!("Modbus connection to {} closed: {}", self.endpoint(), reason);
        }
        self.reconnect.mark_disconnected();
    }

    /// Map the layered request outcome onto the station error taxonomy
    fn settle<T>(
        &mut self,
        space: RegisterSpace,
        address: u16,
        write: bool,
        outcome: std::result::Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(exception))) => {
                let reason = format!("Modbus exception {:?}", exception);
                if write {
                    Err(StationError::write(address, reason))
                } else {
                    Err(StationError::read(space, address, reason))
                }
            },
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.drop_connection(&reason);
                Err(StationError::connection(format!(
                    "{} 0x{:04X}: {}",
                    space, address, reason
                )))
            },
            Err(_) => {
                self.drop_connection("request timeout");
                Err(StationError::timeout(format!(
                    "{} 0x{:04X} after {:?}",
                    space, address, self.request_timeout
                )))
            },
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpModbusTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }

        let host = self.host.clone();
        let port = self.port;
        let connect_timeout = self.connect_timeout;

        let attempt = self
            .reconnect
            .execute_reconnect(|| async move {
                let addr = Self::resolve(&host, port).await?;
                match tokio::time::timeout(connect_timeout, tcp::connect(addr)).await {
                    Ok(Ok(ctx)) => Ok(ctx),
                    Ok(Err(e)) => Err(StationError::connection(format!("{}: {}", addr, e))),
                    Err(_) => Err(StationError::timeout(format!(
                        "connect {} after {:?}",
                        addr, connect_timeout
                    ))),
                }
            })
            .await;

        match attempt {
            Ok(ctx) => {
                info!("Connected to Modbus TCP {}", self.endpoint());
                self.ctx = Some(ctx);
                Ok(())
            },
            Err(ReconnectError::Backoff(remaining)) => {
                debug!(
                    "Skipping connect to {}, backoff {:?}",
                    self.endpoint(),
                    remaining
                );
                Err(StationError::connection(format!(
                    "{} unreachable, retry in {:?}",
                    self.endpoint(),
                    remaining
                )))
            },
            Err(e) => Err(StationError::connection(format!("{}: {}", self.endpoint(), e))),
        }
    }

    async fn read_holding(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>> {
        let timeout = self.request_timeout;
        let ctx = self.context().await?;
        ctx.set_slave(Slave(unit_id));
        let outcome = tokio::time::timeout(timeout, ctx.read_holding_registers(address, count)).await;
        self.settle(RegisterSpace::Holding, address, false, outcome)
    }

    async fn read_input(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>> {
        let timeout = self.request_timeout;
        let ctx = self.context().await?;
        ctx.set_slave(Slave(unit_id));
        let outcome = tokio::time::timeout(timeout, ctx.read_input_registers(address, count)).await;
        self.settle(RegisterSpace::Input, address, false, outcome)
    }

    async fn write_register(&mut self, address: u16, value: u16, unit_id: u8) -> Result<()> {
        let timeout = self.request_timeout;
        let ctx = self.context().await?;
        ctx.set_slave(Slave(unit_id));
        let outcome = tokio::time::timeout(timeout, ctx.write_single_register(address, value)).await;
        self.settle(RegisterSpace::Holding, address, true, outcome)
    }

    async fn disconnect(&mut self) {
        if self.ctx.take().is_some() {
            info!("Disconnected from Modbus TCP {}", self.endpoint());
        }
        self.reconnect.mark_disconnected();
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
