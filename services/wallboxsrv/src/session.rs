//! Station session
//!
//! One per configured station. Owns the transport, the register map and the
//! per-point controller memory. Exactly one task drives a session, so none of
//! this state is shared or locked; only [`ControlInputs`] crosses tasks.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::controller::{ChargingController, ControllerState, WriteOutcome};
use crate::core::config::StationConfig;
use crate::error::{Result, StationError};
use crate::inputs::ControlInputs;
use crate::meter::LifetimeMeters;
use crate::poller::Poller;
use crate::protocol::codec::watts_to_register;
use crate::protocol::register_map::MAX_POINTS;
use crate::protocol::{PhaseMode, RegisterMap};
use crate::snapshot::StationSnapshot;
use crate::transport::ModbusTransport;

/// Unit ids tried after the configured one
const FALLBACK_UNIT_IDS: [u8; 2] = [1, 255];

pub struct StationSession {
    name: String,
    transport: Box<dyn ModbusTransport>,
    map: RegisterMap,
    unit_id: u8,
    read_budget: Duration,
    controller: ChargingController,
    states: HashMap<u8, ControllerState>,
    meters: LifetimeMeters,
    inputs: ControlInputs,
}

impl std::fmt::Debug for StationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationSession")
            .field("name", &self.name)
            .field("endpoint", &self.transport.endpoint())
            .field("unit_id", &self.unit_id)
            .finish()
    }
}

impl StationSession {
    pub fn new(config: &StationConfig, transport: Box<dyn ModbusTransport>) -> Self {
        Self {
            name: config.name.clone(),
            transport,
            map: config.register_map.clone(),
            unit_id: config.unit_id,
            read_budget: config.read_budget(),
            controller: ChargingController::new(config.controller.clone()),
            states: HashMap::new(),
            meters: LifetimeMeters::default(),
            inputs: ControlInputs::with_points(&config.initial_inputs()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Handle for external writers of mode, excess and limits
    pub fn inputs(&self) -> ControlInputs {
        self.inputs.clone()
    }

    pub fn controller_state(&self, point: u8) -> Option<&ControllerState> {
        self.states.get(&point)
    }

    /// Find a unit id the station answers to
    ///
    /// Tries the configured id, then 1 and 255, reading the point count
    /// register. Runs once at setup; the cycle itself never probes.
    pub async fn probe_unit_id(&mut self) -> Result<u8> {
        let mut candidates = vec![self.unit_id];
        candidates.extend(FALLBACK_UNIT_IDS.iter().filter(|id| **id != self.unit_id));

        let address = self.map.system.num_points;
        for unit_id in candidates {
            match self.transport.read_input(address, 1, unit_id).await {
                Ok(_) => {
                    if unit_id != self.unit_id {
                        info!(
                            "Station {} answers on unit id {} (configured {})",
                            self.name, unit_id, self.unit_id
                        );
                    }
                    self.unit_id = unit_id;
                    return Ok(unit_id);
                },
                Err(e @ StationError::ConnectionError(_)) => return Err(e),
                Err(e) => debug!("Station {} unit id {} silent: {}", self.name, unit_id, e),
            }
        }
        Err(StationError::connection(format!(
            "No unit id answered on {}",
            self.transport.endpoint()
        )))
    }

    /// Poll, decide and write once
    ///
    /// Returns the snapshot read at the start of the cycle; the effect of this
    /// cycle's writes shows up in the next one.
    pub async fn run_cycle(&mut self) -> Result<StationSnapshot> {
        let mut snapshot = Poller::new(
            self.transport.as_mut(),
            &self.map,
            self.unit_id,
            self.read_budget,
        )
        .poll(&self.name)
        .await?;

        let now = Utc::now();
        for point in &mut snapshot.points {
            point.accumulated_energy_kwh =
                Some(self.meters.observe(point.index, point.energy_session_raw));

            let inputs = self.inputs.get(point.index);
            let state = self.states.entry(point.index).or_default();
            let decision = self.controller.decide(point.index, state, &inputs, now);
            let report = self
                .controller
                .apply(
                    self.transport.as_mut(),
                    &self.map,
                    self.unit_id,
                    point,
                    state,
                    &decision,
                )
                .await;

            if let WriteOutcome::Written(value) = report.max_power {
                info!(
                    "Station {} point {}: max power set to {} W ({})",
                    self.name,
                    point.index,
                    u32::from(value) * 100,
                    decision.mode
                );
            }
            if let WriteOutcome::Written(value) = report.phase_mode {
                info!(
                    "Station {} point {}: phase mode set to {}",
                    self.name,
                    point.index,
                    PhaseMode::from_register(value).unwrap_or(PhaseMode::Unavailable)
                );
            }
        }
        snapshot.system.accumulated_energy_kwh = Some(self.meters.station_total_kwh());

        Ok(snapshot)
    }

    /// Write the station-wide absolute power setpoint
    pub async fn set_power_limit(&mut self, watts: u32) -> Result<()> {
        let value = watts_to_register(watts);
        let address = self.map.system.power_setpoint_abs;
        self.transport.write_register(address, value, self.unit_id).await?;
        info!(
            "Station {} power limit set to {} W",
            self.name,
            u32::from(value) * 100
        );
        Ok(())
    }

    /// Write a charge point's phase mode
    pub async fn set_phase_mode(&mut self, point: u8, mode: PhaseMode) -> Result<()> {
        if point == 0 || point > MAX_POINTS {
            return Err(StationError::config(format!("No charge point {}", point)));
        }
        let address = self.map.phase_mode_address(point)?;
        self.transport
            .write_register(address, mode.register_value(), self.unit_id)
            .await?;
        info!("Station {} point {} phase mode set to {}", self.name, point, mode);
        Ok(())
    }

    /// Close the connection; the next cycle reconnects
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    /// Final shutdown
    pub async fn close(&mut self) {
        if self.transport.is_connected() {
            info!("Closing connection to station {}", self.name);
        }
        self.transport.disconnect().await;
    }
}
