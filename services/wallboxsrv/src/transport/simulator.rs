//! In-memory station simulator
//!
//! Holds holding and input register banks behind a shared lock. Clones share
//! the same banks, so a test can keep one handle to inspect writes and inject
//! faults while the station session owns another. Reading an address that is
//! not populated answers like a real device: with an exception.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::ModbusTransport;
use crate::error::{RegisterSpace, Result, StationError};
use crate::protocol::codec::{encode_ascii, to_tenths};
use crate::protocol::RegisterMap;

#[derive(Debug, Default)]
struct Banks {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    failing_reads: HashSet<(RegisterSpace, u16)>,
    failing_writes: HashSet<u16>,
    writes: Vec<(u16, u16)>,
    request_count: usize,
    offline: bool,
    unit_ids: Vec<u8>,
    latency: Option<Duration>,
}

/// Simulated Compleo station implementing [`ModbusTransport`]
#[derive(Debug, Clone, Default)]
pub struct SimulatedStation {
    banks: Arc<Mutex<Banks>>,
    connected: bool,
}

impl SimulatedStation {
    /// Empty station that answers unit ids 1 and 255
    pub fn new() -> Self {
        let station = Self::default();
        station.banks.lock().unit_ids = vec![1, 255];
        station
    }

    /// Station populated with plausible values for `points` charge points
    pub fn compleo(map: &RegisterMap, points: u8) -> Self {
        let station = Self::new();
        let sys = &map.system;

        station.set_holding(sys.power_setpoint_abs, &[220]);
        station.set_holding(sys.max_unbalanced_load, &[200]);
        station.set_holding(sys.fallback_power, &[37]);
        station.set_input(sys.firmware, &[0x0300, 0x0107]);
        station.set_input(sys.num_points, &[u16::from(points)]);
        station.set_input(sys.totals, &[74, 107, 106, 108, 146]);
        let len = usize::from(sys.string_registers);
        station.set_input(sys.article_number, &encode_ascii("1234567", len));
        station.set_input(sys.serial_number, &encode_ascii("SN2024000042", len));

        for index in 1..=points {
            if let Ok(base) = map.point_base(index) {
                station.populate_point(map, base, index);
            }
        }
        station
    }

    fn populate_point(&self, map: &RegisterMap, base: u16, index: u8) {
        let p = &map.point;
        let at = |offset: u16| base.wrapping_add(offset);
        let charging = index == 1;

        self.set_holding(at(p.max_power), &[110]);
        self.set_holding(at(p.phase_mode), &[1]);
        if p.phase_mode > p.max_power + 1 {
            // Reserved registers between the two setpoints read as zero
            let gap: Vec<u16> = vec![0; usize::from(p.phase_mode - p.max_power - 1)];
            self.set_holding(at(p.max_power + 1), &gap);
        }

        self.set_input(at(p.status_word), &[0x0003]);
        self.set_input(at(p.power), &[if charging { 74 } else { 0 }]);
        self.set_input(at(p.current_l1), &[to_tenths(10.7)]);
        self.set_input(at(p.current_l2), &[to_tenths(10.6)]);
        self.set_input(at(p.current_l3), &[to_tenths(10.8)]);
        self.set_input(at(p.charging_time), &[0, if charging { 3_600 } else { 0 }]);
        self.set_input(at(p.energy), &[if charging { 52 } else { 0 }]);
        self.set_input(at(p.phase_switches), &[3]);
        self.set_input(at(p.error_code), &[0]);
        self.set_input(at(p.status_code), &[if charging { 2 } else { 0 }]);
        self.set_input(at(p.voltage_l1), &[231]);
        self.set_input(at(p.voltage_l2), &[230]);
        self.set_input(at(p.voltage_l3), &[232]);
        let rfid = if charging { "04A2B3C4D5" } else { "" };
        self.set_input(at(p.rfid), &encode_ascii(rfid, usize::from(p.rfid_registers)));
        self.set_input(at(p.meter), &[12_345]);
        self.set_input(at(p.derating), &[0]);
    }

    pub fn set_holding(&self, address: u16, values: &[u16]) {
        let mut banks = self.banks.lock();
        for (i, value) in values.iter().enumerate() {
            banks.holding.insert(address.wrapping_add(i as u16), *value);
        }
    }

    pub fn set_input(&self, address: u16, values: &[u16]) {
        let mut banks = self.banks.lock();
        for (i, value) in values.iter().enumerate() {
            banks.input.insert(address.wrapping_add(i as u16), *value);
        }
    }

    /// Remove registers so reads touching them fail
    pub fn clear_input(&self, address: u16, count: u16) {
        let mut banks = self.banks.lock();
        for i in 0..count {
            banks.input.remove(&address.wrapping_add(i));
        }
    }

    pub fn holding(&self, address: u16) -> Option<u16> {
        self.banks.lock().holding.get(&address).copied()
    }

    /// Any read whose range covers `address` answers with an exception
    pub fn fail_reads(&self, space: RegisterSpace, address: u16) {
        self.banks.lock().failing_reads.insert((space, address));
    }

    pub fn fail_writes(&self, address: u16) {
        self.banks.lock().failing_writes.insert(address);
    }

    pub fn heal(&self) {
        let mut banks = self.banks.lock();
        banks.failing_reads.clear();
        banks.failing_writes.clear();
        banks.offline = false;
    }

    /// Refuse connections and drop the live one on the next request
    pub fn set_offline(&self, offline: bool) {
        self.banks.lock().offline = offline;
    }

    /// Unit ids the station answers to
    pub fn answer_units(&self, unit_ids: &[u8]) {
        self.banks.lock().unit_ids = unit_ids.to_vec();
    }

    /// Delay every request by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.banks.lock().latency = latency;
    }

    /// Successful writes in order, as (address, value)
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.banks.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.banks.lock().writes.clear();
    }

    /// Number of requests that reached the station
    pub fn request_count(&self) -> usize {
        self.banks.lock().request_count
    }

    async fn begin(&mut self, unit_id: u8) -> Result<()> {
        let latency = {
            let mut banks = self.banks.lock();
            if banks.offline {
                self.connected = false;
                return Err(StationError::connection("Connection reset by peer"));
            }
            if !self.connected {
                return Err(StationError::not_connected());
            }
            banks.request_count += 1;
            if !banks.unit_ids.contains(&unit_id) {
                // Wrong unit id: the gateway stays silent
                return Err(StationError::timeout(format!("unit {} did not answer", unit_id)));
            }
            banks.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn read(&self, space: RegisterSpace, address: u16, count: u16) -> Result<Vec<u16>> {
        let banks = self.banks.lock();
        let bank = match space {
            RegisterSpace::Holding => &banks.holding,
            RegisterSpace::Input => &banks.input,
        };
        let mut words = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let addr = address.wrapping_add(i);
            if banks.failing_reads.contains(&(space, addr)) {
                return Err(StationError::read(
                    space,
                    address,
                    "Modbus exception ServerDeviceFailure",
                ));
            }
            match bank.get(&addr) {
                Some(value) => words.push(*value),
                None => {
                    return Err(StationError::read(
                        space,
                        address,
                        "Modbus exception IllegalDataAddress",
                    ))
                },
            }
        }
        Ok(words)
    }
}

#[async_trait]
impl ModbusTransport for SimulatedStation {
    async fn connect(&mut self) -> Result<()> {
        if self.banks.lock().offline {
            return Err(StationError::connection("Connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    async fn read_holding(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>> {
        if !self.connected {
            self.connect().await?;
        }
        self.begin(unit_id).await?;
        self.read(RegisterSpace::Holding, address, count)
    }

    async fn read_input(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>> {
        if !self.connected {
            self.connect().await?;
        }
        self.begin(unit_id).await?;
        self.read(RegisterSpace::Input, address, count)
    }

    async fn write_register(&mut self, address: u16, value: u16, unit_id: u8) -> Result<()> {
        if !self.connected {
            self.connect().await?;
        }
        self.begin(unit_id).await?;
        let mut banks = self.banks.lock();
        if banks.failing_writes.contains(&address) {
            return Err(StationError::write(address, "Modbus exception ServerDeviceFailure"));
        }
        if !banks.holding.contains_key(&address) {
            return Err(StationError::write(address, "Modbus exception IllegalDataAddress"));
        }
        banks.holding.insert(address, value);
        banks.writes.push((address, value));
        debug!("Simulated write 0x{:04X} = {}", address, value);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn endpoint(&self) -> String {
        "simulated".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_populated_registers() {
        let mut station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        let regs = station.read_input(0x0006, 3, 1).await.unwrap();
        assert_eq!(regs, vec![0x0300, 0x0107, 1]);
        assert!(station.is_connected());
    }

    #[tokio::test]
    async fn test_missing_point_raises_exception() {
        let mut station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        let err = station.read_input(0x0201, 8, 1).await.unwrap_err();
        assert!(matches!(err, StationError::RegisterRead { address: 0x0201, .. }));
    }

    #[tokio::test]
    async fn test_writes_update_bank_and_log() {
        let mut station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        let observer = station.clone();
        station.write_register(0x0100, 42, 1).await.unwrap();
        assert_eq!(observer.holding(0x0100), Some(42));
        assert_eq!(observer.writes(), vec![(0x0100, 42)]);

        observer.fail_writes(0x0109);
        assert!(station.write_register(0x0109, 2, 1).await.is_err());
        assert_eq!(observer.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_and_unit_ids() {
        let mut station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        station.answer_units(&[255]);
        let err = station.read_input(0x0008, 1, 1).await.unwrap_err();
        assert!(err.breaks_connection());
        assert_eq!(station.read_input(0x0008, 1, 255).await.unwrap(), vec![1]);

        station.set_offline(true);
        assert!(station.read_input(0x0008, 1, 255).await.is_err());
        assert!(!station.is_connected());
        station.heal();
        assert!(station.read_input(0x0008, 1, 255).await.is_ok());
    }
}
