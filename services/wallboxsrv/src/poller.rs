//! One update cycle worth of reads and decoding
//!
//! Reads are issued strictly in sequence over the single station connection.
//! Optional reads that fail leave their fields absent. Only the first input
//! block of point 1 is mandatory; losing the connection mid-cycle also ends
//! the cycle because every further read would fail the same way.
//!
//! The read budget never skips the first input block or the holding block of
//! a point. The controller compares its setpoints against the holding block.

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, StationError};
use crate::protocol::codec::{
    decode_ascii, decode_firmware, hundred_watts, tenths, u32_from_words, RegisterWindow,
};
use crate::protocol::register_map::MAX_POINTS;
use crate::protocol::{
    DeratingStatus, ErrorCode, PhaseMode, PointOffsets, RegisterBlock, RegisterMap, StatusCode,
};
use crate::snapshot::{ChargePointSnapshot, StationSnapshot, StatusWord, SystemSnapshot};
use crate::transport::ModbusTransport;

/// Time a cycle may spend before optional reads are skipped
#[derive(Debug, Clone, Copy)]
pub struct CycleBudget {
    started: Instant,
    budget: Duration,
}

impl CycleBudget {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// Reads and decodes one station snapshot
pub struct Poller<'a> {
    transport: &'a mut dyn ModbusTransport,
    map: &'a RegisterMap,
    unit_id: u8,
    budget: CycleBudget,
    skipped: usize,
}

impl<'a> Poller<'a> {
    pub fn new(
        transport: &'a mut dyn ModbusTransport,
        map: &'a RegisterMap,
        unit_id: u8,
        read_budget: Duration,
    ) -> Self {
        Self {
            transport,
            map,
            unit_id,
            budget: CycleBudget::start(read_budget),
            skipped: 0,
        }
    }

    /// Run all reads of one cycle
    pub async fn poll(mut self, station: &str) -> Result<StationSnapshot> {
        let num_points = self.read_num_points().await?;
        let mut system = self.read_system().await?;
        system.num_points = num_points;

        let mut points = Vec::with_capacity(usize::from(num_points));
        for index in 1..=num_points {
            if let Some(point) = self.read_point(index).await? {
                points.push(point);
            }
        }
        if points.is_empty() {
            return Err(StationError::cycle("no charge point data"));
        }

        let session_tenths: u32 = points.iter().map(|p| u32::from(p.energy_session_raw)).sum();
        system.total_session_energy_kwh = f64::from(session_tenths) / 10.0;
        system.points_power_w = points.iter().map(|p| p.current_power_w).sum();

        if self.skipped > 0 {
            warn!(
                "Station {}: read budget spent after {:?}, skipped {} optional reads",
                station,
                self.budget.elapsed(),
                self.skipped
            );
        }

        Ok(StationSnapshot {
            station: station.to_string(),
            unit_id: self.unit_id,
            polled_at: Utc::now(),
            system,
            points,
        })
    }

    /// Optional block read; `None` when it failed or was skipped
    async fn optional(
        &mut self,
        block: RegisterBlock,
        what: &str,
    ) -> Result<Option<RegisterWindow>> {
        if self.budget.exhausted() {
            debug!("Skipping {} read, cycle budget spent", what);
            self.skipped += 1;
            return Ok(None);
        }
        self.read(block, what).await
    }

    /// Block read that ignores the budget
    async fn read(&mut self, block: RegisterBlock, what: &str) -> Result<Option<RegisterWindow>> {
        match self.transport.read_block(block, self.unit_id).await {
            Ok(words) => match RegisterWindow::new(block.address, block.count, words) {
                Ok(window) => Ok(Some(window)),
                Err(e) => {
                    debug!("{} omitted: {}", what, e);
                    Ok(None)
                },
            },
            Err(e @ StationError::ConnectionError(_)) => {
                Err(StationError::cycle(format!("{} read: {}", what, e)))
            },
            Err(e) => {
                debug!("{} omitted: {}", what, e);
                Ok(None)
            },
        }
    }

    async fn read_num_points(&mut self) -> Result<u8> {
        let block = RegisterBlock::input(self.map.system.num_points, 1);
        let raw = self
            .read(block, "num_points")
            .await?
            .and_then(|w| w.word(block.address));
        match raw {
            Some(n) if (1..=u16::from(MAX_POINTS)).contains(&n) => Ok(n as u8),
            Some(n) => {
                warn!("Invalid num_points {}, assuming 1 charge point", n);
                Ok(1)
            },
            None => {
                warn!("num_points unreadable, assuming 1 charge point");
                Ok(1)
            },
        }
    }

    async fn read_system(&mut self) -> Result<SystemSnapshot> {
        let map = self.map;
        let sys = &map.system;
        let mut snapshot = SystemSnapshot::default();

        let single = |address| RegisterBlock::holding(address, 1);
        snapshot.power_setpoint_abs_w = self
            .optional(single(sys.power_setpoint_abs), "power setpoint")
            .await?
            .and_then(|w| w.word(sys.power_setpoint_abs))
            .map(hundred_watts);
        snapshot.max_unbalanced_load_a = self
            .optional(single(sys.max_unbalanced_load), "max unbalanced load")
            .await?
            .and_then(|w| w.word(sys.max_unbalanced_load))
            .map(tenths);
        snapshot.fallback_power_w = self
            .optional(single(sys.fallback_power), "fallback power")
            .await?
            .and_then(|w| w.word(sys.fallback_power))
            .map(hundred_watts);

        if let Some(window) = self
            .optional(RegisterBlock::input(sys.firmware, 2), "firmware")
            .await?
        {
            match decode_firmware(window.words()) {
                Ok(version) => snapshot.firmware_version = Some(version),
                Err(e) => debug!("firmware omitted: {}", e),
            }
        }

        if let Some(w) = self
            .optional(RegisterBlock::input(sys.totals, 5), "station totals")
            .await?
        {
            snapshot.total_power_w = w.at(sys.totals, 0).map(hundred_watts);
            snapshot.total_current_l1_a = w.at(sys.totals, 1).map(tenths);
            snapshot.total_current_l2_a = w.at(sys.totals, 2).map(tenths);
            snapshot.total_current_l3_a = w.at(sys.totals, 3).map(tenths);
            snapshot.unused_power_w = w.at(sys.totals, 4).map(hundred_watts);
        }

        snapshot.article_number = self
            .read_string(
                RegisterBlock::input(sys.article_number, sys.string_registers),
                "article number",
            )
            .await?;
        snapshot.serial_number = self
            .read_string(
                RegisterBlock::input(sys.serial_number, sys.string_registers),
                "serial number",
            )
            .await?;

        Ok(snapshot)
    }

    async fn read_string(&mut self, block: RegisterBlock, what: &str) -> Result<Option<String>> {
        let Some(window) = self.optional(block, what).await? else {
            return Ok(None);
        };
        match decode_ascii(window.words()) {
            Ok(text) => Ok(text),
            Err(e) => {
                debug!("{} omitted: {}", what, e);
                Ok(None)
            },
        }
    }

    /// Read one charge point; `None` when it does not exist
    async fn read_point(&mut self, index: u8) -> Result<Option<ChargePointSnapshot>> {
        let map = self.map;
        let Ok(base) = map.point_base(index) else {
            debug!("No base address for charge point {}, treating it as absent", index);
            return Ok(None);
        };
        let p = &map.point;

        let first = self.read(map.first_input_block(index)?, "point input block").await?;
        let Some(mut point) = first.and_then(|w| decode_first_block(&w, index, base, p)) else {
            if index == 1 {
                return Err(StationError::cycle("charge point 1 not readable"));
            }
            debug!("Charge point {} not present", index);
            return Ok(None);
        };

        if let Some(w) = self.read(map.holding_block(index)?, "point holding block").await? {
            point.max_power_limit_w = w.at(base, p.max_power).map(hundred_watts);
            point.phase_mode = w.at(base, p.phase_mode).and_then(|raw| {
                let mode = PhaseMode::from_register(raw);
                if mode.is_none() {
                    debug!("Charge point {} phase mode {} out of range", index, raw);
                }
                mode
            });
        }

        let status_block = map.second_input_block(index)?;
        if let Some(w) = self.optional(status_block, "point status block").await? {
            point.phase_switch_count = w.at(base, p.phase_switches);
            point.error_code = w.at(base, p.error_code).map(ErrorCode::from);
            point.status_code = w.at(base, p.status_code).map(StatusCode::from);
            point.voltage_l1_v = w.at(base, p.voltage_l1);
            point.voltage_l2_v = w.at(base, p.voltage_l2);
            point.voltage_l3_v = w.at(base, p.voltage_l3);
        }

        point.rfid_tag = self.read_string(map.rfid_block(index)?, "rfid").await?;

        let meter = map.meter_register(index)?;
        point.meter_reading_kwh = self
            .optional(meter, "lifetime meter")
            .await?
            .and_then(|w| w.word(meter.address))
            .map(tenths);

        let derating = map.derating_register(index)?;
        point.derating_status = self
            .optional(derating, "derating")
            .await?
            .and_then(|w| w.word(derating.address))
            .map(DeratingStatus::from);

        Ok(Some(point))
    }
}

fn decode_first_block(
    w: &RegisterWindow,
    index: u8,
    base: u16,
    p: &PointOffsets,
) -> Option<ChargePointSnapshot> {
    let mut point = ChargePointSnapshot::new(index, base);
    point.status_word = StatusWord(w.at(base, p.status_word)?);
    point.current_power_w = hundred_watts(w.at(base, p.power)?);
    point.current_l1_a = tenths(w.at(base, p.current_l1)?);
    point.current_l2_a = tenths(w.at(base, p.current_l2)?);
    point.current_l3_a = tenths(w.at(base, p.current_l3)?);
    point.charging_time_s = u32_from_words(
        w.at(base, p.charging_time)?,
        w.at(base, p.charging_time.checked_add(1)?)?,
    );
    point.energy_session_raw = w.at(base, p.energy)?;
    point.energy_session_kwh = tenths(point.energy_session_raw);
    Some(point)
}
