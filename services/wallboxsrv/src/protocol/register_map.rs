//! Register map of the Compleo station
//!
//! Addresses are configuration, not constants: hardware generations differ in
//! where the charge-point blocks start and in single-register shifts of some
//! fields. The defaults describe the canonical layout (point N at N × 0x0100).

use serde::{Deserialize, Serialize};

use crate::error::{RegisterSpace, Result, StationError};

/// Highest charge-point index a station can report
pub const MAX_POINTS: u8 = 2;

/// Largest register count a single Modbus read may request
pub const MAX_READ_COUNT: u16 = 125;

/// A contiguous range of registers in one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub space: RegisterSpace,
    pub address: u16,
    pub count: u16,
}

impl RegisterBlock {
    pub const fn holding(address: u16, count: u16) -> Self {
        Self {
            space: RegisterSpace::Holding,
            address,
            count,
        }
    }

    pub const fn input(address: u16, count: u16) -> Self {
        Self {
            space: RegisterSpace::Input,
            address,
            count,
        }
    }
}

/// How charge-point base addresses are derived from the point index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaseScheme {
    /// Point N starts at N × stride (0x0100 canonical, 0x1000 alternate)
    Stride { stride: u16 },
    /// Explicit base per point, index 1 first
    Explicit { bases: Vec<u16> },
}

impl Default for BaseScheme {
    fn default() -> Self {
        BaseScheme::Stride { stride: 0x0100 }
    }
}

impl BaseScheme {
    /// Base address of a 1-based point index
    pub fn base(&self, index: u8) -> Option<u16> {
        if index == 0 {
            return None;
        }
        match self {
            BaseScheme::Stride { stride } => {
                u16::try_from(u32::from(index) * u32::from(*stride)).ok()
            },
            BaseScheme::Explicit { bases } => bases.get(usize::from(index) - 1).copied(),
        }
    }

    /// Number of point indices this scheme can address
    pub fn point_count(&self) -> usize {
        match self {
            BaseScheme::Stride { .. } => usize::from(MAX_POINTS),
            BaseScheme::Explicit { bases } => bases.len(),
        }
    }
}

/// Fixed-address system registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemRegisters {
    /// Holding, ×100 W
    pub power_setpoint_abs: u16,
    /// Holding, ×0.1 A
    pub max_unbalanced_load: u16,
    /// Holding, ×100 W
    pub fallback_power: u16,
    /// Input, two registers: patch, then major/minor
    pub firmware: u16,
    /// Input, raw point count
    pub num_points: u16,
    /// Input, five registers: power, current L1..L3, unused power
    pub totals: u16,
    /// Input, ASCII
    pub article_number: u16,
    /// Input, ASCII
    pub serial_number: u16,
    /// Register count of the article/serial strings
    pub string_registers: u16,
}

impl Default for SystemRegisters {
    fn default() -> Self {
        Self {
            power_setpoint_abs: 0x0000,
            max_unbalanced_load: 0x0002,
            fallback_power: 0x0003,
            firmware: 0x0006,
            num_points: 0x0008,
            totals: 0x0009,
            article_number: 0x0020,
            serial_number: 0x0030,
            string_registers: 16,
        }
    }
}

/// Offsets of the repeating charge-point block, relative to the point base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointOffsets {
    // Holding
    pub max_power: u16,
    pub phase_mode: u16,

    // Input, first block
    pub status_word: u16,
    pub power: u16,
    pub current_l1: u16,
    pub current_l2: u16,
    pub current_l3: u16,
    /// Two registers, high word first
    pub charging_time: u16,
    pub energy: u16,

    // Input, second block
    pub phase_switches: u16,
    pub error_code: u16,
    pub status_code: u16,
    pub voltage_l1: u16,
    pub voltage_l2: u16,
    pub voltage_l3: u16,

    // Input, read individually
    pub rfid: u16,
    pub rfid_registers: u16,
    pub meter: u16,
    pub derating: u16,
}

impl Default for PointOffsets {
    fn default() -> Self {
        Self {
            max_power: 0x000,
            phase_mode: 0x009,
            status_word: 0x001,
            power: 0x002,
            current_l1: 0x003,
            current_l2: 0x004,
            current_l3: 0x005,
            charging_time: 0x006,
            energy: 0x008,
            phase_switches: 0x00A,
            error_code: 0x00B,
            status_code: 0x00C,
            voltage_l1: 0x00D,
            voltage_l2: 0x00E,
            voltage_l3: 0x00F,
            rfid: 0x010,
            rfid_registers: 10,
            meter: 0x018,
            derating: 0x01A,
        }
    }
}

/// Inclusive span `[min, max]` of a field set, as (start, count)
fn span(first: &[u16], last: &[u16]) -> (u16, u16) {
    let start = first.iter().copied().min().unwrap_or(0);
    let end = last.iter().copied().max().unwrap_or(start);
    (start, end.saturating_sub(start) + 1)
}

impl PointOffsets {
    fn holding_span(&self) -> (u16, u16) {
        let fields = [self.max_power, self.phase_mode];
        span(&fields, &fields)
    }

    fn first_input_span(&self) -> (u16, u16) {
        let fields = [
            self.status_word,
            self.power,
            self.current_l1,
            self.current_l2,
            self.current_l3,
            self.charging_time,
            self.energy,
        ];
        let ends = [
            self.status_word,
            self.power,
            self.current_l1,
            self.current_l2,
            self.current_l3,
            self.charging_time.saturating_add(1),
            self.energy,
        ];
        span(&fields, &ends)
    }

    fn second_input_span(&self) -> (u16, u16) {
        let fields = [
            self.phase_switches,
            self.error_code,
            self.status_code,
            self.voltage_l1,
            self.voltage_l2,
            self.voltage_l3,
        ];
        span(&fields, &fields)
    }

    /// Number of registers the block occupies past its base
    pub fn footprint(&self) -> u16 {
        [
            self.holding_span(),
            self.first_input_span(),
            self.second_input_span(),
            (self.rfid, self.rfid_registers),
            (self.meter, 1),
            (self.derating, 1),
        ]
        .iter()
        .map(|(start, count)| start.saturating_add(*count))
        .max()
        .unwrap_or(0)
    }
}

/// Complete, validated address table for one station
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    pub bases: BaseScheme,
    pub system: SystemRegisters,
    pub point: PointOffsets,
}

impl RegisterMap {
    /// Layout with charge points at 0x1000 and 0x2000
    pub fn alternate() -> Self {
        Self {
            bases: BaseScheme::Stride { stride: 0x1000 },
            ..Default::default()
        }
    }

    pub fn point_base(&self, index: u8) -> Result<u16> {
        self.bases.base(index).ok_or_else(|| {
            StationError::config(format!("No base address for charge point {}", index))
        })
    }

    fn at(&self, index: u8, offset: u16) -> Result<u16> {
        let base = self.point_base(index)?;
        base.checked_add(offset).ok_or_else(|| {
            StationError::config(format!(
                "Offset 0x{:03X} overflows base 0x{:04X}",
                offset, base
            ))
        })
    }

    /// Max power + phase mode, read as one range
    pub fn holding_block(&self, index: u8) -> Result<RegisterBlock> {
        let (start, count) = self.point.holding_span();
        Ok(RegisterBlock::holding(self.at(index, start)?, count))
    }

    /// Status word through session energy
    pub fn first_input_block(&self, index: u8) -> Result<RegisterBlock> {
        let (start, count) = self.point.first_input_span();
        Ok(RegisterBlock::input(self.at(index, start)?, count))
    }

    /// Phase switches through L3 voltage
    pub fn second_input_block(&self, index: u8) -> Result<RegisterBlock> {
        let (start, count) = self.point.second_input_span();
        Ok(RegisterBlock::input(self.at(index, start)?, count))
    }

    pub fn rfid_block(&self, index: u8) -> Result<RegisterBlock> {
        Ok(RegisterBlock::input(
            self.at(index, self.point.rfid)?,
            self.point.rfid_registers,
        ))
    }

    pub fn meter_register(&self, index: u8) -> Result<RegisterBlock> {
        Ok(RegisterBlock::input(self.at(index, self.point.meter)?, 1))
    }

    pub fn derating_register(&self, index: u8) -> Result<RegisterBlock> {
        Ok(RegisterBlock::input(self.at(index, self.point.derating)?, 1))
    }

    /// Holding address of the point's max-power setpoint
    pub fn max_power_address(&self, index: u8) -> Result<u16> {
        self.at(index, self.point.max_power)
    }

    /// Holding address of the point's phase-mode setpoint
    pub fn phase_mode_address(&self, index: u8) -> Result<u16> {
        self.at(index, self.point.phase_mode)
    }

    pub fn validate(&self) -> Result<()> {
        let footprint = self.point.footprint();

        for (start, count) in [
            self.point.holding_span(),
            self.point.first_input_span(),
            self.point.second_input_span(),
            (self.point.rfid, self.point.rfid_registers),
        ] {
            if count == 0 || count > MAX_READ_COUNT {
                return Err(StationError::config(format!(
                    "Point block at offset 0x{:03X} spans {} registers",
                    start, count
                )));
            }
        }
        if self.system.string_registers == 0 || self.system.string_registers > MAX_READ_COUNT {
            return Err(StationError::config(format!(
                "Invalid string register count {}",
                self.system.string_registers
            )));
        }

        let count = self.bases.point_count();
        if count == 0 || count > usize::from(MAX_POINTS) {
            return Err(StationError::config(format!(
                "Expected 1 to {} charge point base addresses, got {}",
                MAX_POINTS, count
            )));
        }

        let mut bases = Vec::with_capacity(count);
        for index in (1..=MAX_POINTS).take(count) {
            let base = self.point_base(index)?;
            if base.checked_add(footprint).is_none() {
                return Err(StationError::config(format!(
                    "Charge point {} block at 0x{:04X} exceeds the address space",
                    index, base
                )));
            }
            bases.push(base);
        }
        bases.sort_unstable();
        for pair in bases.windows(2) {
            if pair[1] - pair[0] < footprint {
                return Err(StationError::config(format!(
                    "Charge point blocks at 0x{:04X} and 0x{:04X} overlap ({} registers each)",
                    pair[0], pair[1], footprint
                )));
            }
        }
        Ok(())
    }
}
