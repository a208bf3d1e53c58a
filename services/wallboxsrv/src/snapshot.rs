//! Decoded station data for one update cycle
//!
//! A snapshot is built in full by one poll and then replaced as a whole.
//! Every `Option` field is either freshly read this cycle or `None`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{DeratingStatus, ErrorCode, PhaseMode, StatusCode};

/// Raw charge point status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub fn bit(&self, n: u8) -> bool {
        n < 16 && (self.0 >> n) & 1 == 1
    }
}

/// Station-wide values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub firmware_version: Option<String>,
    pub article_number: Option<String>,
    pub serial_number: Option<String>,
    /// Absolute power setpoint, W (register in 100 W units)
    pub power_setpoint_abs_w: Option<u32>,
    /// Max unbalanced load, A (register in 0.1 A units)
    pub max_unbalanced_load_a: Option<f64>,
    /// Fallback power, W (register in 100 W units)
    pub fallback_power_w: Option<u32>,
    pub total_power_w: Option<u32>,
    pub total_current_l1_a: Option<f64>,
    pub total_current_l2_a: Option<f64>,
    pub total_current_l3_a: Option<f64>,
    pub unused_power_w: Option<u32>,
    /// Point count reported by the station, 1 when unreadable or out of range
    pub num_points: u8,
    /// Sum of session energy over all present points
    pub total_session_energy_kwh: f64,
    /// Sum of instantaneous power over all present points
    pub points_power_w: u32,
    /// Sum of the per-point lifetime accumulators
    pub accumulated_energy_kwh: Option<f64>,
}

/// One charge point; only present when its first input block was readable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargePointSnapshot {
    pub index: u8,
    pub base_address: u16,

    // First input block, always present
    pub status_word: StatusWord,
    pub current_power_w: u32,
    pub current_l1_a: f64,
    pub current_l2_a: f64,
    pub current_l3_a: f64,
    pub charging_time_s: u32,
    pub energy_session_kwh: f64,
    /// Raw session energy in 0.1 kWh, used for exact summation
    #[serde(skip)]
    pub energy_session_raw: u16,

    // Second input block
    pub phase_switch_count: Option<u16>,
    pub error_code: Option<ErrorCode>,
    pub status_code: Option<StatusCode>,
    pub voltage_l1_v: Option<u16>,
    pub voltage_l2_v: Option<u16>,
    pub voltage_l3_v: Option<u16>,

    // Individually read
    pub rfid_tag: Option<String>,
    pub meter_reading_kwh: Option<f64>,
    pub derating_status: Option<DeratingStatus>,

    // Holding block
    pub max_power_limit_w: Option<u32>,
    pub phase_mode: Option<PhaseMode>,

    /// Lifetime energy summed from session deltas by this process
    pub accumulated_energy_kwh: Option<f64>,
}

impl ChargePointSnapshot {
    /// Point with only the first input block decoded
    pub fn new(index: u8, base_address: u16) -> Self {
        Self {
            index,
            base_address,
            status_word: StatusWord(0),
            current_power_w: 0,
            current_l1_a: 0.0,
            current_l2_a: 0.0,
            current_l3_a: 0.0,
            charging_time_s: 0,
            energy_session_kwh: 0.0,
            energy_session_raw: 0,
            phase_switch_count: None,
            error_code: None,
            status_code: None,
            voltage_l1_v: None,
            voltage_l2_v: None,
            voltage_l3_v: None,
            rfid_tag: None,
            meter_reading_kwh: None,
            derating_status: None,
            max_power_limit_w: None,
            phase_mode: None,
            accumulated_energy_kwh: None,
        }
    }
}

/// Everything one update cycle produced for a station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub station: String,
    pub unit_id: u8,
    pub polled_at: DateTime<Utc>,
    pub system: SystemSnapshot,
    pub points: Vec<ChargePointSnapshot>,
}

impl StationSnapshot {
    pub fn point(&self, index: u8) -> Option<&ChargePointSnapshot> {
        self.points.iter().find(|p| p.index == index)
    }
}
