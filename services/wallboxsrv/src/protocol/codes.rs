//! Enumerated register values

use serde::{Deserialize, Serialize};
use std::fmt;

/// OCPP-style charge point status (input register, values 0–8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Available,
    Preparing,
    Charging,
    SuspendedEvse,
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    Unknown(u16),
}

impl From<u16> for StatusCode {
    fn from(raw: u16) -> Self {
        match raw {
            0 => Self::Available,
            1 => Self::Preparing,
            2 => Self::Charging,
            3 => Self::SuspendedEvse,
            4 => Self::SuspendedEv,
            5 => Self::Finishing,
            6 => Self::Reserved,
            7 => Self::Unavailable,
            8 => Self::Faulted,
            other => Self::Unknown(other),
        }
    }
}

impl StatusCode {
    /// Whether energy is currently flowing or about to
    pub fn is_charging(&self) -> bool {
        matches!(self, Self::Charging)
    }

    /// Whether a vehicle is attached
    pub fn is_plugged(&self) -> bool {
        matches!(
            self,
            Self::Preparing
                | Self::Charging
                | Self::SuspendedEvse
                | Self::SuspendedEv
                | Self::Finishing
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Preparing => write!(f, "Preparing"),
            Self::Charging => write!(f, "Charging"),
            Self::SuspendedEvse => write!(f, "SuspendedEVSE"),
            Self::SuspendedEv => write!(f, "SuspendedEV"),
            Self::Finishing => write!(f, "Finishing"),
            Self::Reserved => write!(f, "Reserved"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Unknown(raw) => write!(f, "Unknown({})", raw),
        }
    }
}

/// Charge point error code, numbered after the OCPP 1.6 error list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoError,
    ConnectorLockFailure,
    EvCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(raw: u16) -> Self {
        match raw {
            0 => Self::NoError,
            1 => Self::ConnectorLockFailure,
            2 => Self::EvCommunicationError,
            3 => Self::GroundFailure,
            4 => Self::HighTemperature,
            5 => Self::InternalError,
            6 => Self::LocalListConflict,
            7 => Self::OtherError,
            8 => Self::OverCurrentFailure,
            9 => Self::OverVoltage,
            10 => Self::PowerMeterFailure,
            11 => Self::PowerSwitchFailure,
            12 => Self::ReaderFailure,
            13 => Self::ResetFailure,
            14 => Self::UnderVoltage,
            15 => Self::WeakSignal,
            other => Self::Unknown(other),
        }
    }
}

impl ErrorCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::NoError)
    }
}

/// Temperature/power derating state (input register, values 0–4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeratingStatus {
    None,
    Temperature,
    Current,
    Power,
    Shutdown,
    Unknown(u16),
}

impl From<u16> for DeratingStatus {
    fn from(raw: u16) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Temperature,
            2 => Self::Current,
            3 => Self::Power,
            4 => Self::Shutdown,
            other => Self::Unknown(other),
        }
    }
}

/// Phase selection of a charge point (holding register, values 0–3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    Unavailable,
    Automatic,
    #[serde(rename = "1-phase", alias = "one_phase")]
    OnePhase,
    #[serde(rename = "3-phase", alias = "three_phase")]
    ThreePhase,
}

impl PhaseMode {
    pub fn from_register(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Unavailable),
            1 => Some(Self::Automatic),
            2 => Some(Self::OnePhase),
            3 => Some(Self::ThreePhase),
            _ => None,
        }
    }

    pub fn register_value(self) -> u16 {
        match self {
            Self::Unavailable => 0,
            Self::Automatic => 1,
            Self::OnePhase => 2,
            Self::ThreePhase => 3,
        }
    }
}

impl fmt::Display for PhaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Automatic => write!(f, "automatic"),
            Self::OnePhase => write!(f, "1-phase"),
            Self::ThreePhase => write!(f, "3-phase"),
        }
    }
}

/// Controller strategy selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingMode {
    #[default]
    Fast,
    Limited,
    Solar,
}

impl fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Limited => write!(f, "limited"),
            Self::Solar => write!(f, "solar"),
        }
    }
}

impl std::str::FromStr for ChargingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "limited" => Ok(Self::Limited),
            "solar" | "pv" => Ok(Self::Solar),
            other => Err(format!("Unknown charging mode: {}", other)),
        }
    }
}
