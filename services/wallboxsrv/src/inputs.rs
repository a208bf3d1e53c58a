//! Externally supplied controller inputs
//!
//! Written by whoever drives the station (UI, energy manager, config) at any
//! time and read once per cycle by the station task.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::ChargingMode;

/// Inputs for one charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointInputs {
    pub mode: ChargingMode,
    /// Surplus solar power available to the car, W
    pub solar_excess_w: i32,
    /// Target in limited mode, W
    pub manual_limit_w: u32,
    /// Force phase count for cars that need a guaranteed minimum current
    pub alt_mode: bool,
    /// Minimum current the car accepts, A
    pub alt_min_current_a: u16,
}

impl Default for PointInputs {
    fn default() -> Self {
        Self {
            mode: ChargingMode::Fast,
            solar_excess_w: 0,
            manual_limit_w: 11_000,
            alt_mode: false,
            alt_min_current_a: 6,
        }
    }
}

/// Shared handle to the inputs of every charge point of a station
#[derive(Debug, Clone, Default)]
pub struct ControlInputs {
    inner: Arc<RwLock<HashMap<u8, PointInputs>>>,
}

impl ControlInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from configured initial values
    pub fn with_points(points: &HashMap<u8, PointInputs>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(points.clone())),
        }
    }

    /// Current inputs of a point; unknown points get defaults
    pub fn get(&self, point: u8) -> PointInputs {
        if let Some(inputs) = self.inner.read().get(&point) {
            return *inputs;
        }
        *self.inner.write().entry(point).or_default()
    }

    pub fn update(&self, point: u8, f: impl FnOnce(&mut PointInputs)) {
        let mut guard = self.inner.write();
        f(guard.entry(point).or_default());
    }

    pub fn set_mode(&self, point: u8, mode: ChargingMode) {
        self.update(point, |i| i.mode = mode);
    }

    pub fn set_solar_excess(&self, point: u8, watts: i32) {
        self.update(point, |i| i.solar_excess_w = watts);
    }

    pub fn set_manual_limit(&self, point: u8, watts: u32) {
        self.update(point, |i| i.manual_limit_w = watts);
    }

    pub fn set_alt_mode(&self, point: u8, enabled: bool, min_current_a: Option<u16>) {
        self.update(point, |i| {
            i.alt_mode = enabled;
            if let Some(amps) = min_current_a {
                i.alt_min_current_a = amps;
            }
        });
    }

    /// Copy of all known points
    pub fn snapshot(&self) -> HashMap<u8, PointInputs> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_defaults() {
        let inputs = ControlInputs::new();
        assert!(inputs.snapshot().is_empty());

        let point = inputs.get(2);
        assert_eq!(point, PointInputs::default());
        assert_eq!(point.manual_limit_w, 11_000);
        assert_eq!(inputs.snapshot().len(), 1);
    }

    #[test]
    fn test_writers_share_state() {
        let inputs = ControlInputs::new();
        let writer = inputs.clone();

        writer.set_mode(1, ChargingMode::Solar);
        writer.set_solar_excess(1, 4_200);
        writer.set_alt_mode(1, true, Some(8));

        let point = inputs.get(1);
        assert_eq!(point.mode, ChargingMode::Solar);
        assert_eq!(point.solar_excess_w, 4_200);
        assert!(point.alt_mode);
        assert_eq!(point.alt_min_current_a, 8);

        writer.set_alt_mode(1, false, None);
        assert_eq!(inputs.get(1).alt_min_current_a, 8);
    }

    #[test]
    fn test_deserialize_partial_point() {
        let point: PointInputs =
            serde_yaml::from_str("mode: solar\nalt_mode: true\n").unwrap();
        assert_eq!(point.mode, ChargingMode::Solar);
        assert!(point.alt_mode);
        assert_eq!(point.alt_min_current_a, 6);
    }
}
