//! Lifetime energy from session counters
//!
//! The station resets the session energy register whenever a new session
//! starts. Summing the increases gives a lifetime total for as long as this
//! process runs. This is a heuristic: a reset that lands on a value above the
//! previous reading is indistinguishable from normal growth, and energy
//! delivered while the service is down is lost.

use std::collections::HashMap;

/// Running total for one charge point, in 0.1 kWh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnergyAccumulator {
    last_session: Option<u16>,
    total_tenths: u64,
}

impl EnergyAccumulator {
    /// Feed the session register and return the running total in kWh
    pub fn observe(&mut self, session_raw: u16) -> f64 {
        let added = match self.last_session {
            // First reading counts in full
            None => u64::from(session_raw),
            Some(last) if session_raw >= last => u64::from(session_raw - last),
            // Negative delta: new session
            Some(_) => u64::from(session_raw),
        };
        self.total_tenths += added;
        self.last_session = Some(session_raw);
        self.total_kwh()
    }

    pub fn total_kwh(&self) -> f64 {
        self.total_tenths as f64 / 10.0
    }
}

/// Accumulators keyed by point index
#[derive(Debug, Default)]
pub struct LifetimeMeters {
    points: HashMap<u8, EnergyAccumulator>,
}

impl LifetimeMeters {
    pub fn observe(&mut self, point: u8, session_raw: u16) -> f64 {
        self.points.entry(point).or_default().observe(session_raw)
    }

    pub fn total_kwh(&self, point: u8) -> Option<f64> {
        self.points.get(&point).map(EnergyAccumulator::total_kwh)
    }

    /// Sum over all points
    pub fn station_total_kwh(&self) -> f64 {
        let tenths: u64 = self.points.values().map(|a| a.total_tenths).sum();
        tenths as f64 / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_deltas() {
        let mut acc = EnergyAccumulator::default();
        assert_eq!(acc.observe(12), 1.2);
        assert_eq!(acc.observe(12), 1.2);
        assert_eq!(acc.observe(30), 3.0);
    }

    #[test]
    fn test_negative_delta_starts_new_session() {
        let mut acc = EnergyAccumulator::default();
        acc.observe(52);
        // New session already at 0.4 kWh
        assert_eq!(acc.observe(4), 5.6);
        assert_eq!(acc.observe(10), 6.2);
    }

    #[test]
    fn test_exact_decimal_sum() {
        let mut acc = EnergyAccumulator::default();
        for raw in [1, 2, 3] {
            acc.observe(raw);
        }
        // 0.1 + 0.2 in floats would be 0.30000000000000004
        assert_eq!(acc.total_kwh(), 0.3);
    }

    #[test]
    fn test_per_point_totals() {
        let mut meters = LifetimeMeters::default();
        meters.observe(1, 15);
        meters.observe(2, 25);
        assert_eq!(meters.total_kwh(1), Some(1.5));
        assert_eq!(meters.total_kwh(3), None);
        assert_eq!(meters.station_total_kwh(), 4.0);
    }
}
