//! Smart-charging controller
//!
//! Per charge point, every cycle:
//! 1. raw target from the selected mode (fast / limited / solar)
//! 2. solar only: hysteresis against the last accepted target
//! 3. solar + alt-mode only: phase forcing on the damped target
//! 4. setpoint writes for whatever differs from the registers just read
//!
//! Writes are never retried inline. A failed write leaves the register at its
//! old value, the next poll observes the difference, and the write is issued
//! again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::inputs::PointInputs;
use crate::protocol::codec::watts_to_register;
use crate::protocol::{ChargingMode, PhaseMode, RegisterMap};
use crate::snapshot::ChargePointSnapshot;
use crate::transport::ModbusTransport;

/// Tunables of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Target in fast mode, W
    pub fast_target_w: u32,
    /// Subtracted from the solar excess before it becomes a target, W
    pub solar_buffer_w: u32,
    /// Nominal phase voltage, V
    pub nominal_voltage_v: u32,
    /// Physical current ceiling when charging on one phase, A
    pub single_phase_max_current_a: u32,
    /// Relative drop that is accepted at once, percent
    pub drop_accept_pct: f64,
    /// Minimum time between accepted increases, s
    pub rise_hold_secs: u64,
    /// Minimum time between accepted small decreases, s
    pub drop_hold_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            fast_target_w: 11_000,
            solar_buffer_w: 300,
            nominal_voltage_v: 230,
            single_phase_max_current_a: 32,
            drop_accept_pct: 10.0,
            rise_hold_secs: 20 * 60,
            drop_hold_secs: 15 * 60,
        }
    }
}

/// Controller memory of one charge point, kept for the life of the process
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub mode: ChargingMode,
    pub stable_target_w: u32,
    pub last_change: DateTime<Utc>,
    /// Phase forcing was active in the previous cycle
    pub alt_forcing: bool,
    /// Phase mode must still be handed back to automatic
    pub release_pending: bool,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            mode: ChargingMode::Fast,
            stable_target_w: 0,
            last_change: DateTime::<Utc>::UNIX_EPOCH,
            alt_forcing: false,
            release_pending: false,
        }
    }
}

/// What the controller wants for one point this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDecision {
    pub mode: ChargingMode,
    /// Target before damping and phase forcing, W
    pub raw_target_w: u32,
    /// Effective target, W
    pub target_w: u32,
    /// Forced phase mode; `None` leaves the phase unmanaged
    pub phase: Option<PhaseMode>,
    /// Write phase mode automatic to undo earlier forcing
    pub release_phase: bool,
    /// Hysteresis kept the previous target
    pub held: bool,
}

impl ControlDecision {
    /// Phase value to write, forcing first, then a pending release
    pub fn phase_write(&self) -> Option<PhaseMode> {
        self.phase.or(self.release_phase.then_some(PhaseMode::Automatic))
    }
}

/// Result of one setpoint write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Register already held the desired value
    Unchanged,
    Written(u16),
    Failed(String),
    /// Nothing requested
    Skipped,
    /// Setpoint block not read this cycle, left for the next one
    Deferred,
}

impl WriteOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub max_power: WriteOutcome,
    pub phase_mode: WriteOutcome,
}

/// Stateless control law; state lives in [`ControllerState`]
#[derive(Debug, Clone, Default)]
pub struct ChargingController {
    settings: ControllerSettings,
}

impl ChargingController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Target straight from the selected mode
    pub fn raw_target(&self, inputs: &PointInputs) -> u32 {
        match inputs.mode {
            ChargingMode::Fast => self.settings.fast_target_w,
            ChargingMode::Limited => inputs.manual_limit_w,
            ChargingMode::Solar => {
                let excess =
                    i64::from(inputs.solar_excess_w) - i64::from(self.settings.solar_buffer_w);
                excess.clamp(0, i64::from(u32::MAX)) as u32
            },
        }
    }

    /// Damp the solar target; returns the effective target and whether it was held
    pub fn apply_hysteresis(
        &self,
        state: &mut ControllerState,
        raw: u32,
        now: DateTime<Utc>,
    ) -> (u32, bool) {
        let stable = state.stable_target_w;
        if raw == stable {
            return (stable, false);
        }

        let accept = if stable == 0 {
            // Cold start
            true
        } else {
            let drop_pct = (f64::from(stable) - f64::from(raw)) / f64::from(stable) * 100.0;
            let since = now.signed_duration_since(state.last_change);
            if drop_pct > self.settings.drop_accept_pct {
                true
            } else if raw > stable {
                since >= hold(self.settings.rise_hold_secs)
            } else {
                since >= hold(self.settings.drop_hold_secs)
            }
        };

        if accept {
            state.stable_target_w = raw;
            state.last_change = now;
            (raw, false)
        } else {
            (stable, true)
        }
    }

    /// Phase forcing for cars that need a guaranteed minimum current
    pub fn force_phase(&self, target: u32, min_current_a: u16) -> (u32, PhaseMode) {
        let voltage = self.settings.nominal_voltage_v;
        let min_single = u32::from(min_current_a).saturating_mul(voltage);
        let threshold_three = min_single.saturating_mul(3);
        let single_ceiling = self.settings.single_phase_max_current_a.saturating_mul(voltage);

        if target < min_single {
            // Stay on one phase at zero power so the car does not renegotiate
            (0, PhaseMode::OnePhase)
        } else if target < threshold_three {
            (target.min(single_ceiling), PhaseMode::OnePhase)
        } else {
            (target, PhaseMode::ThreePhase)
        }
    }

    /// Compute this cycle's decision and advance the point's state
    pub fn decide(
        &self,
        point: u8,
        state: &mut ControllerState,
        inputs: &PointInputs,
        now: DateTime<Utc>,
    ) -> ControlDecision {
        if inputs.mode != state.mode {
            info!(
                "Charge point {} mode changed: {} -> {}",
                point, state.mode, inputs.mode
            );
            if inputs.mode == ChargingMode::Solar {
                state.stable_target_w = 0;
            }
            state.mode = inputs.mode;
        }

        let raw = self.raw_target(inputs);
        let (damped, held) = if state.mode == ChargingMode::Solar {
            let previous = state.stable_target_w;
            let (target, held) = self.apply_hysteresis(state, raw, now);
            if held {
                debug!(
                    "Charge point {} holding {} W (raw {} W)",
                    point, previous, raw
                );
            } else if target != previous {
                info!(
                    "Charge point {} solar target accepted: {} W -> {} W",
                    point, previous, target
                );
            }
            (target, held)
        } else {
            (raw, false)
        };

        let forcing = state.mode == ChargingMode::Solar && inputs.alt_mode;
        let (target_w, phase) = if forcing {
            let (target, phase) = self.force_phase(damped, inputs.alt_min_current_a);
            debug!(
                "Charge point {} alt-mode: {} W on {} (min {} A)",
                point, target, phase, inputs.alt_min_current_a
            );
            (target, Some(phase))
        } else {
            (damped, None)
        };

        if forcing {
            state.release_pending = false;
        } else if state.alt_forcing {
            info!("Charge point {} phase forcing ended, releasing to automatic", point);
            state.release_pending = true;
        }
        state.alt_forcing = forcing;

        ControlDecision {
            mode: state.mode,
            raw_target_w: raw,
            target_w,
            phase,
            release_phase: state.release_pending,
            held,
        }
    }

    /// Issue the setpoint writes of a decision
    ///
    /// Each write is independent. Values already present in the freshly read
    /// snapshot are not written again.
    pub async fn apply(
        &self,
        transport: &mut dyn ModbusTransport,
        map: &RegisterMap,
        unit_id: u8,
        point: &ChargePointSnapshot,
        state: &mut ControllerState,
        decision: &ControlDecision,
    ) -> WriteReport {
        let index = point.index;

        // Without the holding block there is nothing to compare against
        if point.max_power_limit_w.is_none() {
            debug!(
                "Charge point {} setpoints unknown this cycle, deferring writes",
                index
            );
            return WriteReport {
                max_power: WriteOutcome::Deferred,
                phase_mode: match decision.phase_write() {
                    None => WriteOutcome::Skipped,
                    Some(_) => WriteOutcome::Deferred,
                },
            };
        }

        let desired_power = watts_to_register(decision.target_w);
        let observed_power = point.max_power_limit_w.map(watts_to_register);
        let max_power = match map.max_power_address(index) {
            Ok(address) => {
                write_if_changed(transport, address, desired_power, observed_power, unit_id).await
            },
            Err(e) => WriteOutcome::Failed(e.to_string()),
        };

        let phase_mode = match decision.phase_write() {
            None => WriteOutcome::Skipped,
            Some(mode) => match map.phase_mode_address(index) {
                Ok(address) => {
                    let observed = point.phase_mode.map(PhaseMode::register_value);
                    write_if_changed(transport, address, mode.register_value(), observed, unit_id)
                        .await
                },
                Err(e) => WriteOutcome::Failed(e.to_string()),
            },
        };

        let released = matches!(phase_mode, WriteOutcome::Written(_) | WriteOutcome::Unchanged);
        if decision.phase.is_none() && decision.release_phase && released {
            state.release_pending = false;
        }

        WriteReport {
            max_power,
            phase_mode,
        }
    }
}

fn hold(secs: u64) -> Duration {
    Duration::seconds(secs.min(u64::from(u32::MAX)) as i64)
}

async fn write_if_changed(
    transport: &mut dyn ModbusTransport,
    address: u16,
    desired: u16,
    observed: Option<u16>,
    unit_id: u8,
) -> WriteOutcome {
    if observed == Some(desired) {
        return WriteOutcome::Unchanged;
    }
    match transport.write_register(address, desired, unit_id).await {
        Ok(()) => {
            debug!("Wrote 0x{:04X} = {}", address, desired);
            WriteOutcome::Written(desired)
        },
        Err(e) => {
            warn!("Setpoint write rejected, retrying next cycle: {}", e);
            WriteOutcome::Failed(e.to_string())
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::SimulatedStation;

    fn controller() -> ChargingController {
        ChargingController::default()
    }

    fn solar(excess: i32, alt_mode: bool) -> PointInputs {
        PointInputs {
            mode: ChargingMode::Solar,
            solar_excess_w: excess,
            alt_mode,
            ..Default::default()
        }
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::minutes(minutes)
    }

    #[test]
    fn test_fast_mode_ignores_solar() {
        let ctl = controller();
        let mut state = ControllerState::default();
        for excess in [-5_000, 0, 2_000, 30_000] {
            let inputs = PointInputs {
                solar_excess_w: excess,
                alt_mode: true,
                ..Default::default()
            };
            let decision = ctl.decide(1, &mut state, &inputs, at(0));
            assert_eq!(decision.target_w, 11_000);
            assert_eq!(decision.phase, None);
        }
    }

    #[test]
    fn test_limited_mode_uses_manual_limit() {
        let ctl = controller();
        let mut state = ControllerState::default();
        let inputs = PointInputs {
            mode: ChargingMode::Limited,
            manual_limit_w: 4_200,
            ..Default::default()
        };
        assert_eq!(ctl.decide(1, &mut state, &inputs, at(0)).target_w, 4_200);
    }

    #[test]
    fn test_solar_target_subtracts_buffer_and_floors_at_zero() {
        let ctl = controller();
        assert_eq!(ctl.raw_target(&solar(5_300, false)), 5_000);
        assert_eq!(ctl.raw_target(&solar(100, false)), 0);
        assert_eq!(ctl.raw_target(&solar(-2_000, false)), 0);
    }

    #[test]
    fn test_solar_without_alt_mode_never_forces_phase() {
        let ctl = controller();
        let mut state = ControllerState::default();
        for (minute, excess) in [(0, 1_500), (30, 9_000), (60, 0), (90, 20_000)] {
            let decision = ctl.decide(1, &mut state, &solar(excess, false), at(minute));
            assert_eq!(decision.phase, None);
            assert!(!decision.release_phase);
        }
    }

    #[test]
    fn test_phase_forcing_thresholds() {
        let ctl = controller();
        assert_eq!(ctl.force_phase(1_200, 6), (0, PhaseMode::OnePhase));
        assert_eq!(ctl.force_phase(2_000, 6), (2_000, PhaseMode::OnePhase));
        assert_eq!(ctl.force_phase(9_000, 6), (9_000, PhaseMode::ThreePhase));
        assert_eq!(ctl.force_phase(4_140, 6), (4_140, PhaseMode::ThreePhase));
    }

    #[test]
    fn test_single_phase_ceiling() {
        let ctl = controller();
        // 16 A minimum puts the 3-phase threshold at 11040 W, above 32 A x 230 V
        assert_eq!(ctl.force_phase(9_000, 16), (7_360, PhaseMode::OnePhase));
    }

    #[test]
    fn test_cold_start_accepted_immediately() {
        let ctl = controller();
        let mut state = ControllerState {
            mode: ChargingMode::Solar,
            last_change: at(0),
            ..Default::default()
        };
        assert_eq!(ctl.apply_hysteresis(&mut state, 5_000, at(0)), (5_000, false));
        assert_eq!(state.stable_target_w, 5_000);
    }

    #[test]
    fn test_sharp_drop_accepted_small_drop_held() {
        let ctl = controller();
        let mut state = ControllerState {
            mode: ChargingMode::Solar,
            stable_target_w: 5_000,
            last_change: at(0),
            ..Default::default()
        };

        // 4% drop inside the 15 minute window
        assert_eq!(ctl.apply_hysteresis(&mut state, 4_800, at(5)), (5_000, true));
        // 20% drop
        assert_eq!(ctl.apply_hysteresis(&mut state, 4_000, at(6)), (4_000, false));
        assert_eq!(state.last_change, at(6));
    }

    #[test]
    fn test_small_changes_accepted_after_hold() {
        let ctl = controller();
        let mut state = ControllerState {
            mode: ChargingMode::Solar,
            stable_target_w: 5_000,
            last_change: at(0),
            ..Default::default()
        };

        assert_eq!(ctl.apply_hysteresis(&mut state, 4_800, at(14)), (5_000, true));
        assert_eq!(ctl.apply_hysteresis(&mut state, 4_800, at(15)), (4_800, false));

        assert_eq!(ctl.apply_hysteresis(&mut state, 6_000, at(34)), (4_800, true));
        assert_eq!(ctl.apply_hysteresis(&mut state, 6_000, at(35)), (6_000, false));
    }

    #[test]
    fn test_entering_solar_restarts_cold() {
        let ctl = controller();
        let mut state = ControllerState::default();
        ctl.decide(1, &mut state, &solar(5_300, false), at(0));
        ctl.decide(1, &mut state, &PointInputs::default(), at(1));

        // Back to solar one minute later: higher target still accepted at once
        let decision = ctl.decide(1, &mut state, &solar(8_300, false), at(2));
        assert_eq!(decision.target_w, 8_000);
        assert!(!decision.held);
    }

    #[test]
    fn test_hysteresis_runs_before_phase_forcing() {
        let ctl = controller();
        let mut state = ControllerState::default();
        let first = ctl.decide(1, &mut state, &solar(9_300, true), at(0));
        assert_eq!((first.target_w, first.phase), (9_000, Some(PhaseMode::ThreePhase)));

        // 5% dip is held, so the point stays on three phases
        let second = ctl.decide(1, &mut state, &solar(8_850, true), at(1));
        assert!(second.held);
        assert_eq!((second.target_w, second.phase), (9_000, Some(PhaseMode::ThreePhase)));
    }

    #[test]
    fn test_alt_mode_off_requests_release() {
        let ctl = controller();
        let mut state = ControllerState::default();
        ctl.decide(1, &mut state, &solar(2_300, true), at(0));
        assert!(state.alt_forcing);

        let decision = ctl.decide(1, &mut state, &solar(2_300, false), at(1));
        assert_eq!(decision.phase, None);
        assert!(decision.release_phase);
        assert_eq!(decision.phase_write(), Some(PhaseMode::Automatic));
    }

    fn point_from(station: &SimulatedStation, map: &RegisterMap) -> ChargePointSnapshot {
        let mut point = ChargePointSnapshot::new(1, 0x0100);
        point.max_power_limit_w = station
            .holding(map.max_power_address(1).unwrap())
            .map(|raw| u32::from(raw) * 100);
        point.phase_mode = station
            .holding(map.phase_mode_address(1).unwrap())
            .and_then(PhaseMode::from_register);
        point
    }

    #[tokio::test]
    async fn test_apply_writes_only_differences() {
        let map = RegisterMap::default();
        let station = SimulatedStation::compleo(&map, 1);
        let mut transport = station.clone();
        let ctl = controller();
        let mut state = ControllerState::default();

        // Simulator starts at 11000 W / automatic
        let decision = ctl.decide(1, &mut state, &PointInputs::default(), at(0));
        let point = point_from(&station, &map);
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert_eq!(report.max_power, WriteOutcome::Unchanged);
        assert_eq!(report.phase_mode, WriteOutcome::Skipped);
        assert!(station.writes().is_empty());

        let decision = ctl.decide(1, &mut state, &solar(2_300, true), at(1));
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert_eq!(report.max_power, WriteOutcome::Written(20));
        assert_eq!(report.phase_mode, WriteOutcome::Written(2));
        assert_eq!(station.writes(), vec![(0x0100, 20), (0x0109, 2)]);
    }

    #[tokio::test]
    async fn test_failed_power_write_does_not_block_phase_write() {
        let map = RegisterMap::default();
        let station = SimulatedStation::compleo(&map, 1);
        let mut transport = station.clone();
        station.fail_writes(0x0100);
        let ctl = controller();
        let mut state = ControllerState::default();

        let decision = ctl.decide(1, &mut state, &solar(9_300, true), at(0));
        let point = point_from(&station, &map);
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert!(report.max_power.is_failed());
        assert_eq!(report.phase_mode, WriteOutcome::Written(3));
    }

    #[tokio::test]
    async fn test_release_retried_until_written() {
        let map = RegisterMap::default();
        let station = SimulatedStation::compleo(&map, 1);
        let mut transport = station.clone();
        let ctl = controller();
        let mut state = ControllerState::default();

        let decision = ctl.decide(1, &mut state, &solar(2_300, true), at(0));
        let point = point_from(&station, &map);
        ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert_eq!(station.holding(0x0109), Some(2));

        station.fail_writes(0x0109);
        let decision = ctl.decide(1, &mut state, &solar(2_300, false), at(1));
        let point = point_from(&station, &map);
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert!(report.phase_mode.is_failed());
        assert!(state.release_pending);

        station.heal();
        let decision = ctl.decide(1, &mut state, &solar(2_300, false), at(2));
        assert!(decision.release_phase);
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert_eq!(report.phase_mode, WriteOutcome::Written(1));
        assert!(!state.release_pending);

        let decision = ctl.decide(1, &mut state, &solar(2_300, false), at(3));
        assert_eq!(decision.phase_write(), None);
    }

    #[tokio::test]
    async fn test_unread_setpoints_defer_writes() {
        let map = RegisterMap::default();
        let station = SimulatedStation::compleo(&map, 1);
        let mut transport = station.clone();
        let ctl = controller();
        let mut state = ControllerState::default();

        let decision = ctl.decide(1, &mut state, &solar(2_300, true), at(0));
        ctl.apply(&mut transport, &map, 1, &point_from(&station, &map), &mut state, &decision)
            .await;
        station.clear_writes();

        // Leaving alt mode while the holding block is missing
        let decision = ctl.decide(1, &mut state, &solar(9_300, false), at(1));
        let unread = ChargePointSnapshot::new(1, 0x0100);
        let report = ctl.apply(&mut transport, &map, 1, &unread, &mut state, &decision).await;
        assert_eq!(report.max_power, WriteOutcome::Deferred);
        assert_eq!(report.phase_mode, WriteOutcome::Deferred);
        assert!(station.writes().is_empty());
        assert!(state.release_pending);

        let decision = ctl.decide(1, &mut state, &solar(9_300, false), at(2));
        let point = point_from(&station, &map);
        let report = ctl.apply(&mut transport, &map, 1, &point, &mut state, &decision).await;
        assert_eq!(report.phase_mode, WriteOutcome::Written(1));
        assert!(!state.release_pending);
    }
}
