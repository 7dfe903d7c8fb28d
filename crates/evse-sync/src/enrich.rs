// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION EVSE Sync.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Builds device snapshots from decoded status and cached inventory.

use evse_cloud::decode::round3;
use evse_cloud::{ChargerSummary, StatusRecord};
use evse_types::{ChargeMode, DeviceSnapshot};

/// Resolve the effective charge mode.
///
/// The scheduler preference wins, then whatever the status payload carried. Without
/// either, a charging device is reported as immediate and an idle one as idle.
pub fn resolve_charge_mode(
    record: &StatusRecord,
    scheduler_mode: Option<ChargeMode>,
) -> ChargeMode {
    scheduler_mode
        .or(record.charge_mode)
        .or_else(|| record.schedule_type.as_deref().and_then(ChargeMode::from_wire))
        .unwrap_or(if record.charging {
            ChargeMode::Immediate
        } else {
            ChargeMode::Idle
        })
}

/// Merge one status record with inventory data into a raw snapshot.
///
/// Lifetime energy is copied unfiltered; the caller runs it through the counter guard.
pub fn build_snapshot(
    record: &StatusRecord,
    summary: Option<&ChargerSummary>,
    scheduler_mode: Option<ChargeMode>,
    nominal_voltage: f64,
) -> DeviceSnapshot {
    let mut snapshot = DeviceSnapshot {
        serial: record.serial.clone(),
        name: record.name.clone(),
        connected: record.connected,
        plugged: record.plugged,
        charging: record.charging,
        faulted: record.faulted,
        connector_status: record.connector_status.clone(),
        connector_reason: record.connector_reason.clone(),
        charging_level: record.charging_level,
        power_w: record.power_w,
        session_kwh: record.session.energy_kwh,
        session_miles: record.session.miles,
        session_cost: record.session.cost,
        session_start: record.session.started_at,
        last_reported_at: record.last_reported_at,
        charge_mode: resolve_charge_mode(record, scheduler_mode),
        charge_mode_pref: scheduler_mode,
        ..DeviceSnapshot::default()
    };

    if let Some(summary) = summary {
        if summary.display_name.is_some() {
            snapshot.name.clone_from(&summary.display_name);
        }
        snapshot.min_amp = summary.min_amp;
        snapshot.max_amp = summary.max_amp;
        snapshot.max_current = summary.max_current;
        snapshot.phase_mode.clone_from(&summary.phase_mode);
        snapshot.operating_voltage = summary.operating_voltage;
        snapshot.status.clone_from(&summary.status);
        snapshot.commissioned = summary.commissioned;
        snapshot.firmware_version.clone_from(&summary.firmware_version);
        snapshot.lifetime_kwh = summary.lifetime_kwh;
        if snapshot.last_reported_at.is_none() {
            snapshot.last_reported_at = summary.last_reported_at;
        }
    }

    if snapshot.power_w.is_none() {
        if snapshot.charging {
            let voltage = snapshot.operating_voltage.unwrap_or(nominal_voltage);
            snapshot.power_w = snapshot
                .charging_level
                .map(|amps| round3(f64::from(amps) * voltage));
            snapshot.power_estimated = snapshot.power_w.is_some();
        } else {
            snapshot.power_w = Some(0.0);
        }
    }

    snapshot
}
