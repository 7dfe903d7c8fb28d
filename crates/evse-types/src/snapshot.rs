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

use crate::charge_mode::ChargeMode;
use crate::session::SessionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Published view of all chargers of one site, keyed by serial.
pub type SnapshotMap = Arc<BTreeMap<String, DeviceSnapshot>>;

/// Point-in-time state of one charger, rebuilt on every successful tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub serial: String,
    pub name: Option<String>,

    // Live flags
    pub connected: bool,
    pub plugged: bool,
    pub charging: bool,
    pub faulted: bool,
    pub connector_status: Option<String>,
    pub connector_reason: Option<String>,

    // Amperage
    pub charging_level: Option<u32>,
    pub min_amp: Option<u32>,
    pub max_amp: Option<u32>,
    pub max_current: Option<u32>,
    pub phase_mode: Option<String>,
    pub operating_voltage: Option<f64>,
    pub power_w: Option<f64>,
    /// True when `power_w` was derived from amps and voltage
    pub power_estimated: bool,

    // Active session
    pub session_kwh: Option<f64>,
    pub session_miles: Option<f64>,
    pub session_cost: Option<f64>,
    pub session_start: Option<DateTime<Utc>>,
    pub session_end: Option<DateTime<Utc>>,

    pub last_reported_at: Option<DateTime<Utc>>,
    pub charge_mode: ChargeMode,
    pub charge_mode_pref: Option<ChargeMode>,

    // Inventory
    pub status: Option<String>,
    pub commissioned: Option<bool>,
    pub firmware_version: Option<String>,
    pub lifetime_kwh: Option<f64>,

    // Today's history
    pub energy_today_sessions: Vec<SessionRecord>,
    pub energy_today_sessions_kwh: f64,
}

impl DeviceSnapshot {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }

    /// Name shown to users, falling back to the serial.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.serial)
    }

    /// Clamp an amperage into the device's advertised range.
    pub fn clamp_amps(&self, amps: u32) -> u32 {
        let mut value = amps;
        if let Some(max) = self.max_amp {
            value = value.min(max);
        }
        if let Some(min) = self.min_amp {
            value = value.max(min);
        }
        value
    }
}
