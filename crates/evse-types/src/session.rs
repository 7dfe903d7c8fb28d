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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historical charging session, attributed to a single calendar day.
///
/// `energy_kwh` is the share of the session that falls into the requested day,
/// `energy_total_kwh` the energy of the whole session. They differ only for
/// sessions that cross midnight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub energy_kwh: f64,
    pub energy_total_kwh: f64,
    pub active_charge_secs: Option<f64>,
    pub miles_added: Option<f64>,
    pub session_cost: Option<f64>,
    pub avg_cost_per_kwh: Option<f64>,
    pub cost_calculated: Option<bool>,
    pub manual_overridden: Option<bool>,
    pub session_cost_state: Option<String>,
    pub charge_profile_stack_level: Option<i64>,
    pub auth_type: Option<String>,
    pub auth_identifier: Option<String>,
    pub auth_token: Option<String>,
}
