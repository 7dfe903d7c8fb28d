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

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Named site-level cumulative energy flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteEnergyFlow {
    SolarProduction,
    Consumption,
    GridImport,
    GridExport,
    BatteryCharge,
    BatteryDischarge,
}

impl SiteEnergyFlow {
    pub const ALL: [Self; 6] = [
        Self::SolarProduction,
        Self::Consumption,
        Self::GridImport,
        Self::GridExport,
        Self::BatteryCharge,
        Self::BatteryDischarge,
    ];

    /// Stable key used for counter guards and logs.
    pub fn key(self) -> &'static str {
        match self {
            Self::SolarProduction => "solar_production",
            Self::Consumption => "consumption",
            Self::GridImport => "grid_import",
            Self::GridExport => "grid_export",
            Self::BatteryCharge => "battery_charge",
            Self::BatteryDischarge => "battery_discharge",
        }
    }
}

/// Guarded lifetime total of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEnergyReading {
    pub flow: SiteEnergyFlow,
    pub value_kwh: f64,
    pub bucket_count: usize,
    pub interval_minutes: u32,
    pub start_date: Option<NaiveDate>,
    pub last_report_date: Option<DateTime<Utc>>,
    pub update_pending: bool,
}
