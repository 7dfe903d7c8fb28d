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

use crate::signals::SyncSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failure counters per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureCounts {
    pub unauthorized: u32,
    pub rate_limit_hits: u32,
    pub server_errors: u32,
    pub network_errors: u32,
    pub dns_failures: u32,
}

/// Wall time spent in each phase of the last tick, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub summary_s: Option<f64>,
    pub status_s: Option<f64>,
    pub charge_mode_s: Option<f64>,
    pub session_history_s: Option<f64>,
    pub site_energy_s: Option<f64>,
    pub total_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCacheStats {
    pub ttl_s: u64,
    pub entries: usize,
    pub blocked_devices: usize,
    pub refresh_in_progress: bool,
}

/// Diagnostics for one site coordinator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SiteMetrics {
    pub site_id: String,
    pub site_name: Option<String>,
    pub last_success_utc: Option<DateTime<Utc>>,
    pub last_failure_utc: Option<DateTime<Utc>>,
    pub last_failure_status: Option<u16>,
    pub last_failure_description: Option<String>,
    pub last_failure_source: Option<String>,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
    pub failures: FailureCounts,
    pub backoff_active: bool,
    pub backoff_ends_utc: Option<DateTime<Utc>>,
    pub polling_interval_s: u64,
    pub fast_polling: bool,
    pub summary_ttl_s: u64,
    pub phase_timings: PhaseTimings,
    pub session_cache: SessionCacheStats,
    pub signals: Vec<SyncSignal>,
}
