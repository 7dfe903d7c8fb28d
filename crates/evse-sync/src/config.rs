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

//! Tunables for the synchronization coordinator

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_fast_poll() -> u64 {
    30
}

fn default_slow_poll() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_api_timeout() -> u64 {
    15
}

fn default_nominal_voltage() -> f64 {
    240.0
}

fn default_session_history_interval() -> u64 {
    10
}

fn default_charge_mode_ttl() -> u64 {
    300
}

fn default_expectation_hold() -> u64 {
    90
}

fn default_auto_resume_cooldown() -> u64 {
    120
}

fn default_refresh_debounce() -> u64 {
    2
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Poll interval while any charger is active (seconds)
    #[serde(default = "default_fast_poll")]
    pub fast_poll_interval_secs: u64,

    /// Poll interval while idle (seconds)
    #[serde(default = "default_slow_poll")]
    pub slow_poll_interval_secs: u64,

    /// Use the fast interval while the live stream is on
    #[serde(default = "default_true")]
    pub fast_while_streaming: bool,

    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,

    /// Voltage used for power estimates when the charger reports none
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,

    /// Session history refresh interval (minutes, floor of one minute)
    #[serde(default = "default_session_history_interval")]
    pub session_history_interval_min: u64,

    #[serde(default = "default_charge_mode_ttl")]
    pub charge_mode_cache_ttl_secs: u64,

    /// How long a control action overrides the reported charging flag
    #[serde(default = "default_expectation_hold")]
    pub expectation_hold_secs: u64,

    #[serde(default = "default_auto_resume_cooldown")]
    pub auto_resume_cooldown_secs: u64,

    #[serde(default = "default_refresh_debounce")]
    pub refresh_debounce_secs: u64,

    /// IANA timezone used for the "today" session window
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_true")]
    pub site_energy_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fast_poll_interval_secs: default_fast_poll(),
            slow_poll_interval_secs: default_slow_poll(),
            fast_while_streaming: true,
            api_timeout_secs: default_api_timeout(),
            nominal_voltage: default_nominal_voltage(),
            session_history_interval_min: default_session_history_interval(),
            charge_mode_cache_ttl_secs: default_charge_mode_ttl(),
            expectation_hold_secs: default_expectation_hold(),
            auto_resume_cooldown_secs: default_auto_resume_cooldown(),
            refresh_debounce_secs: default_refresh_debounce(),
            timezone: default_timezone(),
            site_energy_enabled: true,
        }
    }
}

impl SyncConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_secs(self.fast_poll_interval_secs)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_poll_interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn charge_mode_ttl(&self) -> Duration {
        Duration::from_secs(self.charge_mode_cache_ttl_secs)
    }

    pub fn expectation_hold(&self) -> Duration {
        Duration::from_secs(self.expectation_hold_secs)
    }

    pub fn auto_resume_cooldown(&self) -> Duration {
        Duration::from_secs(self.auto_resume_cooldown_secs)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_secs(self.refresh_debounce_secs)
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, String> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| format!("Unknown timezone '{}': {e}", self.timezone))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fast_poll_interval_secs == 0 || self.slow_poll_interval_secs == 0 {
            return Err("Poll intervals must be greater than zero".to_owned());
        }
        if self.fast_poll_interval_secs > self.slow_poll_interval_secs {
            return Err(format!(
                "Fast poll interval ({}s) must not exceed slow poll interval ({}s)",
                self.fast_poll_interval_secs, self.slow_poll_interval_secs
            ));
        }
        if self.api_timeout_secs == 0 {
            return Err("API timeout must be greater than zero".to_owned());
        }
        if !self.nominal_voltage.is_finite() || self.nominal_voltage <= 0.0 {
            return Err("Nominal voltage must be positive".to_owned());
        }
        self.tz()?;
        Ok(())
    }
}
