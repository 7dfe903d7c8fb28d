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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud service area that can be unavailable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Status,
    SessionHistory,
    SiteEnergy,
}

/// Persistent condition surfaced to the host until it clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "signal", content = "subsystem", rename_all = "snake_case")]
pub enum SyncSignal {
    ReauthRequired,
    RateLimited,
    CloudUnavailable(Subsystem),
    NetworkUnreachable,
    DnsResolution,
}

impl fmt::Display for SyncSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReauthRequired => f.write_str("reauth_required"),
            Self::RateLimited => f.write_str("rate_limited"),
            Self::CloudUnavailable(Subsystem::Status) => f.write_str("cloud_errors"),
            Self::CloudUnavailable(Subsystem::SessionHistory) => {
                f.write_str("session_history_unavailable")
            }
            Self::CloudUnavailable(Subsystem::SiteEnergy) => f.write_str("site_energy_unavailable"),
            Self::NetworkUnreachable => f.write_str("network_unreachable"),
            Self::DnsResolution => f.write_str("dns_resolution"),
        }
    }
}
