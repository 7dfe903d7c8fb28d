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

/// Expected device state that the cloud reports as a non-2xx answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenignReason {
    /// Charger is not plugged in or cannot accept the command yet
    NotReady,
    /// Start requested while a session is already running
    AlreadyCharging,
    /// Stop requested while no session is active
    NotActive,
}

impl fmt::Display for BenignReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotReady => "not_ready",
            Self::AlreadyCharging => "already_charging",
            Self::NotActive => "not_active",
        };
        f.write_str(text)
    }
}

/// Result of a control action that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ActionOutcome {
    Accepted,
    Benign(BenignReason),
}

impl ActionOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn benign_reason(self) -> Option<BenignReason> {
        match self {
            Self::Benign(reason) => Some(reason),
            Self::Accepted => None,
        }
    }
}
