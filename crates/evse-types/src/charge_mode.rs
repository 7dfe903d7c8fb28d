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

/// Charging mode of a charger as reported by the scheduler service or the status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeMode {
    /// Manual charging at a user chosen amperage
    #[serde(rename = "MANUAL_CHARGING")]
    Manual,
    /// Follows the user's schedule
    #[serde(rename = "SCHEDULED_CHARGING")]
    Scheduled,
    /// Charges from solar surplus only
    #[serde(rename = "GREEN_CHARGING")]
    Green,
    /// Charging right now without a scheduler preference
    Immediate,
    #[default]
    Idle,
}

impl ChargeMode {
    /// Wire string used by the scheduler API.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Manual => "MANUAL_CHARGING",
            Self::Scheduled => "SCHEDULED_CHARGING",
            Self::Green => "GREEN_CHARGING",
            Self::Immediate => "IMMEDIATE",
            Self::Idle => "IDLE",
        }
    }

    /// Parse a wire value, accepting the short aliases the status payload uses.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "MANUAL_CHARGING" | "MANUAL" => Some(Self::Manual),
            "SCHEDULED_CHARGING" | "SCHEDULED" => Some(Self::Scheduled),
            "GREEN_CHARGING" | "GREEN" => Some(Self::Green),
            "IMMEDIATE" => Some(Self::Immediate),
            "IDLE" => Some(Self::Idle),
            _ => None,
        }
    }

    /// Modes the scheduler preference endpoint accepts.
    pub fn is_scheduler_mode(self) -> bool {
        matches!(self, Self::Manual | Self::Scheduled | Self::Green)
    }
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_accepts_aliases() {
        assert_eq!(ChargeMode::from_wire("green_charging"), Some(ChargeMode::Green));
        assert_eq!(ChargeMode::from_wire(" MANUAL "), Some(ChargeMode::Manual));
        assert_eq!(ChargeMode::from_wire("bogus"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&ChargeMode::Scheduled).unwrap();
        assert_eq!(json, "\"SCHEDULED_CHARGING\"");
        let mode: ChargeMode = serde_json::from_str("\"IDLE\"").unwrap();
        assert_eq!(mode, ChargeMode::Idle);
    }
}
