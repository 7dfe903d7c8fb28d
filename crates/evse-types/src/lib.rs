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

pub mod charge_mode;
pub mod metrics;
pub mod outcome;
pub mod session;
pub mod signals;
pub mod site;
pub mod snapshot;

// Re-export common types for convenience
pub use charge_mode::ChargeMode;
pub use metrics::{FailureCounts, PhaseTimings, SessionCacheStats, SiteMetrics};
pub use outcome::{ActionOutcome, BenignReason};
pub use session::SessionRecord;
pub use signals::{Subsystem, SyncSignal};
pub use site::{SiteEnergyFlow, SiteEnergyReading};
pub use snapshot::{DeviceSnapshot, SnapshotMap};
