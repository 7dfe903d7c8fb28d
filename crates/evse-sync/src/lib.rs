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

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod counter_guard;
pub mod enrich;
pub mod errors;
pub mod intent;
pub mod polling;
pub mod session_history;
pub mod site_energy;
pub mod summary_cache;
mod timer;

#[cfg(test)]
mod testing;

pub use backoff::{BackoffWindow, SignalSet};
pub use config::SyncConfig;
pub use coordinator::{Coordinator, DEFAULT_CONNECTOR_ID, SiteIdentity};
pub use counter_guard::{CounterGuard, CounterGuardState, GuardOutcome};
pub use errors::{SyncError, SyncResult};
pub use intent::{IntentTracker, PendingChargingExpectation};
pub use polling::PollingState;
pub use session_history::{DayWindow, SessionHistoryCache};
pub use site_energy::SiteEnergyCache;
pub use summary_cache::SummaryCache;
