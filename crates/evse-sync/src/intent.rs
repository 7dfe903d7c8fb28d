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

//! Keeps the desired charging state consistent with what the cloud reports.

use evse_types::DeviceSnapshot;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Connector status reported when the charger itself suspended the session.
pub const SUSPENDED_EVSE_STATUS: &str = "SUSPENDED_EVSE";

/// Charging state a recent action asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChargingExpectation {
    pub desired: bool,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct IntentTracker {
    expectations: HashMap<String, PendingChargingExpectation>,
    desired: HashMap<String, bool>,
    resume_attempts: HashMap<String, Instant>,
    resume_cooldown: Duration,
}

impl IntentTracker {
    pub fn new(resume_cooldown: Duration) -> Self {
        Self {
            expectations: HashMap::new(),
            desired: HashMap::new(),
            resume_attempts: HashMap::new(),
            resume_cooldown,
        }
    }

    pub fn resume_cooldown(&self) -> Duration {
        self.resume_cooldown
    }

    /// Pin the reported charging flag for `hold`. A zero hold clears the expectation.
    pub fn set_expectation(&mut self, serial: &str, desired: bool, hold: Duration, now: Instant) {
        if hold.is_zero() {
            self.expectations.remove(serial);
            return;
        }
        self.expectations.insert(
            serial.to_owned(),
            PendingChargingExpectation {
                desired,
                expires_at: now + hold,
            },
        );
    }

    pub fn expectation(&self, serial: &str) -> Option<PendingChargingExpectation> {
        self.expectations.get(serial).copied()
    }

    pub fn set_desired(&mut self, serial: &str, charging: bool) {
        self.desired.insert(serial.to_owned(), charging);
    }

    pub fn desired(&self, serial: &str) -> Option<bool> {
        self.desired.get(serial).copied()
    }

    /// Override disagreeing charging flags while their expectation holds.
    ///
    /// Expectations are dropped once the cloud agrees or they expire.
    pub fn reconcile(&mut self, snapshots: &mut BTreeMap<String, DeviceSnapshot>, now: Instant) {
        self.expectations.retain(|serial, expectation| {
            if now >= expectation.expires_at {
                debug!(serial = %serial, "Charging expectation expired");
                return false;
            }
            let Some(snapshot) = snapshots.get_mut(serial) else {
                return true;
            };
            if snapshot.charging == expectation.desired {
                return false;
            }
            debug!(
                serial = %serial,
                reported = snapshot.charging,
                expected = expectation.desired,
                "Holding expected charging state"
            );
            snapshot.charging = expectation.desired;
            true
        });
    }

    /// Devices that want to charge but were suspended by the charger.
    ///
    /// Must run on the reported flags, before [`Self::reconcile`] rewrites them.
    pub fn auto_resume_candidates(
        &self,
        snapshots: &BTreeMap<String, DeviceSnapshot>,
        now: Instant,
    ) -> Vec<String> {
        snapshots
            .values()
            .filter(|snapshot| self.desired(&snapshot.serial) == Some(true))
            .filter(|snapshot| {
                !snapshot.charging
                    && snapshot.plugged
                    && snapshot
                        .connector_status
                        .as_deref()
                        .is_some_and(|status| status.eq_ignore_ascii_case(SUSPENDED_EVSE_STATUS))
            })
            .filter(|snapshot| !self.resume_throttled(&snapshot.serial, now))
            .map(|snapshot| snapshot.serial.clone())
            .collect()
    }

    fn resume_throttled(&self, serial: &str, now: Instant) -> bool {
        self.resume_attempts
            .get(serial)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.resume_cooldown)
    }

    pub fn note_resume_attempt(&mut self, serial: &str, now: Instant) {
        self.resume_attempts.insert(serial.to_owned(), now);
    }

    /// Cooldown timer elapsed.
    pub fn clear_resume_attempt(&mut self, serial: &str) {
        self.resume_attempts.remove(serial);
    }
}
