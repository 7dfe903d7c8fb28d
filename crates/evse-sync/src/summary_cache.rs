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

use evse_cloud::{ChargerCloud, ChargerSummary};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const SUMMARY_IDLE_TTL: Duration = Duration::from_secs(600);
pub const SUMMARY_MIN_TTL: Duration = Duration::from_secs(5);

/// Device inventory cache with an activity-dependent TTL.
#[derive(Debug)]
pub struct SummaryCache {
    entries: Vec<ChargerSummary>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            fetched_at: None,
            ttl: SUMMARY_IDLE_TTL,
        }
    }
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the TTL for the coming refresh from the polling mode.
    pub fn set_ttl_for(&mut self, fast: bool, target_interval: Duration) {
        self.ttl = if fast {
            target_interval.clamp(SUMMARY_MIN_TTL, SUMMARY_IDLE_TTL)
        } else {
            SUMMARY_IDLE_TTL
        };
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.ttl)
    }

    pub fn invalidate(&mut self) {
        self.fetched_at = None;
    }

    pub fn entries(&self) -> &[ChargerSummary] {
        &self.entries
    }

    pub fn by_serial(&self) -> HashMap<&str, &ChargerSummary> {
        self.entries
            .iter()
            .map(|entry| (entry.serial.as_str(), entry))
            .collect()
    }

    /// Refresh when stale. Failures keep the previous list.
    ///
    /// Returns true when a new list was fetched.
    pub async fn refresh(&mut self, cloud: &dyn ChargerCloud, now: Instant) -> bool {
        if self.is_fresh(now) {
            return false;
        }
        match cloud.summary().await {
            Ok(entries) => {
                debug!(count = entries.len(), ttl_s = self.ttl.as_secs(), "📋 Summary refreshed");
                self.entries = entries;
                self.fetched_at = Some(now);
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    cached = self.entries.len(),
                    "⚠️ Summary fetch failed, using cached inventory"
                );
                false
            }
        }
    }
}
