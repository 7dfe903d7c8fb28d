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

use crate::counter_guard::CounterGuard;
use evse_cloud::decode::round3;
use evse_cloud::{ChargerCloud, CloudError, LifetimeEnergy};
use evse_types::{SiteEnergyFlow, SiteEnergyReading};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SITE_ENERGY_TTL: Duration = Duration::from_secs(900);
pub const SITE_ENERGY_FAILURE_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Result of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteEnergyRefresh {
    /// Cache fresh or cooling down after an outage
    Skipped,
    Updated,
    Unavailable,
    Failed,
}

/// Raw flow total in Wh with the number of buckets behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowTotal {
    pub flow: SiteEnergyFlow,
    pub wh: f64,
    pub buckets: usize,
}

fn sum_of(payload: &LifetimeEnergy, keys: &[&str]) -> (f64, usize) {
    keys.iter()
        .map(|key| payload.sum_wh(key))
        .fold((0.0, 0), |(wh, buckets), (v, n)| (wh + v, buckets.max(n)))
}

/// First option that yields a positive total; all-zero series fall through.
fn first_present(payload: &LifetimeEnergy, options: &[&[&str]]) -> (f64, usize) {
    options
        .iter()
        .map(|keys| sum_of(payload, keys))
        .find(|(wh, buckets)| *buckets > 0 && *wh > 0.0)
        .unwrap_or((0.0, 0))
}

/// Derive the six site flows from the bucket series.
pub fn aggregate_flows(payload: &LifetimeEnergy) -> Vec<FlowTotal> {
    let consumption = payload.sum_wh("consumption");
    let solar_home = payload.sum_wh("solar_home");
    let grid_import = if consumption.1 > 0 && solar_home.1 > 0 && consumption.0 - solar_home.0 > 0.0 {
        (consumption.0 - solar_home.0, consumption.1.max(solar_home.1))
    } else {
        first_present(payload, &[&["import"], &["grid_home"]])
    };

    let totals = [
        (SiteEnergyFlow::SolarProduction, payload.sum_wh("production")),
        (SiteEnergyFlow::Consumption, consumption),
        (SiteEnergyFlow::GridImport, grid_import),
        (SiteEnergyFlow::GridExport, payload.sum_wh("solar_grid")),
        (
            SiteEnergyFlow::BatteryCharge,
            first_present(payload, &[&["charge"], &["solar_battery", "grid_battery"]]),
        ),
        (
            SiteEnergyFlow::BatteryDischarge,
            first_present(payload, &[&["discharge"], &["battery_home", "battery_grid"]]),
        ),
    ];

    totals
        .into_iter()
        .filter(|(_, (wh, buckets))| *buckets > 0 && *wh > 0.0)
        .map(|(flow, (wh, buckets))| FlowTotal { flow, wh, buckets })
        .collect()
}

#[derive(Debug)]
pub struct SiteEnergyCache {
    readings: BTreeMap<SiteEnergyFlow, SiteEnergyReading>,
    guard: CounterGuard,
    fetched_at: Option<Instant>,
    force_refresh: bool,
    blocked_until: Option<Instant>,
}

impl Default for SiteEnergyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteEnergyCache {
    pub fn new() -> Self {
        Self {
            readings: BTreeMap::new(),
            guard: CounterGuard::new(),
            fetched_at: None,
            force_refresh: false,
            blocked_until: None,
        }
    }

    pub fn readings(&self) -> &BTreeMap<SiteEnergyFlow, SiteEnergyReading> {
        &self.readings
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.force_refresh
            && self
                .fetched_at
                .is_some_and(|at| now.saturating_duration_since(at) < SITE_ENERGY_TTL)
    }

    pub async fn refresh(&mut self, cloud: &dyn ChargerCloud, now: Instant) -> SiteEnergyRefresh {
        if self.is_blocked(now) || self.is_fresh(now) {
            return SiteEnergyRefresh::Skipped;
        }
        match cloud.lifetime_energy().await {
            Ok(payload) => {
                self.apply_payload(&payload, now);
                self.fetched_at = Some(now);
                self.blocked_until = None;
                SiteEnergyRefresh::Updated
            }
            Err(CloudError::ServiceUnavailable { status, .. }) => {
                warn!(
                    status,
                    cooldown_s = SITE_ENERGY_FAILURE_COOLDOWN.as_secs(),
                    "🔌 Site energy service unavailable, pausing refreshes"
                );
                self.blocked_until = Some(now + SITE_ENERGY_FAILURE_COOLDOWN);
                SiteEnergyRefresh::Unavailable
            }
            Err(e) => {
                warn!(error = %e, "⚠️ Site energy fetch failed, keeping previous totals");
                SiteEnergyRefresh::Failed
            }
        }
    }

    /// Run fresh totals through the per-flow guards and store them.
    pub fn apply_payload(&mut self, payload: &LifetimeEnergy, now: Instant) {
        self.force_refresh = false;
        for total in aggregate_flows(payload) {
            let sample = round3(total.wh / 1000.0);
            let outcome = self.guard.apply(total.flow.key(), Some(sample), now);
            if outcome.new_candidate {
                info!(
                    flow = total.flow.key(),
                    sample_kwh = sample,
                    "🔁 Possible site counter reset, refreshing early"
                );
                self.force_refresh = true;
            }
            let value_kwh = outcome.value.unwrap_or(sample);
            debug!(flow = total.flow.key(), value_kwh, buckets = total.buckets, "Site flow updated");
            self.readings.insert(
                total.flow,
                SiteEnergyReading {
                    flow: total.flow,
                    value_kwh,
                    bucket_count: total.buckets,
                    interval_minutes: payload.interval_minutes,
                    start_date: payload.start_date,
                    last_report_date: payload.last_report_date,
                    update_pending: payload.update_pending,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCloud;
    use evse_types::Subsystem;

    fn payload(series: &[(&'static str, &[f64])]) -> LifetimeEnergy {
        LifetimeEnergy {
            series: series.iter().map(|(k, v)| (*k, v.to_vec())).collect(),
            interval_minutes: 5,
            ..LifetimeEnergy::default()
        }
    }

    fn flow(totals: &[FlowTotal], flow: SiteEnergyFlow) -> Option<f64> {
        totals.iter().find(|t| t.flow == flow).map(|t| t.wh)
    }

    #[test]
    fn test_grid_import_prefers_consumption_difference() {
        let totals = aggregate_flows(&payload(&[
            ("consumption", &[1000.0, 2000.0]),
            ("solar_home", &[500.0, 500.0]),
            ("import", &[99.0]),
        ]));
        assert_eq!(flow(&totals, SiteEnergyFlow::GridImport), Some(2000.0));
    }

    #[test]
    fn test_grid_import_falls_back_to_import_series() {
        let totals = aggregate_flows(&payload(&[
            ("consumption", &[100.0]),
            ("solar_home", &[500.0]),
            ("import", &[40.0, 2.0]),
        ]));
        assert_eq!(flow(&totals, SiteEnergyFlow::GridImport), Some(42.0));

        let totals = aggregate_flows(&payload(&[("grid_home", &[7.0])]));
        assert_eq!(flow(&totals, SiteEnergyFlow::GridImport), Some(7.0));
    }

    #[test]
    fn test_battery_flows_from_components() {
        let totals = aggregate_flows(&payload(&[
            ("solar_battery", &[300.0]),
            ("grid_battery", &[200.0]),
            ("battery_home", &[100.0]),
            ("discharge", &[450.0]),
        ]));
        assert_eq!(flow(&totals, SiteEnergyFlow::BatteryCharge), Some(500.0));
        assert_eq!(flow(&totals, SiteEnergyFlow::BatteryDischarge), Some(450.0));
        assert!(flow(&totals, SiteEnergyFlow::SolarProduction).is_none());
    }

    #[test]
    fn test_zero_primary_series_falls_back_to_components() {
        let totals = aggregate_flows(&payload(&[
            ("charge", &[0.0, 0.0]),
            ("solar_battery", &[1500.0]),
            ("grid_battery", &[500.0]),
            ("discharge", &[0.0]),
            ("battery_home", &[250.0]),
            ("import", &[0.0]),
            ("grid_home", &[80.0]),
        ]));
        assert_eq!(flow(&totals, SiteEnergyFlow::BatteryCharge), Some(2000.0));
        assert_eq!(flow(&totals, SiteEnergyFlow::BatteryDischarge), Some(250.0));
        assert_eq!(flow(&totals, SiteEnergyFlow::GridImport), Some(80.0));
    }

    #[test]
    fn test_payload_converted_and_guarded() {
        let mut cache = SiteEnergyCache::new();
        let now = Instant::now();
        cache.apply_payload(&payload(&[("production", &[1_000_000.0, 234_567.0])]), now);
        assert_eq!(
            cache.readings()[&SiteEnergyFlow::SolarProduction].value_kwh,
            1234.567
        );

        // A collapsed series is held until confirmed
        cache.apply_payload(&payload(&[("production", &[10.0])]), now);
        assert_eq!(
            cache.readings()[&SiteEnergyFlow::SolarProduction].value_kwh,
            1234.567
        );
        assert!(!cache.is_fresh(now));
    }

    #[tokio::test]
    async fn test_outage_blocks_refresh() {
        let cloud = FakeCloud::default();
        cloud
            .lifetime_queue
            .lock()
            .push_back(Err(CloudError::ServiceUnavailable {
                subsystem: Subsystem::SiteEnergy,
                status: 503,
            }));
        let mut cache = SiteEnergyCache::new();
        let now = Instant::now();

        assert_eq!(cache.refresh(&cloud, now).await, SiteEnergyRefresh::Unavailable);
        assert_eq!(cache.refresh(&cloud, now).await, SiteEnergyRefresh::Skipped);
        assert_eq!(cloud.count("lifetime_energy"), 1);

        *cloud.lifetime_default.lock() = Some(payload(&[("production", &[5000.0])]));
        let later = now + SITE_ENERGY_FAILURE_COOLDOWN;
        assert_eq!(cache.refresh(&cloud, later).await, SiteEnergyRefresh::Updated);
        assert_eq!(cache.refresh(&cloud, later).await, SiteEnergyRefresh::Skipped);
    }
}
