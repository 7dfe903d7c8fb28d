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

//! Per-site synchronization loop.
//!
//! The coordinator owns every cache, guard and pending map for one site and mutates them
//! only through `&mut self`, so a new tick cannot start before the previous one, including
//! its error handling, has finished. Listeners observe results through a `watch` channel
//! that is replaced with a fresh map after each tick.

use crate::backoff::{BackoffWindow, STATUS_SIGNALS, SignalSet};
use crate::config::SyncConfig;
use crate::counter_guard::CounterGuard;
use crate::enrich::build_snapshot;
use crate::errors::{SyncError, SyncResult};
use crate::intent::IntentTracker;
use crate::polling::PollingState;
use crate::session_history::{
    DayFetch, DayWindow, RefreshReport, SessionHistoryCache, fetch_many, total_energy_kwh,
};
use crate::site_energy::{SiteEnergyCache, SiteEnergyRefresh};
use crate::summary_cache::SummaryCache;
use crate::timer::{LoopEvent, TimerKind, TimerSlots};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use evse_cloud::{
    ChargerCloud, CloudError, CloudHandle, FailureClass, LevelPreference, StartRequest,
    StatusRecord,
};
use evse_types::{
    ActionOutcome, BenignReason, ChargeMode, DeviceSnapshot, FailureCounts, PhaseTimings, SiteEnergyFlow,
    SiteEnergyReading, SiteMetrics, SnapshotMap, Subsystem, SyncSignal,
};
use futures_util::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fast polling window opened by control actions.
pub const DEFAULT_FAST_WINDOW: Duration = Duration::from_secs(60);
/// Amperage used when nothing better is known.
pub const DEFAULT_AMPS: u32 = 32;
pub const DEFAULT_CONNECTOR_ID: u32 = 1;

/// Site served by one coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteIdentity {
    pub site_id: String,
    pub site_name: Option<String>,
    /// Chargers to track; empty tracks every charger on the site
    pub serials: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct CachedMode {
    mode: Option<ChargeMode>,
    fetched_at: Instant,
}

#[derive(Debug, Clone)]
struct FailureInfo {
    at: DateTime<Utc>,
    status: Option<u16>,
    description: String,
}

fn elapsed_s(since: Instant) -> f64 {
    since.elapsed().as_secs_f64()
}

#[derive(Debug)]
pub struct Coordinator {
    config: SyncConfig,
    site: SiteIdentity,
    tracked: BTreeSet<String>,
    timezone: Tz,
    cloud: CloudHandle,

    summary: SummaryCache,
    sessions: SessionHistoryCache,
    site_energy: SiteEnergyCache,
    lifetime_guard: CounterGuard,
    charge_modes: HashMap<String, CachedMode>,
    intent: IntentTracker,
    last_set_amps: HashMap<String, u32>,
    was_charging: HashMap<String, bool>,
    session_ends: HashMap<String, DateTime<Utc>>,

    backoff: BackoffWindow,
    signals: SignalSet,
    rng: StdRng,

    any_charging: bool,
    streaming: bool,
    fast_until: Option<Instant>,
    current_interval: Duration,
    fast_polling: bool,
    first_tick_done: bool,

    last_success: Option<DateTime<Utc>>,
    last_failure: Option<FailureInfo>,
    latency_ms: Option<u64>,
    phase_timings: PhaseTimings,

    snapshot_tx: watch::Sender<SnapshotMap>,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    events_rx: mpsc::UnboundedReceiver<LoopEvent>,
    timers: TimerSlots<TimerKind>,
    background: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(config: SyncConfig, site: SiteIdentity, cloud: CloudHandle) -> SyncResult<Self> {
        config.validate().map_err(SyncError::Config)?;
        if site.site_id.trim().is_empty() {
            return Err(SyncError::Config("Site id is required".to_owned()));
        }
        let timezone = config.tz().map_err(SyncError::Config)?;
        let (snapshot_tx, _) = watch::channel(SnapshotMap::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            tracked: site.serials.iter().cloned().collect(),
            timezone,
            cloud,
            summary: SummaryCache::new(),
            sessions: SessionHistoryCache::new(config.session_history_interval_min),
            site_energy: SiteEnergyCache::new(),
            lifetime_guard: CounterGuard::new(),
            charge_modes: HashMap::new(),
            intent: IntentTracker::new(config.auto_resume_cooldown()),
            last_set_amps: HashMap::new(),
            was_charging: HashMap::new(),
            session_ends: HashMap::new(),
            backoff: BackoffWindow::new(),
            signals: SignalSet::default(),
            rng: StdRng::from_entropy(),
            any_charging: false,
            streaming: false,
            fast_until: None,
            current_interval: config.slow_interval(),
            fast_polling: false,
            first_tick_done: false,
            last_success: None,
            last_failure: None,
            latency_ms: None,
            phase_timings: PhaseTimings::default(),
            snapshot_tx,
            events_tx,
            events_rx,
            timers: TimerSlots::default(),
            background: None,
            config,
            site,
        })
    }

    // ============= Observation =============

    pub fn site_id(&self) -> &str {
        &self.site.site_id
    }

    pub fn subscribe(&self) -> watch::Receiver<SnapshotMap> {
        self.snapshot_tx.subscribe()
    }

    /// Latest published snapshot map.
    pub fn snapshot(&self) -> SnapshotMap {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn site_energy(&self) -> &BTreeMap<SiteEnergyFlow, SiteEnergyReading> {
        self.site_energy.readings()
    }

    pub fn signals(&self) -> Vec<SyncSignal> {
        self.signals.active()
    }

    /// Delay until the next regular tick.
    pub fn poll_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn backoff_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.backoff
            .resume_at()
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending_count()
    }

    pub fn metrics(&self) -> SiteMetrics {
        let now = Instant::now();
        let backoff_active = self.backoff.is_active(now);
        SiteMetrics {
            site_id: self.site.site_id.clone(),
            site_name: self.site.site_name.clone(),
            last_success_utc: self.last_success,
            last_failure_utc: self.last_failure.as_ref().map(|f| f.at),
            last_failure_status: self.last_failure.as_ref().and_then(|f| f.status),
            last_failure_description: self.last_failure.as_ref().map(|f| f.description.clone()),
            last_failure_source: self.last_failure.as_ref().map(|_| "status".to_owned()),
            last_error: self.last_failure.as_ref().map(|f| f.description.clone()),
            latency_ms: self.latency_ms,
            failures: self.backoff.counts(),
            backoff_active,
            backoff_ends_utc: if backoff_active {
                self.backoff.resume_at_utc()
            } else {
                None
            },
            polling_interval_s: self.current_interval.as_secs(),
            fast_polling: self.fast_polling,
            summary_ttl_s: self.summary.ttl().as_secs(),
            phase_timings: self.phase_timings,
            session_cache: self.sessions.stats(now),
            signals: self.signals.active(),
        }
    }

    // ============= Poll =============

    /// Run one poll and publish the resulting snapshots.
    pub async fn tick(&mut self) -> SyncResult<SnapshotMap> {
        let started = Instant::now();
        if self.backoff.is_active(started) {
            let until = self.backoff.resume_at_utc().unwrap_or_else(Utc::now);
            debug!(until = %until, "⏸️ Backing off, skipping poll");
            return Err(SyncError::BackingOff { until });
        }

        let cloud = self.cloud.current();
        let mut timings = PhaseTimings::default();

        let polling = self.polling_state();
        self.summary
            .set_ttl_for(polling.is_fast(started), polling.fast_interval);
        let phase = Instant::now();
        self.summary.refresh(cloud.as_ref(), started).await;
        timings.summary_s = Some(elapsed_s(phase));

        let phase = Instant::now();
        let status = match cloud.status().await {
            Ok(status) => status,
            Err(err) => return Err(self.record_failure(err, Instant::now())),
        };
        let latency = phase.elapsed();
        timings.status_s = Some(latency.as_secs_f64());
        self.record_success(latency);

        let records: Vec<StatusRecord> = status
            .chargers
            .into_iter()
            .filter(|record| self.is_tracked(&record.serial))
            .collect();
        let serials: Vec<String> = records.iter().map(|r| r.serial.clone()).collect();

        let phase = Instant::now();
        self.refresh_charge_modes(cloud.as_ref(), &serials).await;
        timings.charge_mode_s = Some(elapsed_s(phase));

        let mut snapshots = self.assemble(&records, Instant::now());

        let phase = Instant::now();
        self.sync_session_history(&cloud, &mut snapshots).await;
        timings.session_history_s = Some(elapsed_s(phase));

        if self.config.site_energy_enabled {
            let phase = Instant::now();
            self.refresh_site_energy(cloud.as_ref()).await;
            timings.site_energy_s = Some(elapsed_s(phase));
        }

        self.auto_resume(cloud.as_ref(), &snapshots).await;
        let now = Instant::now();
        self.intent.reconcile(&mut snapshots, now);

        self.any_charging = snapshots.values().any(|s| s.charging);
        let polling = self.polling_state();
        self.fast_polling = polling.is_fast(now);
        self.current_interval = polling.interval(now);
        timings.total_s = Some(elapsed_s(started));
        self.phase_timings = timings;
        self.first_tick_done = true;

        let map: SnapshotMap = Arc::new(snapshots);
        self.snapshot_tx.send_replace(Arc::clone(&map));
        debug!(
            chargers = map.len(),
            charging = self.any_charging,
            interval_s = self.current_interval.as_secs(),
            total_s = timings.total_s,
            "🔄 Poll complete"
        );
        Ok(map)
    }

    fn is_tracked(&self, serial: &str) -> bool {
        self.tracked.is_empty() || self.tracked.contains(serial)
    }

    fn ensure_tracked(&self, serial: &str) -> SyncResult<()> {
        if self.is_tracked(serial) {
            Ok(())
        } else {
            Err(SyncError::UnknownDevice(serial.to_owned()))
        }
    }

    fn polling_state(&self) -> PollingState {
        PollingState {
            fast_interval: self.config.fast_interval(),
            slow_interval: self.config.slow_interval(),
            any_charging: self.any_charging,
            streaming: self.streaming,
            fast_while_streaming: self.config.fast_while_streaming,
            fast_until: self.fast_until,
        }
    }

    fn record_success(&mut self, latency: Duration) {
        let counts = self.backoff.counts();
        if counts != FailureCounts::default() {
            info!(?counts, "✅ Cloud reachable again");
        }
        self.backoff.clear();
        self.timers.cancel(&TimerKind::BackoffResume);
        for signal in STATUS_SIGNALS {
            if self.signals.clear(signal) {
                info!(signal = %signal, "✅ Sync signal cleared");
            }
        }
        self.last_success = Some(Utc::now());
        self.latency_ms = Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
    }

    fn record_failure(&mut self, err: CloudError, now: Instant) -> SyncError {
        let class = err.failure_class();
        self.last_failure = Some(FailureInfo {
            at: Utc::now(),
            status: err.status(),
            description: err.to_string(),
        });

        let delay = self.backoff.record_failure(
            class,
            err.retry_after(),
            self.config.slow_interval(),
            now,
            &mut self.rng,
        );
        for signal in self.backoff.signals() {
            if self.signals.raise(signal) {
                warn!(signal = %signal, "🚨 Sync signal raised");
            }
        }
        if let Some(delay) = delay {
            warn!(
                error = %err,
                ?class,
                delay_s = delay.as_secs_f64(),
                "⏳ Status poll failed, backing off"
            );
            self.timers.schedule(
                TimerKind::BackoffResume,
                delay,
                self.events_tx.clone(),
                LoopEvent::BackoffElapsed,
            );
        }

        match class {
            FailureClass::Auth => {
                if self.signals.is_active(SyncSignal::ReauthRequired) {
                    error!(error = %err, "🔑 Credentials rejected repeatedly, reauthentication required");
                    SyncError::ReauthRequired
                } else {
                    warn!(error = %err, "🔑 Credentials rejected, retrying next poll");
                    SyncError::Unauthorized
                }
            }
            FailureClass::RateLimit
            | FailureClass::Server
            | FailureClass::Network
            | FailureClass::Dns
            | FailureClass::Other => SyncError::Cloud(err),
        }
    }

    async fn refresh_charge_modes(&mut self, cloud: &dyn ChargerCloud, serials: &[String]) {
        let now = Instant::now();
        let ttl = self.config.charge_mode_ttl();
        let stale: Vec<&String> = serials
            .iter()
            .filter(|serial| {
                self.charge_modes
                    .get(serial.as_str())
                    .is_none_or(|cached| now.saturating_duration_since(cached.fetched_at) >= ttl)
            })
            .collect();
        if stale.is_empty() {
            return;
        }

        let lookups = stale.into_iter().map(|serial| async move {
            (serial.clone(), cloud.charge_mode(serial).await)
        });
        for (serial, result) in join_all(lookups).await {
            match result {
                Ok(mode) => {
                    self.charge_modes
                        .insert(serial, CachedMode { mode, fetched_at: now });
                }
                Err(e) => {
                    debug!(serial = %serial, error = %e, "Charge mode lookup failed, keeping cached value");
                }
            }
        }
    }

    fn assemble(&mut self, records: &[StatusRecord], now: Instant) -> BTreeMap<String, DeviceSnapshot> {
        let summaries = self.summary.by_serial();
        let mut invalidate_summary = false;
        let mut snapshots = BTreeMap::new();

        for record in records {
            let serial = &record.serial;
            let mode = self.charge_modes.get(serial).and_then(|cached| cached.mode);
            let mut snapshot = build_snapshot(
                record,
                summaries.get(serial.as_str()).copied(),
                mode,
                self.config.nominal_voltage,
            );

            let lifetime = self.lifetime_guard.apply(serial, snapshot.lifetime_kwh, now);
            if lifetime.new_candidate {
                info!(
                    serial = %serial,
                    reported = ?snapshot.lifetime_kwh,
                    held = ?lifetime.value,
                    "🔁 Possible lifetime counter reset, refreshing inventory early"
                );
                invalidate_summary = true;
            }
            snapshot.lifetime_kwh = lifetime.value;

            let was_charging = self.was_charging.insert(serial.clone(), record.charging);
            if record.charging {
                self.session_ends.remove(serial);
            } else if was_charging == Some(true) {
                let ended = record.last_reported_at.unwrap_or_else(Utc::now);
                self.session_ends.insert(serial.clone(), ended);
            }
            snapshot.session_end = self.session_ends.get(serial).copied();

            snapshots.insert(serial.clone(), snapshot);
        }

        if invalidate_summary {
            self.summary.invalidate();
        }
        snapshots
    }

    async fn sync_session_history(
        &mut self,
        cloud: &Arc<dyn ChargerCloud>,
        snapshots: &mut BTreeMap<String, DeviceSnapshot>,
    ) {
        let window = DayWindow::containing(Utc::now(), self.timezone);
        let serials: Vec<String> = snapshots.keys().cloned().collect();
        let due = self.sessions.due(&serials, window.day, Instant::now());

        if !due.is_empty() {
            if self.first_tick_done {
                let results = fetch_many(Arc::clone(cloud), due, window, Utc::now()).await;
                self.apply_session_results(results);
            } else {
                info!(devices = due.len(), "🗂️ Loading session history in background");
                self.sessions.mark_in_flight(&due);
                let tx = self.events_tx.clone();
                let cloud = Arc::clone(cloud);
                if let Some(previous) = self.background.take() {
                    previous.abort();
                }
                self.background = Some(tokio::spawn(async move {
                    let results = fetch_many(cloud, due, window, Utc::now()).await;
                    let _ = tx.send(LoopEvent::SessionHistoryFetched(results));
                }));
            }
        }

        let now = Instant::now();
        for snapshot in snapshots.values_mut() {
            self.fill_sessions(snapshot, window.day, now);
        }
    }

    fn fill_sessions(&self, snapshot: &mut DeviceSnapshot, day: NaiveDate, now: Instant) {
        let view = self.sessions.view(&snapshot.serial, day, now);
        snapshot.energy_today_sessions_kwh = total_energy_kwh(&view.sessions);
        snapshot.energy_today_sessions = view.sessions;
    }

    fn apply_session_results(&mut self, results: Vec<DayFetch>) -> RefreshReport {
        let report = self.sessions.apply(results, Instant::now());
        let signal = SyncSignal::CloudUnavailable(Subsystem::SessionHistory);
        if report.unavailable {
            if self.signals.raise(signal) {
                warn!(signal = %signal, "🚨 Sync signal raised");
            }
        } else if !report.refreshed.is_empty() && self.signals.clear(signal) {
            info!(signal = %signal, "✅ Sync signal cleared");
        }
        report
    }

    /// Merge a background refresh into the published map without touching other fields.
    fn merge_background_sessions(&mut self, results: Vec<DayFetch>) {
        self.background = None;
        let Some(day) = results.first().map(|fetch| fetch.day) else {
            return;
        };
        let report = self.apply_session_results(results);
        if report.refreshed.is_empty() {
            return;
        }

        let current = self.snapshot();
        let mut updated = (*current).clone();
        let now = Instant::now();
        for serial in &report.refreshed {
            if let Some(snapshot) = updated.get_mut(serial) {
                self.fill_sessions(snapshot, day, now);
            }
        }
        debug!(devices = report.refreshed.len(), "🗂️ Background session history merged");
        self.snapshot_tx.send_replace(Arc::new(updated));
    }

    async fn refresh_site_energy(&mut self, cloud: &dyn ChargerCloud) {
        let signal = SyncSignal::CloudUnavailable(Subsystem::SiteEnergy);
        match self.site_energy.refresh(cloud, Instant::now()).await {
            SiteEnergyRefresh::Updated => {
                if self.signals.clear(signal) {
                    info!(signal = %signal, "✅ Sync signal cleared");
                }
            }
            SiteEnergyRefresh::Unavailable => {
                if self.signals.raise(signal) {
                    warn!(signal = %signal, "🚨 Sync signal raised");
                }
            }
            SiteEnergyRefresh::Skipped | SiteEnergyRefresh::Failed => {}
        }
    }

    async fn auto_resume(
        &mut self,
        cloud: &dyn ChargerCloud,
        snapshots: &BTreeMap<String, DeviceSnapshot>,
    ) {
        let now = Instant::now();
        for serial in self.intent.auto_resume_candidates(snapshots, now) {
            let Some(snapshot) = snapshots.get(&serial) else {
                continue;
            };
            let request = StartRequest {
                serial: serial.clone(),
                amps: self.best_amps(Some(snapshot), &serial, None),
                connector_id: DEFAULT_CONNECTOR_ID,
                preference: LevelPreference::for_charge_mode(snapshot.charge_mode_pref),
                strict: false,
            };
            let cooldown = self.intent.resume_cooldown();
            self.intent.note_resume_attempt(&serial, now);
            self.timers.schedule(
                TimerKind::AutoResumeCooldown(serial.clone()),
                cooldown,
                self.events_tx.clone(),
                LoopEvent::AutoResumeCooldownElapsed(serial.clone()),
            );

            info!(serial = %serial, amps = request.amps, "▶️ Charger suspended, resuming charge");
            match cloud.start_charging(&request).await {
                Ok(ActionOutcome::Benign(BenignReason::NotReady)) => {
                    info!(serial = %serial, "Charger not ready to resume");
                }
                Ok(outcome) => {
                    debug!(serial = %serial, ?outcome, "Auto-resume issued");
                    self.intent
                        .set_expectation(&serial, true, cooldown, Instant::now());
                    self.kick_fast(None);
                    self.request_refresh();
                }
                Err(e) => {
                    warn!(serial = %serial, error = %e, "⚠️ Auto-resume failed");
                }
            }
        }
    }

    /// Requested amps, else the last amps we set, else the reported level, else 32.
    fn best_amps(&self, snapshot: Option<&DeviceSnapshot>, serial: &str, requested: Option<u32>) -> u32 {
        let amps = requested
            .or_else(|| self.last_set_amps.get(serial).copied())
            .or_else(|| snapshot.and_then(|s| s.charging_level).filter(|a| *a > 0))
            .unwrap_or(DEFAULT_AMPS);
        snapshot.map_or(amps, |s| s.clamp_amps(amps))
    }

    // ============= Control =============

    pub async fn start_charging(
        &mut self,
        serial: &str,
        amps: Option<u32>,
        connector_id: u32,
    ) -> SyncResult<ActionOutcome> {
        self.ensure_tracked(serial)?;
        let snapshot = self.snapshot().get(serial).cloned();
        if let Some(snapshot) = &snapshot
            && !snapshot.plugged
        {
            info!(serial = %serial, "🔌 Charger not plugged in, start skipped");
            self.intent.set_desired(serial, false);
            return Ok(ActionOutcome::Benign(BenignReason::NotReady));
        }

        let mode = snapshot
            .as_ref()
            .and_then(|s| s.charge_mode_pref)
            .or_else(|| self.charge_modes.get(serial).and_then(|cached| cached.mode));
        let request = StartRequest {
            serial: serial.to_owned(),
            amps: self.best_amps(snapshot.as_ref(), serial, amps),
            connector_id,
            preference: LevelPreference::for_charge_mode(mode),
            strict: false,
        };
        let outcome = self.cloud.current().start_charging(&request).await?;
        self.last_set_amps.insert(serial.to_owned(), request.amps);

        // Only a start the cloud took keeps the device wanted for auto-resume
        match outcome {
            ActionOutcome::Accepted | ActionOutcome::Benign(BenignReason::AlreadyCharging) => {
                self.intent.set_desired(serial, true);
                self.intent.set_expectation(
                    serial,
                    true,
                    self.config.expectation_hold(),
                    Instant::now(),
                );
                self.kick_fast(None);
                self.request_refresh();
            }
            ActionOutcome::Benign(BenignReason::NotReady) => {
                self.intent.set_desired(serial, false);
            }
            ActionOutcome::Benign(BenignReason::NotActive) => {}
        }
        Ok(outcome)
    }

    pub async fn stop_charging(&mut self, serial: &str) -> SyncResult<ActionOutcome> {
        self.ensure_tracked(serial)?;
        let outcome = self.cloud.current().stop_charging(serial).await?;
        self.intent.set_desired(serial, false);

        match outcome {
            ActionOutcome::Accepted | ActionOutcome::Benign(BenignReason::NotActive) => {
                self.intent.set_expectation(
                    serial,
                    false,
                    self.config.expectation_hold(),
                    Instant::now(),
                );
                self.kick_fast(None);
                self.request_refresh();
            }
            ActionOutcome::Benign(BenignReason::NotReady | BenignReason::AlreadyCharging) => {}
        }
        Ok(outcome)
    }

    pub async fn set_charge_mode(&mut self, serial: &str, mode: ChargeMode) -> SyncResult<ActionOutcome> {
        self.ensure_tracked(serial)?;
        self.cloud.current().set_charge_mode(serial, mode).await?;
        self.charge_modes.insert(
            serial.to_owned(),
            CachedMode {
                mode: Some(mode),
                fetched_at: Instant::now(),
            },
        );
        info!(serial = %serial, mode = %mode, "🗓️ Charge mode set");
        self.request_refresh();
        Ok(ActionOutcome::Accepted)
    }

    /// Ask a charger to push an OCPP message, then poll soon to pick up its effect.
    pub async fn trigger_message(&mut self, serial: &str, message: &str) -> SyncResult<Value> {
        self.ensure_tracked(serial)?;
        let reply = self.cloud.current().trigger_message(serial, message).await?;
        self.request_refresh();
        Ok(reply)
    }

    /// Pin the charging flag of a device for `hold`, overriding stale cloud reports.
    pub fn set_charging_expectation(&mut self, serial: &str, desired: bool, hold: Duration) {
        self.intent
            .set_expectation(serial, desired, hold, Instant::now());
    }

    /// Poll fast for a while. Never shortens an open window.
    pub fn kick_fast(&mut self, window: Option<Duration>) {
        let until = Instant::now() + window.unwrap_or(DEFAULT_FAST_WINDOW);
        self.fast_until = Some(self.fast_until.map_or(until, |current| current.max(until)));
    }

    pub async fn set_streaming(&mut self, enabled: bool) -> SyncResult<()> {
        self.cloud.current().set_live_stream(enabled).await?;
        self.streaming = enabled;
        info!(enabled, "📡 Live stream toggled");
        if enabled {
            self.request_refresh();
        }
        Ok(())
    }

    /// Schedule an out-of-band poll; repeated requests within the debounce collapse into one.
    pub fn request_refresh(&mut self) {
        self.timers.schedule(
            TimerKind::RefreshRequest,
            self.config.refresh_debounce(),
            self.events_tx.clone(),
            LoopEvent::RefreshRequested,
        );
    }

    // ============= Loop =============

    /// Apply a loop event. Returns true when it calls for an immediate poll.
    pub(crate) fn handle_event(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::BackoffElapsed => {
                self.timers.cancel(&TimerKind::BackoffResume);
                info!("⏰ Backoff elapsed, resuming polling");
                true
            }
            LoopEvent::RefreshRequested => {
                self.timers.cancel(&TimerKind::RefreshRequest);
                true
            }
            LoopEvent::AutoResumeCooldownElapsed(serial) => {
                self.intent.clear_resume_attempt(&serial);
                self.timers.cancel(&TimerKind::AutoResumeCooldown(serial));
                false
            }
            LoopEvent::SessionHistoryFetched(results) => {
                self.merge_background_sessions(results);
                false
            }
        }
    }

    /// Wait for the next loop event and act on it.
    pub async fn process_next_event(&mut self) -> bool {
        let Some(event) = self.events_rx.recv().await else {
            return false;
        };
        if self.handle_event(event) {
            self.run_tick().await;
        }
        true
    }

    async fn run_tick(&mut self) {
        match self.tick().await {
            Ok(_) | Err(SyncError::BackingOff { .. }) => {}
            Err(SyncError::ReauthRequired) => {
                error!(site_id = %self.site.site_id, "🔑 Reauthentication required");
            }
            Err(e) => {
                warn!(site_id = %self.site.site_id, error = %e, "⚠️ Poll failed");
            }
        }
    }

    fn next_delay(&self) -> Duration {
        // Resume after backoff is driven by its own timer
        self.backoff_remaining()
            .map_or(self.current_interval, |remaining| remaining + self.current_interval)
    }

    /// Poll until `shutdown` is notified.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(site_id = %self.site.site_id, "🚀 Synchronization started");
        let mut next_tick = Instant::now();
        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
                () = tokio::time::sleep_until(next_tick) => {
                    self.run_tick().await;
                    next_tick = Instant::now() + self.next_delay();
                }
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event) {
                        self.run_tick().await;
                        next_tick = Instant::now() + self.next_delay();
                    }
                }
            }
        }
        self.shutdown();
    }

    /// Cancel timers and background work. Partial results are discarded.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        if let Some(task) = self.background.take() {
            task.abort();
        }
        self.sessions.cancel_in_flight();
        info!(site_id = %self.site.site_id, "🛑 Synchronization stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(task) = self.background.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::SUSPENDED_EVSE_STATUS;
    use crate::summary_cache::SUMMARY_IDLE_TTL;
    use crate::testing::{FakeCloud, SITE, charger};
    use evse_cloud::{ChargerSummary, LifetimeEnergy};
    use evse_types::SessionRecord;

    fn config() -> SyncConfig {
        SyncConfig {
            site_energy_enabled: false,
            ..SyncConfig::default()
        }
    }

    fn coordinator_with(cloud: &Arc<FakeCloud>, config: SyncConfig, serials: &[&str]) -> Coordinator {
        let site = SiteIdentity {
            site_id: SITE.to_owned(),
            site_name: Some("Home".to_owned()),
            serials: serials.iter().map(|s| (*s).to_owned()).collect(),
        };
        let cloud: Arc<dyn ChargerCloud> = cloud.clone();
        Coordinator::new(config, site, CloudHandle::new(cloud)).unwrap()
    }

    fn coordinator(cloud: &Arc<FakeCloud>) -> Coordinator {
        coordinator_with(cloud, config(), &[])
    }

    fn server_error() -> CloudError {
        CloudError::Server {
            status: 503,
            body: String::new(),
            retry_after: None,
        }
    }

    fn suspended(serial: &str) -> StatusRecord {
        StatusRecord {
            connector_status: Some(SUSPENDED_EVSE_STATUS.to_owned()),
            ..charger(serial)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_publishes_snapshot() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1"), charger("EV2")]));
        let mut coord = coordinator(&cloud);
        let rx = coord.subscribe();

        let map = coord.tick().await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(rx.borrow().len(), 2);
        assert_eq!(coord.poll_interval(), Duration::from_secs(60));

        let metrics = coord.metrics();
        assert_eq!(metrics.site_id, SITE);
        assert!(metrics.last_success_utc.is_some());
        assert!(!metrics.fast_polling);
        assert!(metrics.phase_timings.total_s.is_some());
        assert!(metrics.signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_allow_list_filters_chargers() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1"), charger("EV2")]));
        let mut coord = coordinator_with(&cloud, config(), &["EV1"]);

        let map = coord.tick().await.unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["EV1"]);
        assert!(matches!(
            coord.start_charging("EV2", None, 1).await,
            Err(SyncError::UnknownDevice(serial)) if serial == "EV2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_charging_device_polls_fast() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        assert_eq!(coord.poll_interval(), Duration::from_secs(30));
        assert!(coord.metrics().fast_polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_reset_needs_confirmation() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        *cloud.summary_default.lock() = vec![ChargerSummary {
            serial: "EV1".to_owned(),
            lifetime_kwh: Some(320.59),
            ..ChargerSummary::default()
        }];
        let mut coord = coordinator(&cloud);

        let mut seen = vec![coord.tick().await.unwrap()["EV1"].lifetime_kwh];
        cloud.summary_default.lock()[0].lifetime_kwh = Some(0.0);
        tokio::time::advance(SUMMARY_IDLE_TTL).await;
        seen.push(coord.tick().await.unwrap()["EV1"].lifetime_kwh);
        // The candidate invalidated the inventory, so this tick refetches right away
        seen.push(coord.tick().await.unwrap()["EV1"].lifetime_kwh);

        assert_eq!(seen, vec![Some(320.59), Some(320.59), Some(0.0)]);
        assert_eq!(cloud.count("summary"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_server_errors_back_off_and_signal_once() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);

        for _ in 0..3 {
            cloud.push_status_error(server_error());
            assert!(matches!(coord.tick().await, Err(SyncError::Cloud(_))));
            tokio::time::advance(Duration::from_secs(3600)).await;
        }
        cloud.push_status_error(server_error());
        assert!(coord.tick().await.is_err());

        let remaining = coord.backoff_remaining().unwrap();
        assert!(remaining >= Duration::from_secs(60 * 8), "{remaining:?}");
        let unavailable: Vec<_> = coord
            .signals()
            .into_iter()
            .filter(|s| *s == SyncSignal::CloudUnavailable(Subsystem::Status))
            .collect();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(coord.metrics().failures.server_errors, 4);
        assert!(coord.metrics().backoff_active);

        // No fetch while backing off
        let polls = cloud.count("status");
        assert!(matches!(coord.tick().await, Err(SyncError::BackingOff { .. })));
        assert_eq!(cloud.count("status"), polls);

        tokio::time::advance(remaining).await;
        coord.tick().await.unwrap();
        assert!(coord.signals().is_empty());
        assert_eq!(coord.metrics().failures, FailureCounts::default());
        assert!(coord.backoff_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_retry_after_extends_backoff() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);
        cloud.push_status_error(CloudError::Server {
            status: 503,
            body: String::new(),
            retry_after: Some(Duration::from_secs(3600)),
        });

        assert!(coord.tick().await.is_err());
        let remaining = coord.backoff_remaining().unwrap();
        assert!(remaining >= Duration::from_secs(3599), "{remaining:?}");

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(matches!(coord.tick().await, Err(SyncError::BackingOff { .. })));
        assert_eq!(cloud.count("status"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timer_triggers_poll() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);
        cloud.push_status_error(CloudError::Timeout);
        assert!(coord.tick().await.is_err());
        assert_eq!(coord.pending_timers(), 1);

        assert!(coord.process_next_event().await);
        assert_eq!(cloud.count("status"), 2);
        assert!(coord.metrics().last_success_utc.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_unauthorized_requires_reauth() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);

        cloud.push_status_error(CloudError::Unauthorized);
        assert!(matches!(coord.tick().await, Err(SyncError::Unauthorized)));
        assert!(coord.signals().is_empty());

        cloud.push_status_error(CloudError::Unauthorized);
        assert!(matches!(coord.tick().await, Err(SyncError::ReauthRequired)));
        assert_eq!(coord.signals(), vec![SyncSignal::ReauthRequired]);

        coord.tick().await.unwrap();
        assert!(coord.signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_unplugged_charger_is_benign() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            plugged: false,
            ..charger("EV1")
        }]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        let outcome = coord.start_charging("EV1", Some(16), 1).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Benign(BenignReason::NotReady));
        assert_eq!(cloud.count("start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_clamps_amps_and_holds_expectation() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        *cloud.summary_default.lock() = vec![ChargerSummary {
            serial: "EV1".to_owned(),
            min_amp: Some(6),
            max_amp: Some(32),
            ..ChargerSummary::default()
        }];
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        let outcome = coord.start_charging("EV1", Some(48), 1).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Accepted);
        assert_eq!(cloud.count("start:EV1:32"), 1);

        // Cloud has not caught up yet
        let map = coord.tick().await.unwrap();
        assert!(map["EV1"].charging);
        assert_eq!(coord.poll_interval(), Duration::from_secs(30));

        // Without a requested level the last one is reused
        coord.start_charging("EV1", None, 1).await.unwrap();
        assert_eq!(cloud.count("start:EV1:32"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_charging_is_benign_every_time() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]));
        for _ in 0..2 {
            cloud
                .start_queue
                .lock()
                .push_back(Ok(ActionOutcome::Benign(BenignReason::AlreadyCharging)));
        }
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        for _ in 0..2 {
            assert_eq!(
                coord.start_charging("EV1", Some(16), 1).await.unwrap(),
                ActionOutcome::Benign(BenignReason::AlreadyCharging)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_overrides_stale_charging_flag() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        assert_eq!(coord.stop_charging("EV1").await.unwrap(), ActionOutcome::Accepted);
        assert!(!coord.tick().await.unwrap()["EV1"].charging);

        tokio::time::advance(Duration::from_secs(91)).await;
        assert!(coord.tick().await.unwrap()["EV1"].charging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_charger_resumed_once_per_window() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![suspended("EV1")]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        coord.start_charging("EV1", Some(16), 1).await.unwrap();
        cloud.clear_calls();

        let map = coord.tick().await.unwrap();
        assert_eq!(cloud.count("start:EV1:16"), 1);
        assert!(map["EV1"].charging);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(30)).await;
            coord.tick().await.unwrap();
        }
        assert_eq!(cloud.count("start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_start_is_not_resumed() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![suspended("EV1")]));
        cloud
            .start_queue
            .lock()
            .push_back(Ok(ActionOutcome::Benign(BenignReason::NotReady)));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        let outcome = coord.start_charging("EV1", Some(16), 1).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Benign(BenignReason::NotReady));
        assert_eq!(coord.intent.desired("EV1"), Some(false));

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(30)).await;
            coord.tick().await.unwrap();
        }
        assert_eq!(cloud.count("start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_charging_start_marks_desired() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]));
        cloud
            .start_queue
            .lock()
            .push_back(Ok(ActionOutcome::Benign(BenignReason::AlreadyCharging)));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();

        coord.start_charging("EV1", Some(16), 1).await.unwrap();
        assert_eq!(coord.intent.desired("EV1"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_active_stop_clears_desire() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![suspended("EV1")]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        coord.start_charging("EV1", Some(16), 1).await.unwrap();
        assert_eq!(coord.intent.desired("EV1"), Some(true));

        *cloud.stop_outcome.lock() = Some(ActionOutcome::Benign(BenignReason::NotActive));
        let outcome = coord.stop_charging("EV1").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Benign(BenignReason::NotActive));
        assert_eq!(coord.intent.desired("EV1"), Some(false));
        cloud.clear_calls();

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(30)).await;
            coord.tick().await.unwrap();
        }
        assert_eq!(cloud.count("start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_message_requests_refresh() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator_with(&cloud, config(), &["EV1"]);

        let reply = coord.trigger_message("EV1", "MeterValues").await.unwrap();
        assert_eq!(reply["status"], "accepted");
        assert_eq!(cloud.count("trigger:EV1:MeterValues"), 1);
        assert_eq!(coord.pending_timers(), 1);

        assert!(matches!(
            coord.trigger_message("EV9", "MeterValues").await,
            Err(SyncError::UnknownDevice(_))
        ));
        assert_eq!(cloud.count("trigger"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resume_without_desire() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![suspended("EV1")]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        coord.tick().await.unwrap();
        assert_eq!(cloud.count("start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_end_fixed_on_transition() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]));
        let mut coord = coordinator(&cloud);
        assert!(coord.tick().await.unwrap()["EV1"].session_end.is_none());

        cloud.set_chargers(vec![charger("EV1")]);
        let ended = coord.tick().await.unwrap()["EV1"].session_end;
        assert!(ended.is_some());
        assert_eq!(coord.tick().await.unwrap()["EV1"].session_end, ended);

        cloud.set_chargers(vec![StatusRecord {
            charging: true,
            ..charger("EV1")
        }]);
        assert!(coord.tick().await.unwrap()["EV1"].session_end.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_loads_session_history_in_background() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        cloud.sessions.lock().insert(
            "EV1".to_owned(),
            vec![SessionRecord {
                session_id: "s1".to_owned(),
                start: Some(Utc::now() - chrono::Duration::minutes(1)),
                energy_kwh: 2.5,
                energy_total_kwh: 2.5,
                ..SessionRecord::default()
            }],
        );
        let mut coord = coordinator(&cloud);

        let first = coord.tick().await.unwrap();
        assert!(first["EV1"].energy_today_sessions.is_empty());

        assert!(coord.process_next_event().await);
        let merged = coord.snapshot();
        assert_eq!(merged["EV1"].energy_today_sessions.len(), 1);
        assert!((merged["EV1"].energy_today_sessions_kwh - 2.5).abs() < 1e-9);
        assert!(!coord.metrics().session_cache.refresh_in_progress);

        // Later ticks serve the cache inline
        let second = coord.tick().await.unwrap();
        assert_eq!(second["EV1"].energy_today_sessions.len(), 1);
        assert_eq!(cloud.count("history"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_history_outage_raises_signal() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        cloud.session_failures.lock().insert("EV1".to_owned());
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        coord.process_next_event().await;

        assert_eq!(
            coord.signals(),
            vec![SyncSignal::CloudUnavailable(Subsystem::SessionHistory)]
        );
        assert_eq!(coord.metrics().session_cache.blocked_devices, 1);

        // Blocked device is not retried inline
        coord.tick().await.unwrap();
        assert_eq!(cloud.count("history"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_site_energy_outage_raises_signal() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        cloud
            .lifetime_queue
            .lock()
            .push_back(Err(CloudError::ServiceUnavailable {
                subsystem: Subsystem::SiteEnergy,
                status: 503,
            }));
        let mut coord = coordinator_with(&cloud, SyncConfig::default(), &[]);
        coord.tick().await.unwrap();
        assert!(
            coord
                .signals()
                .contains(&SyncSignal::CloudUnavailable(Subsystem::SiteEnergy))
        );

        *cloud.lifetime_default.lock() = Some(LifetimeEnergy {
            series: [("production", vec![2000.0])].into_iter().collect(),
            ..LifetimeEnergy::default()
        });
        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        coord.tick().await.unwrap();
        assert!(coord.signals().is_empty());
        assert_eq!(coord.site_energy()[&SiteEnergyFlow::SolarProduction].value_kwh, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_charge_mode_cached_and_applied() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        cloud
            .charge_modes
            .lock()
            .insert("EV1".to_owned(), ChargeMode::Green);
        let mut coord = coordinator(&cloud);

        assert_eq!(coord.tick().await.unwrap()["EV1"].charge_mode, ChargeMode::Green);
        coord.tick().await.unwrap();
        assert_eq!(cloud.count("charge_mode"), 1);

        coord.set_charge_mode("EV1", ChargeMode::Scheduled).await.unwrap();
        assert_eq!(
            coord.tick().await.unwrap()["EV1"].charge_mode,
            ChargeMode::Scheduled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_requests_collapse() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);
        coord.request_refresh();
        coord.request_refresh();
        assert_eq!(coord.pending_timers(), 1);

        assert!(coord.process_next_event().await);
        assert_eq!(cloud.count("status"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_and_kick_fast() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);

        coord.kick_fast(Some(Duration::from_secs(10)));
        coord.tick().await.unwrap();
        assert_eq!(coord.poll_interval(), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(11)).await;
        coord.tick().await.unwrap();
        assert_eq!(coord.poll_interval(), Duration::from_secs(60));

        coord.set_streaming(true).await.unwrap();
        coord.tick().await.unwrap();
        assert_eq!(coord.poll_interval(), Duration::from_secs(30));
        assert_eq!(cloud.count("live_stream:true"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_work() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);
        coord.tick().await.unwrap();
        coord.request_refresh();
        assert!(coord.metrics().session_cache.refresh_in_progress);

        coord.shutdown();
        assert_eq!(coord.pending_timers(), 0);
        assert!(!coord.metrics().session_cache.refresh_in_progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let cloud = Arc::new(FakeCloud::with_chargers(vec![charger("EV1")]));
        let mut coord = coordinator(&cloud);
        let shutdown = Arc::new(Notify::new());
        let rx = coord.subscribe();

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                coord.run(shutdown).await;
                coord
            })
        };
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.notify_one();
        let coord = handle.await.unwrap();

        assert!(cloud.count("status") >= 3);
        assert_eq!(rx.borrow().len(), 1);
        assert_eq!(coord.pending_timers(), 0);
    }
}
