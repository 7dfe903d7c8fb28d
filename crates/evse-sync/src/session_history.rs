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

//! Per-device cache of today's charging sessions.
//!
//! Entries are keyed by serial and local calendar day. A session crossing midnight is only
//! credited with the share of its energy that falls inside the requested day.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use evse_cloud::decode::round3;
use evse_cloud::{ChargerCloud, CloudError, CloudResult};
use evse_types::{SessionCacheStats, SessionRecord, Subsystem};
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const SESSION_PAGE_SIZE: usize = 50;
pub const SESSION_MAX_PAGES: usize = 5;
pub const SESSION_MIN_TTL: Duration = Duration::from_secs(60);
pub const SESSION_FAILURE_COOLDOWN: Duration = Duration::from_secs(15 * 60);
pub const SESSION_REFRESH_CONCURRENCY: usize = 3;

/// Local calendar day expressed as a UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Tz,
}

impl DayWindow {
    pub fn for_day(day: NaiveDate, timezone: Tz) -> Self {
        let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
        Self {
            day,
            start: local_midnight(day, timezone),
            end: local_midnight(next, timezone),
            timezone,
        }
    }

    /// Window of the local day containing `now`.
    pub fn containing(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self::for_day(now.with_timezone(&timezone).date_naive(), timezone)
    }
}

fn local_midnight(day: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let naive = day.and_time(NaiveTime::MIN);
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc))
}

/// Keep sessions overlapping the window and scale their energy to the overlap.
///
/// The overlap is measured against the active charge duration; sessions without one are
/// credited in full. Open sessions are treated as ending at `now`.
pub fn attribute_to_day(
    records: Vec<SessionRecord>,
    window: &DayWindow,
    now: DateTime<Utc>,
) -> Vec<SessionRecord> {
    let mut kept: Vec<SessionRecord> = records
        .into_iter()
        .filter_map(|mut record| {
            let start = record.start.or(record.end)?;
            let end = record.end.unwrap_or(now).max(start);
            if end < window.start || start >= window.end {
                return None;
            }

            let inside = start >= window.start && end <= window.end;
            let fraction = match record.active_charge_secs {
                Some(active) if !inside && active > 0.0 => {
                    let overlap = end.min(window.end) - start.max(window.start);
                    round3((overlap.num_milliseconds() as f64 / 1000.0 / active).clamp(0.0, 1.0))
                }
                Some(_) | None => 1.0,
            };
            record.energy_kwh = round3(record.energy_total_kwh * fraction);
            Some(record)
        })
        .collect();

    kept.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    kept
}

pub fn total_energy_kwh(sessions: &[SessionRecord]) -> f64 {
    round3(sessions.iter().map(|s| s.energy_kwh).sum())
}

/// Fetch every page of one device's history for the window.
pub async fn fetch_day(
    cloud: &dyn ChargerCloud,
    serial: &str,
    window: &DayWindow,
    now: DateTime<Utc>,
) -> CloudResult<Vec<SessionRecord>> {
    let timezone = window.timezone.name();
    let mut records = Vec::new();
    for page_index in 0..SESSION_MAX_PAGES {
        let offset = page_index * SESSION_PAGE_SIZE;
        let page = cloud
            .session_history_page(serial, window.day, timezone, offset, SESSION_PAGE_SIZE)
            .await?;
        let last_page = !page.has_more || page.raw_len < SESSION_PAGE_SIZE;
        records.extend(page.records);
        if last_page {
            break;
        }
    }
    Ok(attribute_to_day(records, window, now))
}

/// Outcome of one device's refresh.
#[derive(Debug)]
pub struct DayFetch {
    pub serial: String,
    pub day: NaiveDate,
    pub result: CloudResult<Vec<SessionRecord>>,
}

/// Refresh several devices with bounded concurrency.
pub async fn fetch_many(
    cloud: Arc<dyn ChargerCloud>,
    serials: Vec<String>,
    window: DayWindow,
    now: DateTime<Utc>,
) -> Vec<DayFetch> {
    stream::iter(serials)
        .map(|serial| {
            let cloud = Arc::clone(&cloud);
            async move {
                let result = fetch_day(cloud.as_ref(), &serial, &window, now).await;
                DayFetch {
                    serial,
                    day: window.day,
                    result,
                }
            }
        })
        .buffer_unordered(SESSION_REFRESH_CONCURRENCY)
        .collect()
        .await
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    sessions: Vec<SessionRecord>,
}

/// Cached sessions for one device and day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionCacheView {
    pub sessions: Vec<SessionRecord>,
    pub age: Option<Duration>,
    pub needs_refresh: bool,
    pub blocked: bool,
}

/// What a batch of refreshes changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
    /// At least one failure was a service outage
    pub unavailable: bool,
}

#[derive(Debug)]
pub struct SessionHistoryCache {
    ttl: Duration,
    entries: HashMap<(String, NaiveDate), CacheEntry>,
    blocked_until: HashMap<String, Instant>,
    in_flight: HashSet<String>,
}

impl SessionHistoryCache {
    /// Cache refreshing every `interval_minutes`, never more often than once a minute.
    pub fn new(interval_minutes: u64) -> Self {
        Self {
            ttl: Duration::from_secs(interval_minutes.saturating_mul(60)).max(SESSION_MIN_TTL),
            entries: HashMap::new(),
            blocked_until: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_blocked(&self, serial: &str, now: Instant) -> bool {
        self.blocked_until.get(serial).is_some_and(|until| now < *until)
    }

    pub fn view(&self, serial: &str, day: NaiveDate, now: Instant) -> SessionCacheView {
        let blocked = self.is_blocked(serial, now);
        match self.entries.get(&(serial.to_owned(), day)) {
            Some(entry) => {
                let age = now.saturating_duration_since(entry.fetched_at);
                SessionCacheView {
                    sessions: entry.sessions.clone(),
                    age: Some(age),
                    needs_refresh: age >= self.ttl,
                    blocked,
                }
            }
            None => SessionCacheView {
                needs_refresh: true,
                blocked,
                ..SessionCacheView::default()
            },
        }
    }

    /// Serials due for a refresh that are neither cooling down nor already in flight.
    pub fn due(&self, serials: &[String], day: NaiveDate, now: Instant) -> Vec<String> {
        serials
            .iter()
            .filter(|serial| !self.in_flight.contains(serial.as_str()))
            .filter(|serial| {
                let view = self.view(serial, day, now);
                view.needs_refresh && !view.blocked
            })
            .cloned()
            .collect()
    }

    pub fn mark_in_flight(&mut self, serials: &[String]) {
        self.in_flight.extend(serials.iter().cloned());
    }

    pub fn cancel_in_flight(&mut self) {
        self.in_flight.clear();
    }

    pub fn apply(&mut self, results: Vec<DayFetch>, now: Instant) -> RefreshReport {
        let mut report = RefreshReport::default();
        for fetch in results {
            self.in_flight.remove(&fetch.serial);
            match fetch.result {
                Ok(sessions) => {
                    debug!(
                        serial = %fetch.serial,
                        day = %fetch.day,
                        sessions = sessions.len(),
                        "🗂️ Session history refreshed"
                    );
                    self.blocked_until.remove(&fetch.serial);
                    self.entries.retain(|(serial, day), _| {
                        serial != &fetch.serial || *day >= fetch.day
                    });
                    self.entries.insert(
                        (fetch.serial.clone(), fetch.day),
                        CacheEntry {
                            fetched_at: now,
                            sessions,
                        },
                    );
                    report.refreshed.push(fetch.serial);
                }
                Err(e) => {
                    warn!(
                        serial = %fetch.serial,
                        error = %e,
                        cooldown_s = SESSION_FAILURE_COOLDOWN.as_secs(),
                        "⚠️ Session history refresh failed, keeping cached sessions"
                    );
                    if matches!(
                        e,
                        CloudError::ServiceUnavailable {
                            subsystem: Subsystem::SessionHistory,
                            ..
                        }
                    ) {
                        report.unavailable = true;
                    }
                    self.blocked_until
                        .insert(fetch.serial.clone(), now + SESSION_FAILURE_COOLDOWN);
                    report.failed.push(fetch.serial);
                }
            }
        }
        report
    }

    pub fn stats(&self, now: Instant) -> SessionCacheStats {
        SessionCacheStats {
            ttl_s: self.ttl.as_secs(),
            entries: self.entries.len(),
            blocked_devices: self
                .blocked_until
                .values()
                .filter(|until| now < **until)
                .count(),
            refresh_in_progress: !self.in_flight.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCloud;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn session(id: &str, start: &str, end: Option<&str>, kwh: f64, active: Option<f64>) -> SessionRecord {
        SessionRecord {
            session_id: id.to_owned(),
            start: Some(utc(start)),
            end: end.map(utc),
            energy_kwh: kwh,
            energy_total_kwh: kwh,
            active_charge_secs: active,
            ..SessionRecord::default()
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_follows_timezone() {
        let window = DayWindow::for_day(day(2025, 6, 2), chrono_tz::Europe::Prague);
        assert_eq!(window.start, utc("2025-06-01T22:00:00Z"));
        assert_eq!(window.end, utc("2025-06-02T22:00:00Z"));

        let window = DayWindow::containing(utc("2025-06-01T23:30:00Z"), chrono_tz::Europe::Prague);
        assert_eq!(window.day, day(2025, 6, 2));
    }

    #[test]
    fn test_midnight_session_apportioned_by_overlap() {
        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        let records = vec![session(
            "s1",
            "2025-03-05T23:30:00Z",
            Some("2025-03-06T01:30:00Z"),
            6.0,
            Some(7200.0),
        )];
        let kept = attribute_to_day(records, &window, utc("2025-03-06T12:00:00Z"));
        assert_eq!(kept.len(), 1);
        assert!((kept[0].energy_kwh - 4.5).abs() < 1e-9);
        assert!((kept[0].energy_total_kwh - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_active_duration_credits_full_energy() {
        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        let records = vec![session(
            "s1",
            "2025-03-05T23:30:00Z",
            Some("2025-03-06T01:30:00Z"),
            6.0,
            None,
        )];
        let kept = attribute_to_day(records, &window, utc("2025-03-06T12:00:00Z"));
        assert!((kept[0].energy_kwh - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_sessions_outside_window_dropped_and_sorted() {
        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        let records = vec![
            session("b", "2025-03-06T08:00:00Z", Some("2025-03-06T09:00:00Z"), 2.0, Some(3600.0)),
            session("yesterday", "2025-03-05T08:00:00Z", Some("2025-03-05T09:00:00Z"), 9.0, None),
            session("a", "2025-03-06T08:00:00Z", Some("2025-03-06T08:30:00Z"), 1.0, None),
            session("open", "2025-03-06T20:00:00Z", None, 3.0, Some(1800.0)),
        ];
        let kept = attribute_to_day(records, &window, utc("2025-03-06T21:00:00Z"));
        let ids: Vec<&str> = kept.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "open"]);
        assert!((total_energy_kwh(&kept) - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fetch_day_paginates_with_cap() {
        let cloud = FakeCloud::default();
        let many: Vec<SessionRecord> = (0..300)
            .map(|i| session(&format!("s{i:03}"), "2025-03-06T08:00:00Z", Some("2025-03-06T08:10:00Z"), 0.1, None))
            .collect();
        cloud.sessions.lock().insert("EV1".to_owned(), many);

        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        let sessions = fetch_day(&cloud, "EV1", &window, utc("2025-03-06T12:00:00Z"))
            .await
            .unwrap();
        assert_eq!(cloud.count("history:EV1"), SESSION_MAX_PAGES);
        assert_eq!(sessions.len(), SESSION_MAX_PAGES * SESSION_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_fetch_day_stops_on_short_page() {
        let cloud = FakeCloud::default();
        cloud.sessions.lock().insert(
            "EV1".to_owned(),
            vec![session("s1", "2025-03-06T08:00:00Z", Some("2025-03-06T09:00:00Z"), 1.5, None)],
        );
        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        fetch_day(&cloud, "EV1", &window, utc("2025-03-06T12:00:00Z"))
            .await
            .unwrap();
        assert_eq!(cloud.calls(), vec!["history:EV1:2025-03-06:0".to_owned()]);
    }

    #[test]
    fn test_ttl_floor() {
        assert_eq!(SessionHistoryCache::new(0).ttl(), SESSION_MIN_TTL);
        assert_eq!(SessionHistoryCache::new(10).ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_failure_blocks_device_and_keeps_stale_entry() {
        let mut cache = SessionHistoryCache::new(1);
        let today = day(2025, 3, 6);
        let now = Instant::now();
        let sessions = vec![session("s1", "2025-03-06T08:00:00Z", None, 1.0, None)];

        cache.apply(
            vec![DayFetch {
                serial: "EV1".to_owned(),
                day: today,
                result: Ok(sessions.clone()),
            }],
            now,
        );
        let later = now + Duration::from_secs(120);
        assert_eq!(cache.due(&["EV1".to_owned()], today, later), vec!["EV1".to_owned()]);

        let report = cache.apply(
            vec![DayFetch {
                serial: "EV1".to_owned(),
                day: today,
                result: Err(CloudError::ServiceUnavailable {
                    subsystem: Subsystem::SessionHistory,
                    status: 503,
                }),
            }],
            later,
        );
        assert!(report.unavailable);
        assert_eq!(report.failed, vec!["EV1".to_owned()]);

        let view = cache.view("EV1", today, later);
        assert!(view.blocked);
        assert_eq!(view.sessions, sessions);
        assert!(cache.due(&["EV1".to_owned()], today, later).is_empty());
        assert_eq!(cache.stats(later).blocked_devices, 1);

        let after_cooldown = later + SESSION_FAILURE_COOLDOWN;
        assert_eq!(
            cache.due(&["EV1".to_owned()], today, after_cooldown),
            vec!["EV1".to_owned()]
        );
    }

    #[test]
    fn test_in_flight_devices_not_due() {
        let mut cache = SessionHistoryCache::new(10);
        let today = day(2025, 3, 6);
        let serials = vec!["EV1".to_owned(), "EV2".to_owned()];
        cache.mark_in_flight(&serials[..1]);
        assert_eq!(cache.due(&serials, today, Instant::now()), vec!["EV2".to_owned()]);
        assert!(cache.stats(Instant::now()).refresh_in_progress);
    }

    #[test]
    fn test_new_day_evicts_previous_day() {
        let mut cache = SessionHistoryCache::new(10);
        let now = Instant::now();
        for d in [day(2025, 3, 5), day(2025, 3, 6)] {
            cache.apply(
                vec![DayFetch {
                    serial: "EV1".to_owned(),
                    day: d,
                    result: Ok(Vec::new()),
                }],
                now,
            );
        }
        assert_eq!(cache.stats(now).entries, 1);
    }

    #[tokio::test]
    async fn test_fetch_many_reports_each_device() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.session_failures.lock().insert("EV2".to_owned());
        let window = DayWindow::for_day(day(2025, 3, 6), chrono_tz::UTC);
        let serials = vec!["EV1".to_owned(), "EV2".to_owned(), "EV3".to_owned(), "EV4".to_owned()];

        let mut results = fetch_many(cloud, serials, window, utc("2025-03-06T12:00:00Z")).await;
        results.sort_by(|a, b| a.serial.cmp(&b.serial));
        assert_eq!(results.len(), 4);
        assert!(results[0].result.is_ok());
        assert!(results[1].result.is_err());
    }
}
