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

//! Scripted cloud double used by the unit tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use evse_cloud::{
    ChargerCloud, ChargerSummary, CloudError, CloudResult, LifetimeEnergy, SessionHistoryPage,
    StartRequest, StatusPayload, StatusRecord,
};
use evse_types::{ActionOutcome, ChargeMode, SessionRecord};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};

pub(crate) const SITE: &str = "1234";

#[derive(Debug, Default)]
pub(crate) struct FakeCloud {
    pub status_queue: Mutex<VecDeque<CloudResult<StatusPayload>>>,
    pub status_default: Mutex<StatusPayload>,
    pub summary_queue: Mutex<VecDeque<CloudResult<Vec<ChargerSummary>>>>,
    pub summary_default: Mutex<Vec<ChargerSummary>>,
    pub charge_modes: Mutex<HashMap<String, ChargeMode>>,
    pub sessions: Mutex<HashMap<String, Vec<SessionRecord>>>,
    pub session_failures: Mutex<HashSet<String>>,
    pub lifetime_queue: Mutex<VecDeque<CloudResult<LifetimeEnergy>>>,
    pub lifetime_default: Mutex<Option<LifetimeEnergy>>,
    pub start_queue: Mutex<VecDeque<CloudResult<ActionOutcome>>>,
    pub stop_outcome: Mutex<Option<ActionOutcome>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCloud {
    pub fn with_chargers(records: Vec<StatusRecord>) -> Self {
        let fake = Self::default();
        *fake.status_default.lock() = StatusPayload {
            chargers: records,
            server_time: None,
        };
        fake
    }

    pub fn set_chargers(&self, records: Vec<StatusRecord>) {
        self.status_default.lock().chargers = records;
    }

    pub fn push_status_error(&self, err: CloudError) {
        self.status_queue.lock().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

pub(crate) fn charger(serial: &str) -> StatusRecord {
    StatusRecord {
        serial: serial.to_owned(),
        connected: true,
        plugged: true,
        ..StatusRecord::default()
    }
}

#[async_trait]
impl ChargerCloud for FakeCloud {
    fn site_id(&self) -> &str {
        SITE
    }

    async fn status(&self) -> CloudResult<StatusPayload> {
        self.record("status".to_owned());
        if let Some(result) = self.status_queue.lock().pop_front() {
            return result;
        }
        Ok(self.status_default.lock().clone())
    }

    async fn summary(&self) -> CloudResult<Vec<ChargerSummary>> {
        self.record("summary".to_owned());
        if let Some(result) = self.summary_queue.lock().pop_front() {
            return result;
        }
        Ok(self.summary_default.lock().clone())
    }

    async fn charge_mode(&self, serial: &str) -> CloudResult<Option<ChargeMode>> {
        self.record(format!("charge_mode:{serial}"));
        Ok(self.charge_modes.lock().get(serial).copied())
    }

    async fn set_charge_mode(&self, serial: &str, mode: ChargeMode) -> CloudResult<()> {
        self.record(format!("set_charge_mode:{serial}:{mode}"));
        self.charge_modes.lock().insert(serial.to_owned(), mode);
        Ok(())
    }

    async fn session_history_page(
        &self,
        serial: &str,
        day: NaiveDate,
        _timezone: &str,
        offset: usize,
        limit: usize,
    ) -> CloudResult<SessionHistoryPage> {
        self.record(format!("history:{serial}:{day}:{offset}"));
        if self.session_failures.lock().contains(serial) {
            return Err(CloudError::ServiceUnavailable {
                subsystem: evse_types::Subsystem::SessionHistory,
                status: 503,
            });
        }
        let all = self.sessions.lock().get(serial).cloned().unwrap_or_default();
        let records: Vec<SessionRecord> = all.iter().skip(offset).take(limit).cloned().collect();
        Ok(SessionHistoryPage {
            has_more: offset + records.len() < all.len(),
            raw_len: records.len(),
            records,
        })
    }

    async fn lifetime_energy(&self) -> CloudResult<LifetimeEnergy> {
        self.record("lifetime_energy".to_owned());
        if let Some(result) = self.lifetime_queue.lock().pop_front() {
            return result;
        }
        self.lifetime_default
            .lock()
            .clone()
            .ok_or_else(|| CloudError::InvalidResponse("no lifetime energy".to_owned()))
    }

    async fn start_charging(&self, request: &StartRequest) -> CloudResult<ActionOutcome> {
        self.record(format!("start:{}:{}", request.serial, request.amps));
        self.start_queue
            .lock()
            .pop_front()
            .unwrap_or(Ok(ActionOutcome::Accepted))
    }

    async fn stop_charging(&self, serial: &str) -> CloudResult<ActionOutcome> {
        self.record(format!("stop:{serial}"));
        Ok(self.stop_outcome.lock().unwrap_or(ActionOutcome::Accepted))
    }

    async fn set_live_stream(&self, enabled: bool) -> CloudResult<()> {
        self.record(format!("live_stream:{enabled}"));
        Ok(())
    }

    async fn trigger_message(&self, serial: &str, message: &str) -> CloudResult<Value> {
        self.record(format!("trigger:{serial}:{message}"));
        Ok(json!({"status": "accepted"}))
    }
}
