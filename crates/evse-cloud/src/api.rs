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

use crate::actions::LevelPreference;
use crate::client::EvseCloudClient;
use crate::decode::{ChargerSummary, LifetimeEnergy, SessionHistoryPage, StatusPayload};
use crate::errors::CloudResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use evse_types::{ActionOutcome, ChargeMode};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Parameters of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub serial: String,
    pub amps: u32,
    pub connector_id: u32,
    pub preference: LevelPreference,
    /// Fail instead of falling back to variants outside the preference
    pub strict: bool,
}

/// Cloud operations the synchronization core depends on.
///
/// Implemented by [`EvseCloudClient`]; tests provide scripted fakes.
#[async_trait]
pub trait ChargerCloud: Send + Sync {
    fn site_id(&self) -> &str;

    async fn status(&self) -> CloudResult<StatusPayload>;

    async fn summary(&self) -> CloudResult<Vec<ChargerSummary>>;

    async fn charge_mode(&self, serial: &str) -> CloudResult<Option<ChargeMode>>;

    async fn set_charge_mode(&self, serial: &str, mode: ChargeMode) -> CloudResult<()>;

    async fn session_history_page(
        &self,
        serial: &str,
        day: NaiveDate,
        timezone: &str,
        offset: usize,
        limit: usize,
    ) -> CloudResult<SessionHistoryPage>;

    async fn lifetime_energy(&self) -> CloudResult<LifetimeEnergy>;

    async fn start_charging(&self, request: &StartRequest) -> CloudResult<ActionOutcome>;

    async fn stop_charging(&self, serial: &str) -> CloudResult<ActionOutcome>;

    async fn set_live_stream(&self, enabled: bool) -> CloudResult<()>;

    async fn trigger_message(&self, serial: &str, message: &str) -> CloudResult<Value>;
}

#[async_trait]
impl ChargerCloud for EvseCloudClient {
    fn site_id(&self) -> &str {
        EvseCloudClient::site_id(self)
    }

    async fn status(&self) -> CloudResult<StatusPayload> {
        EvseCloudClient::status(self).await
    }

    async fn summary(&self) -> CloudResult<Vec<ChargerSummary>> {
        EvseCloudClient::summary(self).await
    }

    async fn charge_mode(&self, serial: &str) -> CloudResult<Option<ChargeMode>> {
        EvseCloudClient::charge_mode(self, serial).await
    }

    async fn set_charge_mode(&self, serial: &str, mode: ChargeMode) -> CloudResult<()> {
        EvseCloudClient::set_charge_mode(self, serial, mode).await
    }

    async fn session_history_page(
        &self,
        serial: &str,
        day: NaiveDate,
        timezone: &str,
        offset: usize,
        limit: usize,
    ) -> CloudResult<SessionHistoryPage> {
        EvseCloudClient::session_history_page(self, serial, day, timezone, offset, limit).await
    }

    async fn lifetime_energy(&self) -> CloudResult<LifetimeEnergy> {
        EvseCloudClient::lifetime_energy(self).await
    }

    async fn start_charging(&self, request: &StartRequest) -> CloudResult<ActionOutcome> {
        EvseCloudClient::start_charging(
            self,
            &request.serial,
            request.amps,
            request.connector_id,
            request.preference,
            request.strict,
        )
        .await
    }

    async fn stop_charging(&self, serial: &str) -> CloudResult<ActionOutcome> {
        EvseCloudClient::stop_charging(self, serial).await
    }

    async fn set_live_stream(&self, enabled: bool) -> CloudResult<()> {
        EvseCloudClient::set_live_stream(self, enabled).await
    }

    async fn trigger_message(&self, serial: &str, message: &str) -> CloudResult<Value> {
        EvseCloudClient::trigger_message(self, serial, message).await
    }
}

/// Shared access to the current credentialed client.
///
/// Caches and the coordinator hold a handle instead of a client so the host can
/// swap in a freshly logged-in client without rebuilding them.
#[derive(Clone)]
pub struct CloudHandle {
    inner: Arc<RwLock<Arc<dyn ChargerCloud>>>,
}

impl CloudHandle {
    pub fn new(client: Arc<dyn ChargerCloud>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(client)),
        }
    }

    pub fn current(&self) -> Arc<dyn ChargerCloud> {
        Arc::clone(&self.inner.read())
    }

    pub fn replace(&self, client: Arc<dyn ChargerCloud>) {
        *self.inner.write() = client;
    }
}

impl fmt::Debug for CloudHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudHandle")
            .field("site_id", &self.current().site_id())
            .finish()
    }
}
