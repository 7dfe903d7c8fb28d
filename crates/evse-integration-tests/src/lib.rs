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

//! Mock cloud fixtures shared by the end-to-end tests.

use evse_cloud::{CloudHandle, Credentials, EvseCloudClient};
use evse_sync::{Coordinator, SiteIdentity, SyncConfig};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const SITE: &str = "1234";
pub const SERIAL: &str = "EV01";
pub const COOKIE: &str = "XSRF-TOKEN=xs; enlighten_manager_token_production=mgr";

pub fn status_path() -> String {
    format!("/service/evse_controller/{SITE}/ev_chargers/status")
}

/// Summary path without its `filter_retired=true` query.
pub fn summary_path() -> String {
    format!("/service/evse_controller/api/v2/{SITE}/ev_chargers/summary")
}

pub fn charge_mode_path(serial: &str) -> String {
    format!("/service/evse_scheduler/api/v1/iqevc/charging-mode/{SITE}/{serial}/preference")
}

pub fn history_path(serial: &str) -> String {
    format!("/service/enho_historical_events_ms/{SITE}/sessions/{serial}/history")
}

pub fn lifetime_path() -> String {
    format!("/pv/systems/{SITE}/lifetime_energy")
}

pub fn action_path(serial: &str, action: &str) -> String {
    format!("/service/evse_controller/{SITE}/ev_chargers/{serial}/{action}")
}

/// Status payload in the `evChargerData` shape.
pub fn status_body(serial: &str, plugged: bool, charging: bool) -> String {
    let connector_status = if charging { "CHARGING" } else { "AVAILABLE" };
    json!({
        "evChargerData": [{
            "sn": serial,
            "name": "Garage",
            "connected": true,
            "pluggedIn": plugged,
            "charging": charging,
            "faulted": false,
            "chargingLevel": 16,
            "connectors": [{"connectorStatusType": connector_status}],
        }],
        "ts": chrono::Utc::now().timestamp(),
    })
    .to_string()
}

pub fn summary_body(serial: &str, lifetime_wh: f64) -> String {
    json!({"data": [{
        "serialNumber": serial,
        "displayName": "Garage",
        "maxCurrent": 48,
        "chargeLevelDetails": {"min": 6, "max": 40},
        "phaseMode": "SINGLE_PHASE",
        "commissioningStatus": 1,
        "operatingVoltage": 230,
        "lifeTimeConsumption": lifetime_wh,
        "firmwareVersion": "25.1.0",
    }]})
    .to_string()
}

pub fn charge_mode_body(mode: &str) -> String {
    let entry = |key: &str| json!({"enabled": key == mode, "chargingMode": key});
    json!({"data": {"modes": {
        "manualCharging": entry("MANUAL_CHARGING"),
        "scheduledCharging": entry("SCHEDULED_CHARGING"),
        "greenCharging": entry("GREEN_CHARGING"),
    }}})
    .to_string()
}

pub fn history_body(records: &[Value]) -> String {
    json!({"data": {"hasMore": false, "result": records}}).to_string()
}

/// Coordinator with site energy disabled unless the caller turns it back on.
pub fn config() -> SyncConfig {
    SyncConfig {
        site_energy_enabled: false,
        ..SyncConfig::default()
    }
}

pub fn client(server: &ServerGuard) -> EvseCloudClient {
    EvseCloudClient::new(
        server.url(),
        SITE,
        Credentials::new(COOKIE, Some("eauth".to_owned())),
        Duration::from_secs(5),
    )
    .expect("client")
}

pub fn coordinator(server: &ServerGuard, config: SyncConfig) -> Coordinator {
    let site = SiteIdentity {
        site_id: SITE.to_owned(),
        site_name: Some("Home".to_owned()),
        serials: Vec::new(),
    };
    Coordinator::new(config, site, CloudHandle::new(Arc::new(client(server)))).expect("coordinator")
}

/// Mock cloud answering the read endpoints a healthy poll touches.
pub struct MockCloud {
    pub server: ServerGuard,
    pub mocks: Vec<Mock>,
}

impl std::fmt::Debug for MockCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCloud")
            .field("url", &self.server.url())
            .field("mocks", &self.mocks.len())
            .finish()
    }
}

impl MockCloud {
    pub async fn start() -> Self {
        Self {
            server: Server::new_async().await,
            mocks: Vec::new(),
        }
    }

    pub async fn healthy(serial: &str, plugged: bool, charging: bool) -> Self {
        let mut cloud = Self::start().await;
        cloud.status(&status_body(serial, plugged, charging)).await;
        cloud.summary(&summary_body(serial, 320_590.0)).await;
        cloud.charge_mode(serial, "MANUAL_CHARGING").await;
        cloud.history(serial, &history_body(&[])).await;
        cloud
    }

    async fn get(&mut self, path: &str, body: &str) {
        let mock = self
            .server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    pub async fn status(&mut self, body: &str) {
        self.get(&status_path(), body).await;
    }

    pub async fn summary(&mut self, body: &str) {
        let mock = self
            .server
            .mock("GET", summary_path().as_str())
            .match_query(Matcher::UrlEncoded("filter_retired".into(), "true".into()))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    pub async fn charge_mode(&mut self, serial: &str, mode: &str) {
        self.get(&charge_mode_path(serial), &charge_mode_body(mode)).await;
    }

    pub async fn history(&mut self, serial: &str, body: &str) {
        let mock = self
            .server
            .mock("POST", history_path(serial).as_str())
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    pub fn coordinator(&self, config: SyncConfig) -> Coordinator {
        coordinator(&self.server, config)
    }
}
