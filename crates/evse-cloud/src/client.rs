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

use crate::actions::{
    ActionCandidate, ActionDiagnostic, ActionKind, AttemptVerdict, LevelPreference, VariantMemory,
    classify_attempt, plan_attempts, start_candidates, stop_candidates,
};
use crate::credentials::{CredentialSupplier, Credentials};
use crate::decode::{
    ChargerSummary, LifetimeEnergy, SessionHistoryPage, StatusPayload, decode_charge_mode,
    decode_lifetime_energy, decode_session_page, decode_status, decode_summary,
};
use crate::errors::{CloudError, CloudResult};
use crate::headers::{base_headers, control_headers, history_headers, redact_headers};
use chrono::{DateTime, NaiveDate, Utc};
use evse_types::{ActionOutcome, ChargeMode, Subsystem};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://enlighten.enphaseenergy.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Statuses the history and energy services use for "temporarily unavailable".
const UNAVAILABLE_STATUSES: [u16; 5] = [500, 502, 503, 504, 550];

/// Header set attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Base,
    Control,
    History,
}

/// Status, retry hint and body of a completed request.
#[derive(Debug)]
struct RawResponse {
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
}

impl RawResponse {
    fn into_json(self) -> CloudResult<Value> {
        if !self.status.is_success() {
            return Err(self.into_error());
        }
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&self.body)?)
    }

    fn into_error(self) -> CloudError {
        let status = self.status.as_u16();
        match self.status {
            StatusCode::UNAUTHORIZED => CloudError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => CloudError::RateLimited {
                retry_after: self.retry_after,
            },
            s if s.is_server_error() || status >= 500 => CloudError::Server {
                status,
                body: self.body,
                retry_after: self.retry_after,
            },
            _ => CloudError::Api {
                status,
                body: self.body,
            },
        }
    }
}

/// Parse `Retry-After` as delta seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        (when.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// REST client for the charger cloud of one site.
pub struct EvseCloudClient {
    base_url: String,
    site_id: String,
    client: Client,
    credentials: RwLock<Credentials>,
    supplier: Option<Arc<dyn CredentialSupplier>>,
    start_memory: Mutex<VariantMemory>,
    stop_memory: Mutex<VariantMemory>,
}

impl fmt::Debug for EvseCloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvseCloudClient")
            .field("base_url", &self.base_url)
            .field("site_id", &self.site_id)
            .field("credentials", &*self.credentials.read())
            .field("has_supplier", &self.supplier.is_some())
            .finish_non_exhaustive()
    }
}

impl EvseCloudClient {
    /// Create a new client with a request timeout applied to every call
    pub fn new(
        base_url: impl Into<String>,
        site_id: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudError::Config(format!("Failed to build HTTP client: {e}")))?;

        let site_id = site_id.into();
        if site_id.trim().is_empty() {
            return Err(CloudError::Config("site id must not be empty".to_owned()));
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            site_id,
            client,
            credentials: RwLock::new(credentials),
            supplier: None,
            start_memory: Mutex::new(VariantMemory::default()),
            stop_memory: Mutex::new(VariantMemory::default()),
        })
    }

    /// Attach the hook used to refresh credentials after a 401
    #[must_use]
    pub fn with_credential_supplier(mut self, supplier: Arc<dyn CredentialSupplier>) -> Self {
        self.supplier = Some(supplier);
        self
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.read().clone()
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = credentials;
    }

    fn headers_for(&self, kind: HeaderKind) -> HeaderMap {
        let creds = self.credentials.read();
        let mut headers = base_headers(&self.base_url, &self.site_id, &creds);
        match kind {
            HeaderKind::Base => {}
            HeaderKind::Control => headers.extend(control_headers(&creds)),
            HeaderKind::History => headers.extend(history_headers(&creds)),
        }
        headers
    }

    /// Ask the supplier for new credentials. Returns the failure if it had one.
    async fn refresh_credentials(&self) -> Option<CloudResult<()>> {
        let supplier = self.supplier.as_ref()?;
        info!(site_id = %self.site_id, "🔑 Cloud returned 401, refreshing credentials");
        Some(match supplier.refresh().await {
            Ok(fresh) => {
                self.set_credentials(fresh);
                Ok(())
            }
            Err(failure) => {
                warn!(site_id = %self.site_id, error = %failure, "Credential refresh failed");
                Err(CloudError::Auth(failure))
            }
        })
    }

    /// Send a request; on 401 refresh credentials once and retry once.
    async fn send(
        &self,
        method: &Method,
        path: &str,
        kind: HeaderKind,
        body: Option<&Value>,
    ) -> CloudResult<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut refreshed = false;

        loop {
            debug!(method = %method, url = %url, "Cloud request");
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.headers_for(kind));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(CloudError::from_transport)?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(CloudError::Unauthorized);
                }
                match self.refresh_credentials().await {
                    Some(Ok(())) => {
                        refreshed = true;
                        continue;
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Err(CloudError::Unauthorized),
                }
            }

            let retry_after = parse_retry_after(response.headers(), Utc::now());
            let body = response.text().await.map_err(CloudError::from_transport)?;
            return Ok(RawResponse {
                status,
                retry_after,
                body,
            });
        }
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        kind: HeaderKind,
        body: Option<&Value>,
    ) -> CloudResult<Value> {
        self.send(&method, path, kind, body).await?.into_json()
    }

    /// Like [`Self::request_json`], mapping outage statuses to a subsystem error.
    async fn request_service_json(
        &self,
        subsystem: Subsystem,
        method: Method,
        path: &str,
        kind: HeaderKind,
        body: Option<&Value>,
    ) -> CloudResult<Value> {
        let raw = self.send(&method, path, kind, body).await?;
        let status = raw.status.as_u16();
        if UNAVAILABLE_STATUSES.contains(&status) {
            return Err(CloudError::ServiceUnavailable { subsystem, status });
        }
        raw.into_json()
    }

    // ============= Read endpoints =============

    /// Live status of every charger on the site
    pub async fn status(&self) -> CloudResult<StatusPayload> {
        let path = format!("/service/evse_controller/{}/ev_chargers/status", self.site_id);
        let payload = self.request_json(Method::GET, &path, HeaderKind::Base, None).await?;
        decode_status(&payload)
    }

    /// Charger inventory with amperage limits and lifetime energy
    pub async fn summary(&self) -> CloudResult<Vec<ChargerSummary>> {
        let path = format!(
            "/service/evse_controller/api/v2/{}/ev_chargers/summary?filter_retired=true",
            self.site_id
        );
        let payload = self
            .request_json(Method::GET, &path, HeaderKind::Control, None)
            .await?;
        decode_summary(&payload)
    }

    fn charge_mode_path(&self, serial: &str) -> String {
        format!(
            "/service/evse_scheduler/api/v1/iqevc/charging-mode/{}/{}/preference",
            self.site_id,
            urlencoding::encode(serial)
        )
    }

    /// Scheduler charge mode preference of one charger
    pub async fn charge_mode(&self, serial: &str) -> CloudResult<Option<ChargeMode>> {
        let path = self.charge_mode_path(serial);
        let payload = self
            .request_json(Method::GET, &path, HeaderKind::Control, None)
            .await?;
        Ok(decode_charge_mode(&payload))
    }

    pub async fn set_charge_mode(&self, serial: &str, mode: ChargeMode) -> CloudResult<()> {
        if !mode.is_scheduler_mode() {
            return Err(CloudError::Config(format!(
                "{mode} cannot be set as a scheduler preference"
            )));
        }
        let path = self.charge_mode_path(serial);
        let body = json!({"mode": mode.as_wire()});
        self.request_json(Method::PUT, &path, HeaderKind::Control, Some(&body))
            .await?;
        info!(serial = %serial, mode = %mode, "✅ Charge mode updated");
        Ok(())
    }

    /// One page of historical sessions for a local calendar day
    pub async fn session_history_page(
        &self,
        serial: &str,
        day: NaiveDate,
        timezone: &str,
        offset: usize,
        limit: usize,
    ) -> CloudResult<SessionHistoryPage> {
        let path = format!(
            "/service/enho_historical_events_ms/{}/sessions/{}/history",
            self.site_id,
            urlencoding::encode(serial)
        );
        let api_day = day.format("%d-%m-%Y").to_string();
        let body = json!({
            "source": "evse",
            "params": {
                "offset": offset,
                "limit": limit,
                "startDate": api_day,
                "endDate": api_day,
                "timezone": timezone,
            }
        });
        let payload = self
            .request_service_json(
                Subsystem::SessionHistory,
                Method::POST,
                &path,
                HeaderKind::History,
                Some(&body),
            )
            .await?;
        Ok(decode_session_page(&payload))
    }

    /// Bucketed lifetime energy of the whole site
    pub async fn lifetime_energy(&self) -> CloudResult<LifetimeEnergy> {
        let path = format!("/pv/systems/{}/lifetime_energy", self.site_id);
        let payload = self
            .request_service_json(Subsystem::SiteEnergy, Method::GET, &path, HeaderKind::Base, None)
            .await?;
        decode_lifetime_energy(&payload)
    }

    /// Ask the cloud to push live status faster, or stop doing so
    pub async fn set_live_stream(&self, enabled: bool) -> CloudResult<()> {
        let action = if enabled {
            "start_live_stream"
        } else {
            "stop_live_stream"
        };
        let path = format!("/service/evse_controller/{}/ev_chargers/{action}", self.site_id);
        self.request_json(Method::GET, &path, HeaderKind::Control, None)
            .await?;
        debug!(site_id = %self.site_id, enabled, "Live stream toggled");
        Ok(())
    }

    // ============= Control actions =============

    /// Ask a charger to send an OCPP message (e.g. `MeterValues`); returns the cloud reply
    pub async fn trigger_message(&self, serial: &str, message: &str) -> CloudResult<Value> {
        let path = format!(
            "/service/evse_controller/{}/ev_charger/{}/trigger_message",
            self.site_id,
            urlencoding::encode(serial)
        );
        let body = json!({"requestedMessage": message});
        let reply = self
            .request_json(Method::POST, &path, HeaderKind::Control, Some(&body))
            .await?;
        info!(serial = %serial, message, "📨 OCPP message triggered");
        Ok(reply)
    }

    /// Start charging, negotiating the request variant the deployment accepts
    pub async fn start_charging(
        &self,
        serial: &str,
        amps: u32,
        connector_id: u32,
        preference: LevelPreference,
        strict: bool,
    ) -> CloudResult<ActionOutcome> {
        let candidates = start_candidates(&self.site_id, serial, amps, connector_id);
        info!(serial = %serial, amps, ?preference, "⚡ Starting charge");
        self.negotiate(
            ActionKind::StartCharging,
            &candidates,
            &self.start_memory,
            preference,
            strict,
        )
        .await
    }

    /// Stop charging; "nothing to stop" answers are benign
    pub async fn stop_charging(&self, serial: &str) -> CloudResult<ActionOutcome> {
        let candidates = stop_candidates(&self.site_id, serial);
        info!(serial = %serial, "⏹ Stopping charge");
        self.negotiate(
            ActionKind::StopCharging,
            &candidates,
            &self.stop_memory,
            LevelPreference::Any,
            false,
        )
        .await
    }

    async fn negotiate(
        &self,
        action: ActionKind,
        candidates: &[ActionCandidate],
        memory: &Mutex<VariantMemory>,
        preference: LevelPreference,
        strict: bool,
    ) -> CloudResult<ActionOutcome> {
        let remembered = memory.lock().get(preference);
        let order = plan_attempts(candidates, preference, strict, remembered)?;
        let mut first_failure: Option<ActionDiagnostic> = None;

        for (attempt, idx) in order.into_iter().enumerate() {
            let candidate = &candidates[idx];
            let raw = self
                .send(
                    &candidate.method,
                    &candidate.path,
                    HeaderKind::Control,
                    candidate.body.as_ref(),
                )
                .await?;
            let status = raw.status.as_u16();

            match classify_attempt(action, status, &raw.body) {
                AttemptVerdict::Success => {
                    memory
                        .lock()
                        .record_success(preference, idx, candidate.includes_level());
                    info!(%action, attempt, variant = idx, status, "✅ Action accepted");
                    return Ok(ActionOutcome::Accepted);
                }
                AttemptVerdict::Benign(reason) => {
                    info!(%action, variant = idx, status, %reason, "Action is a no-op");
                    return Ok(ActionOutcome::Benign(reason));
                }
                AttemptVerdict::Fatal => {
                    warn!(%action, variant = idx, status, "Action failed on server side");
                    return Err(raw.into_error());
                }
                AttemptVerdict::Fallthrough => {
                    debug!(%action, variant = idx, status, "Variant rejected, trying next");
                    if first_failure.is_none() {
                        first_failure = Some(ActionDiagnostic {
                            action,
                            method: candidate.method.to_string(),
                            path: candidate.path.clone(),
                            status: Some(status),
                            headers: redact_headers(&self.headers_for(HeaderKind::Control)),
                            body: candidate.body.clone(),
                            response: raw.body,
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(diagnostic) => {
                warn!(%action, "❌ All request variants rejected: {}", diagnostic);
                Err(CloudError::ActionFailed(Box::new(diagnostic)))
            }
            None => Err(CloudError::NoMatchingCandidate(preference)),
        }
    }

    #[cfg(test)]
    async fn negotiate_for_test(
        &self,
        candidates: &[ActionCandidate],
        preference: LevelPreference,
    ) -> CloudResult<ActionOutcome> {
        self.negotiate(
            ActionKind::StartCharging,
            candidates,
            &self.start_memory,
            preference,
            false,
        )
        .await
    }
}
