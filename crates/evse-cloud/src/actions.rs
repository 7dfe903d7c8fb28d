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

//! Control action variants and their outcome classification.
//!
//! Deployments disagree on verb, path and payload keys for start/stop. Each action
//! is an ordered list of [`ActionCandidate`]s; the client walks them in a planned
//! order and [`VariantMemory`] keeps the index that last worked per preference.

use crate::errors::{CloudError, CloudResult};
use evse_types::{BenignReason, ChargeMode};
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;

const ALREADY_CHARGING_CODE: &str = "iqevc_ms-10012";
const NOT_PLUGGED_CODE: &str = "iqevc_ms-10008";
const ALREADY_CHARGING_PHRASE: &str = "already in charging state";
const NOT_PLUGGED_PHRASES: [&str; 2] = ["not plugged", "charger is not plugged"];

/// Whether the start payload should carry an amperage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelPreference {
    /// Keep the declared candidate order
    Any,
    IncludeLevel,
    OmitLevel,
}

impl LevelPreference {
    /// Green and scheduled modes manage amperage themselves; everything else sets it.
    pub fn for_charge_mode(mode: Option<ChargeMode>) -> Self {
        match mode {
            Some(ChargeMode::Green | ChargeMode::Scheduled) => Self::OmitLevel,
            Some(ChargeMode::Manual | ChargeMode::Immediate) => Self::IncludeLevel,
            Some(ChargeMode::Idle) | None => Self::Any,
        }
    }

    fn accepts(self, includes_level: bool) -> bool {
        match self {
            Self::Any => true,
            Self::IncludeLevel => includes_level,
            Self::OmitLevel => !includes_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    StartCharging,
    StopCharging,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartCharging => f.write_str("start_charging"),
            Self::StopCharging => f.write_str("stop_charging"),
        }
    }
}

/// One concrete request shape for an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCandidate {
    pub method: Method,
    /// Path relative to the cloud base URL
    pub path: String,
    pub body: Option<Value>,
}

impl ActionCandidate {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn includes_level(&self) -> bool {
        self.body.as_ref().is_some_and(|body| {
            body.get("chargingLevel").is_some() || body.get("charging_level").is_some()
        })
    }
}

fn charger_path(site_id: &str, serial: &str, plural: bool, action: &str) -> String {
    let segment = if plural { "ev_chargers" } else { "ev_charger" };
    format!(
        "/service/evse_controller/{site_id}/{segment}/{}/{action}",
        urlencoding::encode(serial)
    )
}

/// Start variants in the order deployments most commonly accept them.
pub fn start_candidates(site_id: &str, serial: &str, amps: u32, connector_id: u32) -> Vec<ActionCandidate> {
    let plural = charger_path(site_id, serial, true, "start_charging");
    let singular = charger_path(site_id, serial, false, "start_charging");
    let camel = json!({"chargingLevel": amps, "connectorId": connector_id});

    vec![
        ActionCandidate::new(Method::POST, plural.clone(), Some(camel.clone())),
        ActionCandidate::new(Method::PUT, plural.clone(), Some(camel.clone())),
        ActionCandidate::new(Method::POST, singular.clone(), Some(camel)),
        ActionCandidate::new(
            Method::POST,
            plural.clone(),
            Some(json!({"charging_level": amps, "connector_id": connector_id})),
        ),
        ActionCandidate::new(
            Method::POST,
            plural.clone(),
            Some(json!({"connectorId": connector_id})),
        ),
        ActionCandidate::new(Method::POST, plural.clone(), None),
        ActionCandidate::new(Method::POST, singular, None),
        ActionCandidate::new(Method::POST, plural, Some(json!({"chargingLevel": amps}))),
    ]
}

pub fn stop_candidates(site_id: &str, serial: &str) -> Vec<ActionCandidate> {
    let plural = charger_path(site_id, serial, true, "stop_charging");
    let singular = charger_path(site_id, serial, false, "stop_charging");
    vec![
        ActionCandidate::new(Method::PUT, plural.clone(), None),
        ActionCandidate::new(Method::POST, plural, None),
        ActionCandidate::new(Method::POST, singular, None),
    ]
}

/// Last winning candidate index per preference bucket.
#[derive(Debug, Default, Clone)]
pub struct VariantMemory {
    winners: HashMap<LevelPreference, usize>,
}

impl VariantMemory {
    pub fn get(&self, preference: LevelPreference) -> Option<usize> {
        self.winners.get(&preference).copied()
    }

    /// Record a success. The preference bucket only learns candidates whose
    /// payload actually honours the preference; the general bucket always learns.
    pub fn record_success(&mut self, preference: LevelPreference, index: usize, includes_level: bool) {
        if preference.accepts(includes_level) {
            self.winners.insert(preference, index);
        }
        self.winners.insert(LevelPreference::Any, index);
    }
}

/// Order in which candidate indexes are tried.
pub fn plan_attempts(
    candidates: &[ActionCandidate],
    preference: LevelPreference,
    strict: bool,
    remembered: Option<usize>,
) -> CloudResult<Vec<usize>> {
    let (preferred, others): (Vec<usize>, Vec<usize>) = (0..candidates.len())
        .partition(|&idx| preference.accepts(candidates[idx].includes_level()));

    if strict && preferred.is_empty() {
        return Err(CloudError::NoMatchingCandidate(preference));
    }

    let mut order = preferred;
    if !strict {
        order.extend(others);
    }
    if let Some(winner) = remembered
        && let Some(pos) = order.iter().position(|&idx| idx == winner)
    {
        let idx = order.remove(pos);
        order.insert(0, idx);
    }
    Ok(order)
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    Success,
    Benign(BenignReason),
    /// Ambiguous 4xx, try the next candidate
    Fallthrough,
    /// Server-side failure, stop and propagate
    Fatal,
}

pub fn classify_attempt(action: ActionKind, status: u16, body: &str) -> AttemptVerdict {
    match (action, status) {
        (_, 200..=299) => AttemptVerdict::Success,
        (_, 500..=u16::MAX) => AttemptVerdict::Fatal,
        (ActionKind::StartCharging, 409 | 422) => AttemptVerdict::Benign(BenignReason::NotReady),
        (ActionKind::StartCharging, 400) => {
            classify_bad_request(body).map_or(AttemptVerdict::Fallthrough, AttemptVerdict::Benign)
        }
        (ActionKind::StopCharging, 400 | 404 | 409 | 422) => {
            AttemptVerdict::Benign(BenignReason::NotActive)
        }
        (ActionKind::StartCharging | ActionKind::StopCharging, _) => AttemptVerdict::Fallthrough,
    }
}

/// Map a 400 body onto a known benign condition.
///
/// Bodies arrive as JSON objects, as JSON encoded inside a string (double or single
/// quoted), nested under `error`, or as plain text. Unknown codes map to `None`.
pub fn classify_bad_request(body: &str) -> Option<BenignReason> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let texts = match parse_error_body(trimmed) {
        Some(value) => collect_error_texts(&value),
        None => vec![trimmed.to_owned()],
    };
    texts.iter().find_map(|text| match_benign_text(text))
}

fn parse_error_body(text: &str) -> Option<Value> {
    let unquoted = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text);
    let value: Value = serde_json::from_str(unquoted).ok()?;
    if let Value::String(inner) = &value {
        return Some(serde_json::from_str(inner).unwrap_or(value));
    }
    Some(value)
}

fn collect_error_texts(value: &Value) -> Vec<String> {
    let mut texts = Vec::new();
    match value {
        Value::String(s) => texts.push(s.clone()),
        Value::Object(map) => {
            for key in ["errorMessageCode", "displayMessage", "message", "error"] {
                match map.get(key) {
                    Some(Value::String(s)) => texts.push(s.clone()),
                    Some(nested @ Value::Object(_)) => texts.extend(collect_error_texts(nested)),
                    Some(_) | None => {}
                }
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Array(_) => {}
    }
    texts
}

fn match_benign_text(text: &str) -> Option<BenignReason> {
    let lower = text.trim().to_ascii_lowercase();
    if lower == ALREADY_CHARGING_CODE || lower.contains(ALREADY_CHARGING_PHRASE) {
        return Some(BenignReason::AlreadyCharging);
    }
    if lower == NOT_PLUGGED_CODE || NOT_PLUGGED_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(BenignReason::NotReady);
    }
    None
}

/// First failed attempt of an exhausted action, with credentials redacted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDiagnostic {
    pub action: ActionKind,
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub response: String,
}

impl fmt::Display for ActionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {} {}", self.action, self.method, self.path)?;
        if let Some(status) = self.status {
            write!(f, " -> {status}")?;
        }
        if !self.response.is_empty() {
            write!(f, " ({})", self.response)?;
        }
        Ok(())
    }
}
