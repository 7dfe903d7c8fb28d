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

//! Tolerant decoding of cloud payloads.
//!
//! The cloud mixes camelCase and snake_case keys, sends numbers as strings and
//! timestamps as seconds, milliseconds or ISO text. Everything in this module maps
//! a closed set of key aliases onto the strongly typed records the rest of the
//! workspace consumes. Nothing outside this module looks at raw JSON.

use crate::errors::{CloudError, CloudResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use evse_types::{ChargeMode, SessionRecord};
use serde_json::Value;
use std::collections::BTreeMap;

/// Energy values above this are watt-hours, below it kilowatt-hours.
pub const WH_HEURISTIC_THRESHOLD: f64 = 200.0;

const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;
const DEFAULT_INTERVAL_MINUTES: u32 = 5;

/// Bucket series the lifetime energy endpoint may carry.
pub const LIFETIME_SERIES: [&str; 12] = [
    "production",
    "consumption",
    "solar_home",
    "solar_grid",
    "import",
    "grid_home",
    "charge",
    "discharge",
    "solar_battery",
    "grid_battery",
    "battery_home",
    "battery_grid",
];

// ============= Coercion helpers =============

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }?;
    number.is_finite().then_some(number)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is range checked before the cast"
)]
pub fn coerce_u32(value: &Value) -> Option<u32> {
    let number = coerce_f64(value)?.round();
    (0.0..=f64::from(u32::MAX))
        .contains(&number)
        .then_some(number as u32)
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "value is range checked before the cast"
)]
pub fn coerce_i64(value: &Value) -> Option<i64> {
    if let Value::Bool(b) = value {
        return Some(i64::from(*b));
    }
    let number = coerce_f64(value)?.trunc();
    (number.abs() < 9.0e15).then_some(number as i64)
}

pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Epoch seconds, epoch milliseconds, or ISO-8601 text.
#[expect(
    clippy::cast_possible_truncation,
    reason = "epoch values are far below i64::MAX"
)]
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(epoch) = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    } {
        if !epoch.is_finite() || epoch <= 0.0 {
            return None;
        }
        let seconds = if epoch > EPOCH_MILLIS_THRESHOLD {
            epoch / 1000.0
        } else {
            epoch
        };
        return Utc.timestamp_opt(seconds.trunc() as i64, 0).single();
    }

    let text = value.as_str()?.trim().replace("[UTC]", "");
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Convert an energy reading to kWh when it looks like watt-hours.
pub fn normalize_energy_kwh(value: f64) -> f64 {
    if value > WH_HEURISTIC_THRESHOLD {
        value / 1000.0
    } else {
        value
    }
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// First non-null value among key aliases.
fn first<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn first_with<T>(obj: &Value, keys: &[&str], coerce: fn(&Value) -> Option<T>) -> Option<T> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find_map(coerce)
}

// ============= Live status =============

/// Active session block of a status record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveSession {
    pub energy_kwh: Option<f64>,
    pub miles: Option<f64>,
    pub cost: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
}

/// One charger entry of the status endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusRecord {
    pub serial: String,
    pub name: Option<String>,
    pub connected: bool,
    pub plugged: bool,
    pub charging: bool,
    pub faulted: bool,
    pub connector_status: Option<String>,
    pub connector_reason: Option<String>,
    pub charging_level: Option<u32>,
    pub power_w: Option<f64>,
    pub session: ActiveSession,
    pub last_reported_at: Option<DateTime<Utc>>,
    pub charge_mode: Option<ChargeMode>,
    pub schedule_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusPayload {
    pub chargers: Vec<StatusRecord>,
    pub server_time: Option<DateTime<Utc>>,
}

const POWER_KEYS: [&str; 4] = ["powerW", "power", "activePower", "active_power"];

/// Decode either status payload shape.
pub fn decode_status(payload: &Value) -> CloudResult<StatusPayload> {
    let (items, server_time) =
        if let Some(items) = payload.get("evChargerData").and_then(Value::as_array) {
            (items, payload.get("ts").and_then(coerce_timestamp))
        } else if let Some(items) = payload.pointer("/data/chargers").and_then(Value::as_array) {
            (
                items,
                payload
                    .pointer("/meta/serverTimeStamp")
                    .and_then(coerce_timestamp),
            )
        } else {
            return Err(CloudError::InvalidResponse(
                "status payload has no charger list".to_owned(),
            ));
        };

    let chargers = items
        .iter()
        .filter_map(|item| decode_status_record(item, server_time))
        .collect();
    Ok(StatusPayload {
        chargers,
        server_time,
    })
}

fn decode_status_record(item: &Value, server_time: Option<DateTime<Utc>>) -> Option<StatusRecord> {
    let serial = first_with(item, &["sn", "serialNumber", "serial"], coerce_string)?;
    let connector = item
        .get("connectors")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .filter(|c| c.is_object());

    let from_item_or_connector = |keys: &[&str]| {
        first(item, keys).or_else(|| connector.and_then(|c| first(c, keys)))
    };

    let session = item
        .get("session_d")
        .filter(|s| s.is_object())
        .map(|sess| ActiveSession {
            energy_kwh: first_with(sess, &["e_c", "energy"], coerce_f64)
                .map(|e| round3(normalize_energy_kwh(e))),
            miles: first_with(sess, &["miles"], coerce_f64),
            cost: first_with(sess, &["session_cost", "cost"], coerce_f64),
            started_at: first_with(sess, &["start_time", "strt_chrg"], coerce_timestamp),
        })
        .unwrap_or_default();

    let schedule = item.get("sch_d");
    let charge_mode = first_with(item, &["chargeMode", "chargingMode"], coerce_string)
        .or_else(|| schedule.and_then(|s| first_with(s, &["mode"], coerce_string)))
        .and_then(|mode| ChargeMode::from_wire(&mode));
    let schedule_type = schedule
        .and_then(|s| s.pointer("/info/0/type"))
        .and_then(coerce_string);

    Some(StatusRecord {
        serial,
        name: first_with(item, &["name", "displayName"], coerce_string),
        connected: first_with(item, &["connected"], coerce_bool).unwrap_or(false),
        plugged: from_item_or_connector(&["pluggedIn", "plugged"])
            .and_then(coerce_bool)
            .unwrap_or(false),
        charging: first_with(item, &["charging"], coerce_bool).unwrap_or(false),
        faulted: first_with(item, &["faulted"], coerce_bool).unwrap_or(false),
        connector_status: from_item_or_connector(&["connectorStatusType"])
            .and_then(coerce_string),
        connector_reason: from_item_or_connector(&["connectorStatusReason"])
            .and_then(coerce_string),
        charging_level: first_with(item, &["chargingLevel", "charging_level"], coerce_u32),
        power_w: first_with(item, &POWER_KEYS, coerce_f64)
            .or_else(|| connector.and_then(|c| first_with(c, &POWER_KEYS, coerce_f64))),
        session,
        last_reported_at: first_with(
            item,
            &["lst_rpt_at", "lastReportedAt", "last_reported_at"],
            coerce_timestamp,
        )
        .or(server_time),
        charge_mode,
        schedule_type,
    })
}

// ============= Summary inventory =============

/// Inventory record from the summary endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChargerSummary {
    pub serial: String,
    pub display_name: Option<String>,
    pub min_amp: Option<u32>,
    pub max_amp: Option<u32>,
    pub max_current: Option<u32>,
    pub phase_mode: Option<String>,
    pub status: Option<String>,
    pub commissioned: Option<bool>,
    pub last_reported_at: Option<DateTime<Utc>>,
    pub operating_voltage: Option<f64>,
    pub lifetime_kwh: Option<f64>,
    pub firmware_version: Option<String>,
}

pub fn decode_summary(payload: &Value) -> CloudResult<Vec<ChargerSummary>> {
    let items = payload
        .get("data")
        .unwrap_or(payload)
        .as_array()
        .ok_or_else(|| CloudError::InvalidResponse("summary payload is not a list".to_owned()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let serial = first_with(item, &["serialNumber", "sn"], coerce_string)?;
            let levels = item.get("chargeLevelDetails");
            Some(ChargerSummary {
                serial,
                display_name: first_with(item, &["displayName", "name"], coerce_string),
                min_amp: levels.and_then(|l| first_with(l, &["min"], coerce_u32)),
                max_amp: levels.and_then(|l| first_with(l, &["max"], coerce_u32)),
                max_current: first_with(item, &["maxCurrent"], coerce_u32),
                phase_mode: first_with(item, &["phaseMode"], coerce_string),
                status: first_with(item, &["status"], coerce_string),
                commissioned: first_with(item, &["commissioningStatus"], coerce_bool),
                last_reported_at: first_with(item, &["lastReportedAt"], coerce_timestamp),
                operating_voltage: first_with(item, &["operatingVoltage"], coerce_f64),
                lifetime_kwh: first_with(item, &["lifeTimeConsumption"], coerce_f64)
                    .map(|e| round3(normalize_energy_kwh(e))),
                firmware_version: first_with(item, &["firmwareVersion"], coerce_string),
            })
        })
        .collect())
}

// ============= Charge mode =============

/// Enabled mode from the scheduler preference payload.
pub fn decode_charge_mode(payload: &Value) -> Option<ChargeMode> {
    let modes = payload.pointer("/data/modes")?;
    ["manualCharging", "scheduledCharging", "greenCharging"]
        .iter()
        .filter_map(|key| modes.get(*key))
        .filter(|entry| entry.get("enabled").and_then(coerce_bool) == Some(true))
        .find_map(|entry| {
            entry
                .get("chargingMode")
                .and_then(coerce_string)
                .and_then(|mode| ChargeMode::from_wire(&mode))
        })
}

// ============= Session history =============

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionHistoryPage {
    /// Records with `energy_kwh` equal to the whole-session energy
    pub records: Vec<SessionRecord>,
    pub has_more: bool,
    /// Raw item count, including entries that failed to decode
    pub raw_len: usize,
}

pub fn decode_session_page(payload: &Value) -> SessionHistoryPage {
    let data = payload.get("data");
    let items = data
        .and_then(|d| d.get("result"))
        .and_then(Value::as_array);
    let Some(items) = items else {
        return SessionHistoryPage::default();
    };
    let has_more = data
        .and_then(|d| d.get("hasMore"))
        .and_then(coerce_bool)
        .unwrap_or(false);

    SessionHistoryPage {
        records: items.iter().filter_map(decode_session_record).collect(),
        has_more,
        raw_len: items.len(),
    }
}

fn decode_session_record(item: &Value) -> Option<SessionRecord> {
    if !item.is_object() {
        return None;
    }
    let start = first_with(item, &["startTime"], coerce_timestamp);
    let end = first_with(item, &["endTime"], coerce_timestamp);
    if start.is_none() && end.is_none() {
        return None;
    }
    let energy = first_with(item, &["aggEnergyValue"], coerce_f64)
        .map(round3)
        .unwrap_or_default();
    let rounded = |keys: &[&str]| first_with(item, keys, coerce_f64).map(round3);

    Some(SessionRecord {
        session_id: first_with(item, &["sessionId", "id"], coerce_string).unwrap_or_default(),
        start,
        end,
        energy_kwh: energy,
        energy_total_kwh: energy,
        active_charge_secs: first_with(item, &["activeChargeTime"], coerce_f64)
            .filter(|secs| *secs > 0.0),
        miles_added: rounded(&["milesAdded"]),
        session_cost: rounded(&["sessionCost"]),
        avg_cost_per_kwh: rounded(&["avgCostPerUnitEnergy"]),
        cost_calculated: first_with(item, &["costCalculated"], coerce_bool),
        manual_overridden: first_with(item, &["manualOverridden"], coerce_bool),
        session_cost_state: first_with(item, &["sessionCostState"], coerce_string),
        charge_profile_stack_level: first_with(item, &["chargeProfileStackLevel"], coerce_i64),
        auth_type: first_with(item, &["authType"], coerce_string),
        auth_identifier: first_with(item, &["authIdentifier"], coerce_string),
        auth_token: first_with(item, &["authToken"], coerce_string),
    })
}

// ============= Site lifetime energy =============

/// Bucketed lifetime energy of a site, values in watt-hours.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LifetimeEnergy {
    pub series: BTreeMap<&'static str, Vec<f64>>,
    pub start_date: Option<NaiveDate>,
    pub last_report_date: Option<DateTime<Utc>>,
    pub update_pending: bool,
    pub interval_minutes: u32,
}

impl LifetimeEnergy {
    /// Sum of positive buckets in Wh and the number of buckets used.
    pub fn sum_wh(&self, key: &str) -> (f64, usize) {
        self.series.get(key).map_or((0.0, 0), |values| {
            (values.iter().sum(), values.len())
        })
    }
}

pub fn decode_lifetime_energy(payload: &Value) -> CloudResult<LifetimeEnergy> {
    let data = payload.get("data").filter(|d| d.is_object()).unwrap_or(payload);
    if !data.is_object() {
        return Err(CloudError::InvalidResponse(
            "lifetime energy payload is not an object".to_owned(),
        ));
    }

    let series = LIFETIME_SERIES
        .iter()
        .filter_map(|key| {
            let values: Vec<f64> = data
                .get(*key)?
                .as_array()?
                .iter()
                .filter_map(coerce_f64)
                .filter(|v| *v >= 0.0)
                .collect();
            Some((*key, values))
        })
        .collect();

    Ok(LifetimeEnergy {
        series,
        start_date: data
            .get("start_date")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()),
        last_report_date: data.get("last_report_date").and_then(coerce_timestamp),
        update_pending: data
            .get("update_pending")
            .and_then(coerce_bool)
            .unwrap_or(false),
        interval_minutes: first_with(data, &["interval_minutes", "interval"], coerce_u32)
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES),
    })
}
