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

use crate::credentials::Credentials;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, REFERER};
use tracing::warn;
use uuid::Uuid;

pub const REDACTED: &str = "[redacted]";

const SENSITIVE_HEADERS: [&str; 4] = ["cookie", "authorization", "e-auth-token", "x-csrf-token"];
const ACCEPT_VALUE: &str = "application/json, text/plain, */*";

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(mut header) => {
            if SENSITIVE_HEADERS.contains(&name) {
                header.set_sensitive(true);
            }
            headers.insert(HeaderName::from_static(name), header);
        }
        Err(_) => warn!(header = name, "Dropping header with invalid characters"),
    }
}

/// Headers sent on every cloud request.
pub fn base_headers(base_url: &str, site_id: &str, creds: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/pv/systems/{site_id}/summary")) {
        headers.insert(REFERER, referer);
    }
    if !creds.cookie.is_empty() {
        insert(&mut headers, "cookie", &creds.cookie);
    }
    if let Some(token) = &creds.eauth_token {
        insert(&mut headers, "e-auth-token", token);
    }
    if let Some(xsrf) = creds.xsrf_token() {
        insert(&mut headers, "x-csrf-token", &xsrf);
    }
    headers
}

/// Extra headers for control and scheduler endpoints.
pub fn control_headers(creds: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(bearer) = creds.control_bearer() {
        insert(&mut headers, "authorization", &format!("Bearer {bearer}"));
    }
    headers
}

/// Extra headers for the historical sessions service.
pub fn history_headers(creds: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(bearer) = creds.history_bearer() {
        insert(&mut headers, "authorization", &format!("Bearer {bearer}"));
    }
    if let Some(session_id) = creds.jwt_session_id() {
        insert(&mut headers, "e-auth-token", &session_id);
    }
    insert(&mut headers, "requestid", &Uuid::new_v4().to_string());
    if let Some(user_id) = creds.jwt_user_id() {
        insert(&mut headers, "username", &user_id);
    }
    headers
}

/// Render headers for diagnostics with credential values replaced.
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let key = name.as_str().to_owned();
            let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                REDACTED.to_owned()
            } else {
                value.to_str().unwrap_or(REDACTED).to_owned()
            };
            (key, shown)
        })
        .collect()
}
