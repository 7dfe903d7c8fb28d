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

//! Session credentials and the hook used to refresh them.
//!
//! The login handshake itself lives outside this crate. The client only needs the
//! resulting cookie jar and e-auth token, and a [`CredentialSupplier`] it can ask
//! for fresh ones when the cloud answers 401.

use crate::errors::AuthFailure;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const XSRF_COOKIE: &str = "XSRF-TOKEN";
const MANAGER_TOKEN_COOKIE: &str = "enlighten_manager_token_production";

/// Authenticated session material.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Raw `Cookie` header value
    pub cookie: String,
    pub eauth_token: Option<String>,
    pub session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie", &"[redacted]")
            .field("eauth_token", &self.eauth_token.as_ref().map(|_| "[redacted]"))
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    pub fn new(cookie: impl Into<String>, eauth_token: Option<String>) -> Self {
        Self {
            cookie: cookie.into(),
            eauth_token: eauth_token.filter(|t| !t.trim().is_empty()),
            session_id: None,
            expires_at: None,
        }
    }

    /// Value of a named cookie from the cookie header.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        self.cookie
            .split(';')
            .map(str::trim)
            .filter_map(|part| part.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_owned())
            .filter(|value| !value.is_empty())
    }

    pub fn xsrf_token(&self) -> Option<String> {
        self.cookie_value(XSRF_COOKIE)
    }

    /// Bearer for control and scheduler calls: manager cookie token, then e-auth token.
    pub fn control_bearer(&self) -> Option<String> {
        self.cookie_value(MANAGER_TOKEN_COOKIE)
            .or_else(|| self.eauth_token.clone())
    }

    /// Bearer for session history calls: e-auth token first, then manager cookie token.
    pub fn history_bearer(&self) -> Option<String> {
        self.eauth_token
            .clone()
            .or_else(|| self.cookie_value(MANAGER_TOKEN_COOKIE))
    }

    /// Session id embedded in the bearer JWT, falling back to the stored one.
    pub fn jwt_session_id(&self) -> Option<String> {
        self.history_bearer()
            .and_then(|token| jwt_claim(&token, &["session_id", "sessionId", "session"]))
            .or_else(|| self.session_id.clone())
    }

    pub fn jwt_user_id(&self) -> Option<String> {
        self.history_bearer()
            .and_then(|token| jwt_claim(&token, &["user_id", "userId", "userid"]))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Supplies fresh credentials after the cloud rejected the current ones.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    async fn refresh(&self) -> Result<Credentials, AuthFailure>;
}

fn decode_jwt_payload(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Look a claim up at the top level of the payload, then under `data`.
fn jwt_claim(token: &str, keys: &[&str]) -> Option<String> {
    let payload = decode_jwt_payload(token)?;
    let scopes = [Some(&payload), payload.get("data")];
    scopes.into_iter().flatten().find_map(|scope| {
        keys.iter().find_map(|key| match scope.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}
