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

use crate::actions::{ActionDiagnostic, LevelPreference};
use evse_types::Subsystem;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Substrings that identify a name resolution failure in a transport error chain.
const DNS_PATTERNS: [&str; 6] = [
    "dns error",
    "failed to lookup address",
    "name resolution",
    "name or service not known",
    "nodename nor servname",
    "no such host",
];

/// Typed failure produced by the credential supplier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Multi-factor code rejected")]
    MfaInvalid,

    #[error("Multi-factor authentication temporarily blocked")]
    MfaBlocked,

    #[error("Login service unavailable")]
    ServiceUnavailable,

    #[error("Access token could not be obtained")]
    TokenUnavailable,
}

/// Cloud API error types
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Credential refresh failed: {0}")]
    Auth(#[from] AuthFailure),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {body}")]
    Server {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("API returned error status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("{subsystem:?} service unavailable (status {status})")]
    ServiceUnavailable { subsystem: Subsystem, status: u16 },

    #[error("Connection timeout")]
    Timeout,

    #[error("Network error: {message}")]
    Network { message: String, dns: bool },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    ActionFailed(Box<ActionDiagnostic>),

    #[error("No request variant matches level preference {0:?}")]
    NoMatchingCandidate(LevelPreference),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Failure classes driving the coordinator's backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Auth,
    RateLimit,
    Server,
    Network,
    Dns,
    /// Unexpected 4xx or malformed payload
    Other,
}

impl CloudError {
    /// Convert a transport error into timeout/network classes.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() || err.is_request() {
            let message = error_chain(&err);
            let dns = looks_like_dns(&message);
            return Self::Network { message, dns };
        }
        Self::Http(err)
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Unauthorized | Self::Auth(_) => FailureClass::Auth,
            Self::RateLimited { .. } => FailureClass::RateLimit,
            Self::Server { .. } | Self::ServiceUnavailable { .. } => FailureClass::Server,
            Self::Timeout => FailureClass::Network,
            Self::Network { dns: true, .. } => FailureClass::Dns,
            Self::Network { dns: false, .. } => FailureClass::Network,
            Self::Http(err) if err.is_timeout() || err.is_connect() => {
                if looks_like_dns(&error_chain(err)) {
                    FailureClass::Dns
                } else {
                    FailureClass::Network
                }
            }
            Self::Http(_)
            | Self::Json(_)
            | Self::Api { .. }
            | Self::InvalidResponse(_)
            | Self::ActionFailed(_)
            | Self::NoMatchingCandidate(_)
            | Self::Config(_) => FailureClass::Other,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. }
            | Self::Api { status, .. }
            | Self::ServiceUnavailable { status, .. } => Some(*status),
            Self::ActionFailed(diag) => diag.status,
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            Self::Json(_)
            | Self::Auth(_)
            | Self::Timeout
            | Self::Network { .. }
            | Self::InvalidResponse(_)
            | Self::NoMatchingCandidate(_)
            | Self::Config(_) => None,
        }
    }

    /// Server supplied `Retry-After` hint, for rate limits and 5xx answers.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::Server { retry_after, .. } => *retry_after,
            Self::Http(_)
            | Self::Json(_)
            | Self::Unauthorized
            | Self::Auth(_)
            | Self::Api { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Timeout
            | Self::Network { .. }
            | Self::InvalidResponse(_)
            | Self::ActionFailed(_)
            | Self::NoMatchingCandidate(_)
            | Self::Config(_) => None,
        }
    }
}

/// True when the message matches a known name resolution failure.
pub fn looks_like_dns(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    DNS_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
