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

//! Failure accounting and the backoff window.

use chrono::{DateTime, Utc};
use evse_cloud::FailureClass;
use evse_types::{FailureCounts, Subsystem, SyncSignal};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

/// Exponent cap: the multiplier stops growing at 2^3.
pub const MAX_BACKOFF_EXPONENT: u32 = 3;
pub const SERVER_JITTER: (f64, f64) = (1.0, 3.0);
pub const NETWORK_JITTER: (f64, f64) = (1.0, 2.5);

pub const REAUTH_THRESHOLD: u32 = 2;
pub const RATE_LIMIT_SIGNAL_THRESHOLD: u32 = 2;
pub const SERVER_SIGNAL_THRESHOLD: u32 = 3;
pub const DNS_SIGNAL_THRESHOLD: u32 = 2;
pub const NETWORK_SIGNAL_THRESHOLD: u32 = 3;

fn exponential(slow: Duration, failures: u32, jitter: f64) -> Duration {
    let exponent = failures.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    slow.mul_f64(f64::from(1_u32 << exponent) * jitter)
}

/// Resume time and consecutive failure counters. Cleared on any success.
#[derive(Debug, Default)]
pub struct BackoffWindow {
    resume_at: Option<Instant>,
    resume_at_utc: Option<DateTime<Utc>>,
    counts: FailureCounts,
}

impl BackoffWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.resume_at.is_some_and(|at| now < at)
    }

    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn resume_at_utc(&self) -> Option<DateTime<Utc>> {
        self.resume_at_utc
    }

    pub fn counts(&self) -> FailureCounts {
        self.counts
    }

    /// Count a failure and compute the backoff it triggers.
    ///
    /// Auth failures never back off; they are handled by the reauth signal instead.
    pub fn record_failure<R: Rng + ?Sized>(
        &mut self,
        class: FailureClass,
        retry_after: Option<Duration>,
        slow: Duration,
        now: Instant,
        rng: &mut R,
    ) -> Option<Duration> {
        let delay = match class {
            FailureClass::Auth => {
                self.counts.unauthorized += 1;
                return None;
            }
            FailureClass::RateLimit => {
                self.counts.rate_limit_hits += 1;
                let jitter = rng.gen_range(SERVER_JITTER.0..=SERVER_JITTER.1);
                exponential(slow, self.counts.rate_limit_hits, jitter)
                    .max(retry_after.unwrap_or_default())
            }
            FailureClass::Server | FailureClass::Other => {
                self.counts.server_errors += 1;
                let jitter = rng.gen_range(SERVER_JITTER.0..=SERVER_JITTER.1);
                exponential(slow, self.counts.server_errors, jitter)
                    .max(retry_after.unwrap_or_default())
            }
            FailureClass::Network | FailureClass::Dns => {
                self.counts.network_errors += 1;
                if class == FailureClass::Dns {
                    self.counts.dns_failures += 1;
                } else {
                    self.counts.dns_failures = 0;
                }
                let jitter = rng.gen_range(NETWORK_JITTER.0..=NETWORK_JITTER.1);
                exponential(slow, self.counts.network_errors, jitter).max(slow)
            }
        };
        self.resume_at = Some(now + delay);
        self.resume_at_utc = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| Utc::now() + d);
        Some(delay)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Signals the current counters justify.
    pub fn signals(&self) -> Vec<SyncSignal> {
        let c = &self.counts;
        let mut signals = Vec::new();
        if c.unauthorized >= REAUTH_THRESHOLD {
            signals.push(SyncSignal::ReauthRequired);
        }
        if c.rate_limit_hits >= RATE_LIMIT_SIGNAL_THRESHOLD {
            signals.push(SyncSignal::RateLimited);
        }
        if c.server_errors >= SERVER_SIGNAL_THRESHOLD {
            signals.push(SyncSignal::CloudUnavailable(Subsystem::Status));
        }
        if c.dns_failures >= DNS_SIGNAL_THRESHOLD {
            signals.push(SyncSignal::DnsResolution);
        }
        if c.network_errors >= NETWORK_SIGNAL_THRESHOLD {
            signals.push(SyncSignal::NetworkUnreachable);
        }
        signals
    }
}

/// Signals cleared by a successful status poll.
pub const STATUS_SIGNALS: [SyncSignal; 5] = [
    SyncSignal::ReauthRequired,
    SyncSignal::RateLimited,
    SyncSignal::CloudUnavailable(Subsystem::Status),
    SyncSignal::NetworkUnreachable,
    SyncSignal::DnsResolution,
];

/// Active user-visible signals, each raised and cleared on its own.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SignalSet {
    active: BTreeSet<SyncSignal>,
}

impl SignalSet {
    /// Returns true when the signal was not already active.
    pub fn raise(&mut self, signal: SyncSignal) -> bool {
        self.active.insert(signal)
    }

    /// Returns true when the signal was active.
    pub fn clear(&mut self, signal: SyncSignal) -> bool {
        self.active.remove(&signal)
    }

    pub fn is_active(&self, signal: SyncSignal) -> bool {
        self.active.contains(&signal)
    }

    pub fn active(&self) -> Vec<SyncSignal> {
        self.active.iter().copied().collect()
    }
}
