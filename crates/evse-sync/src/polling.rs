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

use std::time::Duration;
use tokio::time::Instant;

/// Inputs of the cadence decision. Rebuilt every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingState {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
    pub any_charging: bool,
    pub streaming: bool,
    pub fast_while_streaming: bool,
    pub fast_until: Option<Instant>,
}

impl PollingState {
    pub fn is_fast(&self, now: Instant) -> bool {
        self.any_charging
            || self.fast_until.is_some_and(|until| now < until)
            || (self.streaming && self.fast_while_streaming)
    }

    pub fn interval(&self, now: Instant) -> Duration {
        if self.is_fast(now) {
            self.fast_interval
        } else {
            self.slow_interval
        }
    }
}
