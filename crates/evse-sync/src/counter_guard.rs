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

//! Monotonic filter for cumulative energy counters.
//!
//! The cloud occasionally reports a lifetime counter as zero or some small value for a few
//! polls, and genuinely resets it when a charger is replaced or re-commissioned. The guard
//! holds the last accepted value through glitches and only follows a drop once the lower
//! value has been seen twice or has persisted for [`RESET_CONFIRM_WINDOW`].

use evse_cloud::decode::round3;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Drops at or below this are treated as rounding noise.
pub const NOISE_TOLERANCE_KWH: f64 = 0.02;
/// Minimum drop considered for a reset.
pub const RESET_MIN_DROP_KWH: f64 = 0.5;
/// Samples at or below this floor qualify as a reset regardless of ratio.
pub const RESET_FLOOR_KWH: f64 = 5.0;
pub const RESET_RATIO: f64 = 0.5;
/// Two reset samples within this distance are the same candidate.
pub const CANDIDATE_TOLERANCE_KWH: f64 = 0.05;
pub const RESET_CONFIRM_COUNT: u32 = 2;
pub const RESET_CONFIRM_WINDOW: Duration = Duration::from_secs(180);

/// Result of feeding one sample through the guard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardOutcome {
    /// Value to publish
    pub value: Option<f64>,
    /// A fresh reset candidate appeared; cached copies of the old value are stale
    pub new_candidate: bool,
    /// The sample confirmed a reset and was accepted below the previous value
    pub reset_confirmed: bool,
}

impl GuardOutcome {
    fn hold(value: Option<f64>) -> Self {
        Self {
            value,
            new_candidate: false,
            reset_confirmed: false,
        }
    }
}

/// Memory for a single counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterGuardState {
    pub last: Option<f64>,
    pub pending_value: Option<f64>,
    pub pending_count: u32,
    pub pending_since: Option<Instant>,
}

impl CounterGuardState {
    pub fn apply(&mut self, sample: Option<f64>, now: Instant) -> GuardOutcome {
        let Some(sample) = sample.filter(|s| s.is_finite() && *s >= 0.0).map(round3) else {
            return GuardOutcome::hold(self.last);
        };

        let Some(last) = self.last else {
            self.accept(sample);
            return GuardOutcome::hold(Some(sample));
        };

        if sample >= last {
            self.accept(sample);
            return GuardOutcome::hold(Some(sample));
        }

        let drop = last - sample;
        if drop <= NOISE_TOLERANCE_KWH {
            self.clear_pending();
            return GuardOutcome::hold(Some(last));
        }

        let looks_like_reset =
            drop >= RESET_MIN_DROP_KWH && (sample <= RESET_FLOOR_KWH || sample <= last * RESET_RATIO);
        if !looks_like_reset {
            self.clear_pending();
            return GuardOutcome::hold(Some(last));
        }

        let mut new_candidate = false;
        let matches_pending = self
            .pending_value
            .is_some_and(|pending| (pending - sample).abs() <= CANDIDATE_TOLERANCE_KWH);
        if matches_pending {
            self.pending_count += 1;
        } else {
            self.pending_value = Some(sample);
            self.pending_count = 1;
            self.pending_since = Some(now);
            new_candidate = true;
        }

        let sustained = self
            .pending_since
            .is_some_and(|since| now.saturating_duration_since(since) >= RESET_CONFIRM_WINDOW);
        if self.pending_count >= RESET_CONFIRM_COUNT || sustained {
            self.accept(sample);
            return GuardOutcome {
                value: Some(sample),
                new_candidate,
                reset_confirmed: true,
            };
        }

        GuardOutcome {
            value: Some(last),
            new_candidate,
            reset_confirmed: false,
        }
    }

    fn accept(&mut self, value: f64) {
        self.last = Some(value);
        self.clear_pending();
    }

    fn clear_pending(&mut self) {
        self.pending_value = None;
        self.pending_count = 0;
        self.pending_since = None;
    }
}

/// Guards keyed by device serial or site flow name.
#[derive(Debug, Default)]
pub struct CounterGuard {
    states: HashMap<String, CounterGuardState>,
}

impl CounterGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: &str, sample: Option<f64>, now: Instant) -> GuardOutcome {
        self.states
            .entry(key.to_owned())
            .or_default()
            .apply(sample, now)
    }

    pub fn last(&self, key: &str) -> Option<f64> {
        self.states.get(key).and_then(|state| state.last)
    }

    pub fn state(&self, key: &str) -> Option<&CounterGuardState> {
        self.states.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(samples: &[Option<f64>]) -> Vec<Option<f64>> {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        samples.iter().map(|s| state.apply(*s, now).value).collect()
    }

    #[test]
    fn test_lifetime_reset_confirmed_by_second_zero() {
        assert_eq!(
            feed(&[Some(320.59), Some(0.0), Some(0.0)]),
            vec![Some(320.59), Some(320.59), Some(0.0)]
        );
    }

    #[test]
    fn test_first_sample_accepted() {
        let mut state = CounterGuardState::default();
        let outcome = state.apply(Some(12.3456), Instant::now());
        assert_eq!(outcome.value, Some(12.346));
        assert_eq!(state.last, Some(12.346));
    }

    #[test]
    fn test_invalid_samples_return_last() {
        assert_eq!(
            feed(&[Some(10.0), None, Some(-1.0), Some(f64::NAN)]),
            vec![Some(10.0), Some(10.0), Some(10.0), Some(10.0)]
        );
        assert_eq!(feed(&[None]), vec![None]);
    }

    #[test]
    fn test_small_drop_is_noise() {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        state.apply(Some(100.0), now);
        let outcome = state.apply(Some(99.99), now);
        assert_eq!(outcome.value, Some(100.0));
        assert_eq!(state.pending_count, 0);
        assert_eq!(state.last, Some(100.0));
    }

    #[test]
    fn test_moderate_drop_is_backward_jitter() {
        // 80 is neither below the floor nor below half of 100
        assert_eq!(
            feed(&[Some(100.0), Some(80.0), Some(80.0), Some(101.0)]),
            vec![Some(100.0), Some(100.0), Some(100.0), Some(101.0)]
        );
    }

    #[test]
    fn test_candidate_flags_cache_invalidation_once() {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        state.apply(Some(500.0), now);

        let first = state.apply(Some(1.0), now);
        assert!(first.new_candidate);
        assert!(!first.reset_confirmed);

        let second = state.apply(Some(1.03), now);
        assert!(!second.new_candidate);
        assert!(second.reset_confirmed);
        assert_eq!(second.value, Some(1.03));
    }

    #[test]
    fn test_mismatched_candidate_restarts_count() {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        state.apply(Some(500.0), now);
        state.apply(Some(1.0), now);

        let outcome = state.apply(Some(3.0), now);
        assert!(outcome.new_candidate);
        assert_eq!(outcome.value, Some(500.0));
        assert_eq!(state.pending_value, Some(3.0));
        assert_eq!(state.pending_count, 1);
    }

    #[test]
    fn test_pending_candidate_dropped_by_recovery() {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        state.apply(Some(500.0), now);
        state.apply(Some(0.0), now);
        assert_eq!(state.apply(Some(500.5), now).value, Some(500.5));
        assert!(state.pending_value.is_none());

        // A later zero starts over instead of confirming the old candidate
        let outcome = state.apply(Some(0.0), now + RESET_CONFIRM_WINDOW);
        assert!(outcome.new_candidate);
        assert_eq!(outcome.value, Some(500.5));
    }

    #[test]
    fn test_returned_value_never_decreases_without_confirmation() {
        let now = Instant::now();
        let mut state = CounterGuardState::default();
        let samples = [
            10.0, 10.5, 0.0, 10.6, 3.0, 10.4, 11.0, 4.0, 2.0, 11.2, 10.9, 12.0,
        ];
        let mut previous = f64::MIN;
        for sample in samples {
            let outcome = state.apply(Some(sample), now);
            let value = outcome.value.unwrap();
            if !outcome.reset_confirmed {
                assert!(value >= previous, "{value} dropped below {previous}");
            }
            previous = value;
        }
    }

    #[test]
    fn test_guard_keys_are_independent() {
        let now = Instant::now();
        let mut guard = CounterGuard::new();
        guard.apply("EV1", Some(50.0), now);
        guard.apply("production", Some(9000.0), now);
        assert_eq!(guard.apply("EV1", Some(0.0), now).value, Some(50.0));
        assert_eq!(guard.last("production"), Some(9000.0));
        assert_eq!(guard.state("EV1").unwrap().pending_count, 1);
        assert!(guard.last("EV2").is_none());
    }
}
