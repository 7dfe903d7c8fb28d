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

//! Single-shot timers feeding the coordinator loop.

use crate::session_history::DayFetch;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Work delivered to the coordinator outside the regular cadence.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    BackoffElapsed,
    RefreshRequested,
    AutoResumeCooldownElapsed(String),
    /// Results of a background session history refresh
    SessionHistoryFetched(Vec<DayFetch>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    BackoffResume,
    RefreshRequest,
    AutoResumeCooldown(String),
}

/// Pending timer. Dropping it cancels the task.
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn(delay: Duration, tx: UnboundedSender<LoopEvent>, event: LoopEvent) -> Self {
        let due = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            // Receiver gone means the coordinator shut down
            let _ = tx.send(event);
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// At most one pending timer per key; scheduling replaces the previous one.
#[derive(Debug)]
pub(crate) struct TimerSlots<K> {
    slots: HashMap<K, ScheduledTask>,
}

impl<K> Default for TimerSlots<K> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + std::fmt::Debug> TimerSlots<K> {
    pub fn schedule(
        &mut self,
        key: K,
        delay: Duration,
        tx: UnboundedSender<LoopEvent>,
        event: LoopEvent,
    ) {
        trace!(?key, delay_ms = delay.as_millis(), "⏲️ Timer scheduled");
        if let Some(previous) = self.slots.insert(key, ScheduledTask::spawn(delay, tx, event)) {
            previous.cancel();
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.slots.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|task| !task.is_finished()).count()
    }
}
