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

use chrono::{DateTime, Utc};
use evse_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Backing off until {until}")]
    BackingOff { until: DateTime<Utc> },

    #[error("Cloud rejected credentials")]
    Unauthorized,

    #[error("Reauthentication required")]
    ReauthRequired,

    #[error("Unknown charger: {0}")]
    UnknownDevice(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

pub type SyncResult<T> = Result<T, SyncError>;
