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

pub mod actions;
pub mod api;
pub mod client;
pub mod credentials;
pub mod decode;
pub mod errors;
pub mod headers;

pub use actions::{ActionCandidate, ActionDiagnostic, ActionKind, LevelPreference};
pub use api::{ChargerCloud, CloudHandle, StartRequest};
pub use client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, EvseCloudClient};
pub use credentials::{CredentialSupplier, Credentials};
pub use decode::{ChargerSummary, LifetimeEnergy, SessionHistoryPage, StatusPayload, StatusRecord};
pub use errors::{AuthFailure, CloudError, CloudResult, FailureClass};
