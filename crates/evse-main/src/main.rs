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

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigCredentialSupplier};
use evse_cloud::{CloudHandle, EvseCloudClient};
use evse_sync::{Coordinator, DEFAULT_CONNECTOR_ID, SyncError};
use evse_types::ChargeMode;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "evse-sync")]
#[command(about = "Keep EV chargers in sync with the vendor cloud", version, long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON); defaults to the add-on options and ./config.*
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poll once and print the snapshot and metrics as JSON
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll until interrupted (default)
    Run,
    /// Start charging on one charger
    Start {
        #[arg(long)]
        serial: String,
        /// Requested current; defaults to the last used or the charger maximum
        #[arg(long)]
        amps: Option<u32>,
        #[arg(long, default_value_t = DEFAULT_CONNECTOR_ID)]
        connector: u32,
    },
    /// Stop charging on one charger
    Stop {
        #[arg(long)]
        serial: String,
    },
    /// Set the scheduler charge mode
    Mode {
        #[arg(long)]
        serial: String,
        /// MANUAL_CHARGING, SCHEDULED_CHARGING or GREEN_CHARGING
        #[arg(long, value_parser = parse_scheduler_mode)]
        mode: ChargeMode,
    },
    /// Ask a charger to send an OCPP message
    Trigger {
        #[arg(long)]
        serial: String,
        /// OCPP message name, e.g. MeterValues or StatusNotification
        #[arg(long)]
        message: String,
    },
}

fn parse_scheduler_mode(value: &str) -> Result<ChargeMode, String> {
    ChargeMode::from_wire(value)
        .filter(|mode| mode.is_scheduler_mode())
        .ok_or_else(|| format!("unsupported charge mode '{value}'"))
}

fn init_tracing(level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

fn build_coordinator(config: &AppConfig, source: Option<PathBuf>) -> Result<Coordinator> {
    let credentials = config.credentials.to_credentials();
    let supplier = Arc::new(ConfigCredentialSupplier::new(source, credentials.clone()));
    let client = EvseCloudClient::new(
        config.site.base_url.clone(),
        config.site.id.trim(),
        credentials,
        config.polling.api_timeout(),
    )
    .context("Failed to create cloud client")?
    .with_credential_supplier(supplier);

    Coordinator::new(
        config.polling.clone(),
        config.site_identity(),
        CloudHandle::new(Arc::new(client)),
    )
    .context("Failed to create coordinator")
}

/// One poll whose failure is logged but does not abort a control command.
async fn prime(coordinator: &mut Coordinator) {
    match coordinator.tick().await {
        Ok(snapshot) => info!(chargers = snapshot.len(), "📊 Initial poll complete"),
        Err(SyncError::BackingOff { until }) => warn!(%until, "⏸️ Cloud backoff active"),
        Err(e) => warn!(error = %e, "⚠️ Initial poll failed"),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render JSON")?
    );
    Ok(())
}

async fn run_until_interrupted(coordinator: &mut Coordinator) {
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.notify_one();
        }
    });

    coordinator.run(shutdown).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.system.log_level)?;

    info!("🚀 Starting FluxION EVSE Sync v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration Summary:");
    info!("   Site: {} ({})", config.site.id, config.site.name.as_deref().unwrap_or("unnamed"));
    info!("   Cloud: {}", config.site.base_url);
    if config.site.serials.is_empty() {
        info!("   Chargers: all");
    } else {
        info!("   Chargers: {}", config.site.serials.join(", "));
    }
    info!(
        "   Polling: fast {}s, slow {}s, timezone {}",
        config.polling.fast_poll_interval_secs,
        config.polling.slow_poll_interval_secs,
        config.polling.timezone
    );

    let mut coordinator = build_coordinator(&config, cli.config.clone())?;

    if cli.once {
        prime(&mut coordinator).await;
        print_json(&json!({
            "chargers": &*coordinator.snapshot(),
            "site_energy": coordinator.site_energy(),
            "metrics": coordinator.metrics(),
        }))?;
        coordinator.shutdown();
        return Ok(());
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_until_interrupted(&mut coordinator).await,
        Command::Start {
            serial,
            amps,
            connector,
        } => {
            prime(&mut coordinator).await;
            let outcome = coordinator
                .start_charging(&serial, amps, connector)
                .await
                .with_context(|| format!("Failed to start charging on {serial}"))?;
            print_json(&json!({ "serial": serial, "outcome": outcome }))?;
        }
        Command::Stop { serial } => {
            prime(&mut coordinator).await;
            let outcome = coordinator
                .stop_charging(&serial)
                .await
                .with_context(|| format!("Failed to stop charging on {serial}"))?;
            print_json(&json!({ "serial": serial, "outcome": outcome }))?;
        }
        Command::Mode { serial, mode } => {
            prime(&mut coordinator).await;
            let outcome = coordinator
                .set_charge_mode(&serial, mode)
                .await
                .with_context(|| format!("Failed to set charge mode on {serial}"))?;
            print_json(&json!({ "serial": serial, "mode": mode, "outcome": outcome }))?;
        }
        Command::Trigger { serial, message } => {
            prime(&mut coordinator).await;
            let reply = coordinator
                .trigger_message(&serial, &message)
                .await
                .with_context(|| format!("Failed to trigger {message} on {serial}"))?;
            print_json(&json!({ "serial": serial, "message": message, "response": reply }))?;
        }
    }

    coordinator.shutdown();
    Ok(())
}
