// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! FluxION OTA - Entry point for the updater service
//!
//! Confirms or records the outcome of the previous update at boot, then runs the
//! update session state machine on a fixed tick until a restart is requested.

use clap::Parser;
use fluxion_ota::config::{DEFAULT_CONFIG_PATH, load_config};
use fluxion_ota::host::{DisabledProvisioning, HostNetwork, HostSystem, LogDisplay};
use fluxion_ota::partition::FileSlots;
use fluxion_ota::session::{Display, announce_last_result};
use fluxion_ota::store::{FileStore, KeyValueStore, MemoryStore};
use fluxion_ota::transport::{HttpTransport, SecureTransport};
use fluxion_ota::{
    DiagnosticsLedger, ExecutorSettings, ManifestResolver, SessionMachine, UpdateExecutor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fluxion-ota", version, about = "Firmware update service")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fluxion_ota=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let running_version = config.running_version();
    info!(
        "Starting FluxION OTA {running_version}: manifest={} auto_update={}",
        config.manifest_url, config.auto_update
    );

    let slots = Arc::new(FileSlots::open(
        &config.slots_dir(),
        config.slot_capacity_bytes,
    )?);

    let store: Box<dyn KeyValueStore> = match FileStore::open(&config.ledger_path()) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("Diagnostics ledger unavailable, keeping it in memory: {e}");
            Box::new(MemoryStore::new())
        }
    };
    let ledger = Arc::new(DiagnosticsLedger::new(store));

    // Before anything else touches the ledger
    ledger.boot_check_and_update(slots.as_ref(), &running_version);

    let display: Arc<dyn Display> = Arc::new(LogDisplay);
    announce_last_result(display.as_ref(), ledger.get_last().as_ref());

    let transport: Arc<dyn SecureTransport> = Arc::new(HttpTransport::new()?);
    let resolver = ManifestResolver::new(
        Arc::clone(&transport),
        config.manifest_url.clone(),
        config.http_timeout(),
        config.max_manifest_bytes,
    );
    let system = Arc::new(HostSystem::new(running_version));
    let restart = system.restart_signal();
    let executor = Arc::new(UpdateExecutor::new(
        resolver,
        transport,
        slots,
        system,
        ledger,
        ExecutorSettings::from_config(&config),
    ));

    let mut session = SessionMachine::new(
        Arc::new(HostNetwork::new()),
        Arc::new(DisabledProvisioning::default()),
        display,
        executor,
    );

    if config.check_on_start {
        session.trigger();
    }

    let mut hangup = signal(SignalKind::hangup())?;
    let mut tick_interval = tokio::time::interval(config.tick_interval());
    let mut check_interval = tokio::time::interval(config.check_interval());
    // The first tick is immediate; start-up checks are governed by check_on_start
    check_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            () = restart.notified() => {
                info!("Restarting into the new image");
                break;
            }
            _ = hangup.recv() => {
                if session.trigger() {
                    info!("Update session triggered by SIGHUP");
                } else {
                    warn!("Update session already in progress");
                }
            }
            _ = tick_interval.tick() => session.tick(),
            _ = check_interval.tick(), if config.auto_update => {
                if !session.trigger() {
                    warn!("Periodic check skipped, session in progress");
                }
            }
        }
    }

    Ok(())
}
