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

//! Collaborators for running the updater as a host service

use crate::executor::SystemControl;
use crate::session::{Connectivity, Display, Provisioning};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// The host network is managed by the OS; the link counts as up once started
#[derive(Debug, Default)]
pub struct HostNetwork {
    started: AtomicBool,
}

impl HostNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connectivity for HostNetwork {
    fn credentials_available(&self) -> bool {
        true
    }

    fn start(&self) {
        tracing::debug!("Host network link in use");
        self.started.store(true, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn has_failed(&self) -> bool {
        false
    }
}

/// Hosts have no credential provisioning; starting it fails immediately
#[derive(Debug, Default)]
pub struct DisabledProvisioning {
    started: AtomicBool,
}

impl Provisioning for DisabledProvisioning {
    fn start(&self) {
        tracing::warn!("Credential provisioning is not available on this host");
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        false
    }

    fn has_failed(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Status lines go to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show_message(&self, text: &str) {
        tracing::info!("[display] {text}");
    }

    fn show_progress(&self, percent: u8, label: &str) {
        tracing::info!("[display] {label} {percent}%");
    }
}

/// Restart is requested through a notification; the process exits and the
/// service manager starts it again from the new slot
#[derive(Debug)]
pub struct HostSystem {
    version: String,
    restart: Arc<Notify>,
}

impl HostSystem {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            restart: Arc::new(Notify::new()),
        }
    }

    pub fn restart_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.restart)
    }
}

impl SystemControl for HostSystem {
    fn running_version(&self) -> String {
        self.version.clone()
    }

    fn restart(&self) {
        tracing::info!("Restart requested");
        // Stores a permit if nobody is waiting yet
        self.restart.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_host_network_connects_after_start() {
        let network = HostNetwork::new();
        assert!(network.credentials_available());
        assert!(!network.is_connected());
        network.start();
        assert!(network.is_connected());
        assert!(!network.has_failed());
    }

    #[test]
    fn test_disabled_provisioning_fails_once_started() {
        let provisioning = DisabledProvisioning::default();
        assert!(!provisioning.has_failed());
        provisioning.start();
        assert!(provisioning.has_failed());
        assert!(!provisioning.is_done());
        provisioning.stop();
        assert!(!provisioning.has_failed());
    }

    #[tokio::test]
    async fn test_restart_is_observed_after_the_fact() {
        let system = HostSystem::new("1.0.0");
        let signal = system.restart_signal();

        system.restart();
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
        assert_eq!(system.running_version(), "1.0.0");
    }
}
