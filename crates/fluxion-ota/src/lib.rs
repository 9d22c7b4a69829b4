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

//! FluxION OTA - Firmware update core
//!
//! Decides whether a newer firmware image exists, streams it into the candidate
//! boot slot while hashing it, and moves the boot pointer only after the image is
//! fully verified. A persistent diagnostics ledger records every outcome and the
//! boot-time rollback and confirmation events.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod host;
pub mod info;
pub mod manifest;
pub mod partition;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod version;

pub use config::UpdaterConfig;
pub use diagnostics::{DiagStatus, DiagnosticsLedger, DiagnosticsRecord};
pub use error::{ErrorCode, UpdateError};
pub use executor::{ExecutorSettings, UpdateExecutor};
pub use info::{UpdateInfo, UpdateStatus};
pub use manifest::{Manifest, ManifestResolver};
pub use session::{SessionMachine, SessionState};
pub use version::{is_newer, parse_version};
