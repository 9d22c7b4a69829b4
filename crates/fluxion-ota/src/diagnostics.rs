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

//! Diagnostics ledger
//!
//! Durable record of the last update attempt, its result and the boot history.
//! Every field lives under its own key and is written independently, so a power
//! loss between two writes can leave fields from different moments.
//!
//! The ledger is best-effort: storage failures are logged and swallowed.

use crate::error::{ErrorCode, ROLLBACK_SENTINEL, short_code};
use crate::partition::PartitionService;
use crate::store::{KeyValueStore, StoredValue};
use crate::telemetry::{LifecycleEvent, report_event};
use serde::Serialize;

const KEY_LAST_STATUS: &str = "last_status";
const KEY_LAST_ERROR: &str = "last_error";
const KEY_ATTEMPT_VERSION: &str = "attempt_ver";
const KEY_INSTALLED_VERSION: &str = "installed_ver";
const KEY_ROLLBACK_SEEN: &str = "rollback_seen";
const KEY_BOOT_COUNT: &str = "boot_count";

const ALL_KEYS: [&str; 6] = [
    KEY_LAST_STATUS,
    KEY_LAST_ERROR,
    KEY_ATTEMPT_VERSION,
    KEY_INSTALLED_VERSION,
    KEY_ROLLBACK_SEEN,
    KEY_BOOT_COUNT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DiagStatus {
    #[default]
    Unknown,
    NoUpdate,
    Success,
    Failed,
}

impl DiagStatus {
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::NoUpdate => 1,
            Self::Success => 2,
            Self::Failed => 3,
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::NoUpdate,
            2 => Self::Success,
            3 => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::NoUpdate => "NO_UPDATE",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DiagnosticsRecord {
    pub last_status: DiagStatus,
    /// Raw [`ErrorCode`] value; the rollback sentinel is `0xFFFF`
    pub last_error_code: u32,
    pub last_attempt_version: String,
    pub last_installed_version: String,
    pub rollback_seen: bool,
    pub boot_count: u32,
}

impl DiagnosticsRecord {
    pub fn error_short_code(&self) -> &'static str {
        short_code(self.last_error_code)
    }
}

/// What the boot check found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootReport {
    pub boot_count: u32,
    pub rollback_detected: bool,
    /// The running image was pending verification and is now confirmed
    pub confirmed: bool,
}

pub struct DiagnosticsLedger {
    store: Box<dyn KeyValueStore>,
}

impl std::fmt::Debug for DiagnosticsLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsLedger").finish_non_exhaustive()
    }
}

impl DiagnosticsLedger {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn set(&self, key: &str, value: StoredValue) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!("Diagnostics write of {key} failed: {e}");
        }
    }

    fn get(&self, key: &str) -> Option<StoredValue> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Diagnostics read of {key} failed: {e}");
                None
            }
        }
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            StoredValue::U32(v) => Some(v),
            StoredValue::U8(v) => Some(u32::from(v)),
            StoredValue::Str(_) => None,
        }
    }

    /// Runs once per boot, before anything else touches the ledger.
    ///
    /// Counts the boot, records a platform rollback, and confirms a running image that
    /// still awaits verification.
    pub fn boot_check_and_update(
        &self,
        partitions: &dyn PartitionService,
        running_version: &str,
    ) -> BootReport {
        let boot_count = self.get_u32(KEY_BOOT_COUNT).unwrap_or(0).saturating_add(1);
        self.set(KEY_BOOT_COUNT, StoredValue::U32(boot_count));

        let mut report = BootReport {
            boot_count,
            ..BootReport::default()
        };

        if partitions.last_rollback_occurred() {
            tracing::warn!("Rollback detected: a previous candidate image was reverted");
            self.set(KEY_ROLLBACK_SEEN, StoredValue::U8(1));
            self.set(
                KEY_LAST_STATUS,
                StoredValue::U8(DiagStatus::Failed.as_raw()),
            );
            self.set(KEY_LAST_ERROR, StoredValue::U32(ROLLBACK_SENTINEL));
            report.rollback_detected = true;
            report_event(&LifecycleEvent::RollbackDetected {
                running_version: running_version.to_owned(),
            });
        }

        if partitions.is_pending_verify() {
            tracing::info!("Image {running_version} pending verify, confirming");
            match partitions.confirm_valid() {
                Ok(()) => {
                    self.record_result(
                        DiagStatus::Success,
                        ErrorCode::None,
                        None,
                        Some(running_version),
                    );
                    report.confirmed = true;
                    report_event(&LifecycleEvent::ImageConfirmed {
                        version: running_version.to_owned(),
                    });
                }
                Err(e) => tracing::error!("Failed to confirm running image: {e}"),
            }
        }

        tracing::debug!("Boot check: {report:?}");
        report
    }

    /// A new attempt supersedes any earlier rollback marker
    pub fn record_attempt(&self, attempt_version: &str) {
        self.set(
            KEY_ATTEMPT_VERSION,
            StoredValue::Str(attempt_version.to_owned()),
        );
        self.set(KEY_ROLLBACK_SEEN, StoredValue::U8(0));
    }

    /// Writes status and error, plus whichever versions are given
    pub fn record_result(
        &self,
        status: DiagStatus,
        error: ErrorCode,
        attempt_version: Option<&str>,
        installed_version: Option<&str>,
    ) {
        self.set(KEY_LAST_STATUS, StoredValue::U8(status.as_raw()));
        self.set(KEY_LAST_ERROR, StoredValue::U32(error.as_raw()));
        if let Some(version) = attempt_version {
            self.set(KEY_ATTEMPT_VERSION, StoredValue::Str(version.to_owned()));
        }
        if let Some(version) = installed_version {
            self.set(KEY_INSTALLED_VERSION, StoredValue::Str(version.to_owned()));
        }
    }

    /// The persisted record, or `None` when the store is unreadable or was never written
    pub fn get_last(&self) -> Option<DiagnosticsRecord> {
        let mut record = DiagnosticsRecord::default();
        let mut found = false;

        for key in ALL_KEYS {
            let value = match self.store.get(key) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Diagnostics unavailable: {e}");
                    return None;
                }
            };
            found = true;

            match (key, value) {
                (KEY_LAST_STATUS, StoredValue::U8(v)) => record.last_status = DiagStatus::from_raw(v),
                (KEY_LAST_ERROR, StoredValue::U32(v)) => record.last_error_code = v,
                (KEY_ATTEMPT_VERSION, StoredValue::Str(v)) => record.last_attempt_version = v,
                (KEY_INSTALLED_VERSION, StoredValue::Str(v)) => record.last_installed_version = v,
                (KEY_ROLLBACK_SEEN, StoredValue::U8(v)) => record.rollback_seen = v != 0,
                (KEY_BOOT_COUNT, StoredValue::U32(v)) => record.boot_count = v,
                (key, value) => tracing::warn!("Ignoring unexpected diagnostics value {key}={value:?}"),
            }
        }

        found.then_some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PartitionError, StorageError};
    use crate::partition::SlotTransaction;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Platform view: only the boot-time queries matter here
    #[derive(Default)]
    struct BootPlatform {
        rolled_back: bool,
        pending: AtomicBool,
        confirm_fails: bool,
        confirm_calls: AtomicU32,
    }

    #[async_trait]
    impl PartitionService for BootPlatform {
        async fn begin_write(&self, size: u64) -> Result<SlotTransaction, PartitionError> {
            Err(PartitionError::TooLarge {
                requested: size,
                capacity: 0,
            })
        }

        async fn write(&self, tx: &SlotTransaction, _chunk: &[u8]) -> Result<(), PartitionError> {
            Err(PartitionError::UnknownTransaction(tx.id()))
        }

        async fn end(&self, tx: &SlotTransaction) -> Result<(), PartitionError> {
            Err(PartitionError::UnknownTransaction(tx.id()))
        }

        async fn abort(&self, _tx: SlotTransaction) {}

        async fn set_boot_slot(&self, tx: SlotTransaction) -> Result<(), PartitionError> {
            Err(PartitionError::UnknownTransaction(tx.id()))
        }

        fn is_pending_verify(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }

        fn confirm_valid(&self) -> Result<(), PartitionError> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            if self.confirm_fails {
                return Err(PartitionError::BootState("flash busy".to_owned()));
            }
            self.pending.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn last_rollback_occurred(&self) -> bool {
            self.rolled_back
        }
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<StoredValue>, StorageError> {
            Err(StorageError::Corrupt("bad page".to_owned()))
        }

        fn set(&self, _key: &str, _value: StoredValue) -> Result<(), StorageError> {
            Err(StorageError::Corrupt("bad page".to_owned()))
        }
    }

    fn ledger() -> DiagnosticsLedger {
        DiagnosticsLedger::new(Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_empty_ledger_has_no_record() {
        assert!(ledger().get_last().is_none());
    }

    #[test]
    fn test_boot_count_increments() {
        let ledger = ledger();
        let platform = BootPlatform::default();

        assert_eq!(ledger.boot_check_and_update(&platform, "1.0.0").boot_count, 1);
        assert_eq!(ledger.boot_check_and_update(&platform, "1.0.0").boot_count, 2);

        let record = ledger.get_last().unwrap();
        assert_eq!(record.boot_count, 2);
        assert_eq!(record.last_status, DiagStatus::Unknown);
    }

    #[test]
    fn test_rollback_detection() {
        let ledger = ledger();
        ledger.record_result(DiagStatus::Success, ErrorCode::None, None, Some("1.0.0"));
        let platform = BootPlatform {
            rolled_back: true,
            ..Default::default()
        };

        let report = ledger.boot_check_and_update(&platform, "1.0.0");
        assert!(report.rollback_detected);
        assert!(!report.confirmed);

        let record = ledger.get_last().unwrap();
        assert!(record.rollback_seen);
        assert_eq!(record.last_status, DiagStatus::Failed);
        assert_eq!(record.last_error_code, ROLLBACK_SENTINEL);
        assert_eq!(record.error_short_code(), "ROLLBACK");
        // Untouched by the rollback
        assert_eq!(record.last_installed_version, "1.0.0");
    }

    #[test]
    fn test_pending_image_confirmed_once() {
        let ledger = ledger();
        ledger.record_attempt("1.1.0");
        let platform = BootPlatform {
            pending: AtomicBool::new(true),
            ..Default::default()
        };

        let report = ledger.boot_check_and_update(&platform, "1.1.0");
        assert!(report.confirmed);
        let first = ledger.get_last().unwrap();
        assert_eq!(first.last_status, DiagStatus::Success);
        assert_eq!(first.last_error_code, 0);
        assert_eq!(first.last_installed_version, "1.1.0");
        assert_eq!(first.last_attempt_version, "1.1.0");

        let report = ledger.boot_check_and_update(&platform, "1.1.0");
        assert!(!report.confirmed);
        assert_eq!(platform.confirm_calls.load(Ordering::SeqCst), 1);

        let second = ledger.get_last().unwrap();
        assert_eq!(
            second,
            DiagnosticsRecord {
                boot_count: first.boot_count + 1,
                ..first
            }
        );
    }

    #[test]
    fn test_failed_confirmation_records_nothing() {
        let ledger = ledger();
        let platform = BootPlatform {
            pending: AtomicBool::new(true),
            confirm_fails: true,
            ..Default::default()
        };

        let report = ledger.boot_check_and_update(&platform, "1.1.0");
        assert!(!report.confirmed);
        let record = ledger.get_last().unwrap();
        assert_eq!(record.last_status, DiagStatus::Unknown);
        assert!(record.last_installed_version.is_empty());
    }

    #[test]
    fn test_attempt_clears_rollback_flag() {
        let ledger = ledger();
        let platform = BootPlatform {
            rolled_back: true,
            ..Default::default()
        };
        ledger.boot_check_and_update(&platform, "1.0.0");
        assert!(ledger.get_last().unwrap().rollback_seen);

        ledger.record_attempt("1.2.0");
        let record = ledger.get_last().unwrap();
        assert!(!record.rollback_seen);
        assert_eq!(record.last_attempt_version, "1.2.0");
        // Status of the previous outcome is kept until the new result arrives
        assert_eq!(record.last_status, DiagStatus::Failed);
    }

    #[test]
    fn test_record_result_writes_only_given_versions() {
        let ledger = ledger();
        ledger.record_result(DiagStatus::Success, ErrorCode::None, Some("2.0.0"), Some("2.0.0"));
        ledger.record_result(DiagStatus::Failed, ErrorCode::Sha256Mismatch, Some("2.1.0"), None);

        let record = ledger.get_last().unwrap();
        assert_eq!(record.last_status, DiagStatus::Failed);
        assert_eq!(record.last_error_code, 7);
        assert_eq!(record.error_short_code(), "SHA");
        assert_eq!(record.last_attempt_version, "2.1.0");
        assert_eq!(record.last_installed_version, "2.0.0");
    }

    #[test]
    fn test_broken_storage_is_tolerated() {
        let ledger = DiagnosticsLedger::new(Box::new(BrokenStore));
        let platform = BootPlatform {
            rolled_back: true,
            pending: AtomicBool::new(true),
            ..Default::default()
        };

        let report = ledger.boot_check_and_update(&platform, "1.0.0");
        assert_eq!(report.boot_count, 1);
        assert!(report.confirmed);
        ledger.record_attempt("1.1.0");
        ledger.record_result(DiagStatus::Failed, ErrorCode::HttpRead, None, None);
        assert!(ledger.get_last().is_none());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(DiagStatus::from_raw(2).as_str(), "SUCCESS");
        assert_eq!(DiagStatus::from_raw(9), DiagStatus::Unknown);
        for status in [
            DiagStatus::Unknown,
            DiagStatus::NoUpdate,
            DiagStatus::Success,
            DiagStatus::Failed,
        ] {
            assert_eq!(DiagStatus::from_raw(status.as_raw()), status);
        }
    }
}
