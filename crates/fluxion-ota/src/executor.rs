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

//! Update executor: download, verify and commit a firmware image
//!
//! One execution runs as its own tokio task. The firmware is hashed while it is
//! streamed into the candidate slot, and the boot pointer moves only after the
//! size and the SHA-256 digest both match the manifest. Every failure aborts the
//! slot transaction, writes one diagnostics result and ends the task.

use crate::config::UpdaterConfig;
use crate::diagnostics::{DiagStatus, DiagnosticsLedger};
use crate::error::{ErrorCode, UpdateError};
use crate::info::{InfoHandle, UpdateInfo, UpdateStatus};
use crate::manifest::{Manifest, ManifestResolver};
use crate::partition::{PartitionService, SlotTransaction};
use crate::telemetry::{LifecycleEvent, report_event};
use crate::transport::{FirmwareStream, SecureTransport};
use crate::version::is_newer;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Device-level controls used by the executor
pub trait SystemControl: Send + Sync {
    /// Version of the running image
    fn running_version(&self) -> String;

    /// Reboot into whatever the boot pointer names
    fn restart(&self);
}

/// What the session state machine needs from an executor
pub trait UpdateRunner: Send + Sync {
    fn start(&self);
    fn get_info(&self) -> UpdateInfo;
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub chunk_size: usize,
    pub http_timeout: Duration,
    pub reboot_delay: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            http_timeout: config.http_timeout(),
            reboot_delay: config.reboot_delay(),
        }
    }
}

struct Pipeline {
    resolver: ManifestResolver,
    transport: Arc<dyn SecureTransport>,
    partitions: Arc<dyn PartitionService>,
    system: Arc<dyn SystemControl>,
    ledger: Arc<DiagnosticsLedger>,
    settings: ExecutorSettings,
    info: InfoHandle,
}

pub struct UpdateExecutor {
    pipeline: Arc<Pipeline>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UpdateExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateExecutor")
            .field("settings", &self.pipeline.settings)
            .field("info", &self.pipeline.info.snapshot())
            .finish_non_exhaustive()
    }
}

impl UpdateExecutor {
    pub fn new(
        resolver: ManifestResolver,
        transport: Arc<dyn SecureTransport>,
        partitions: Arc<dyn PartitionService>,
        system: Arc<dyn SystemControl>,
        ledger: Arc<DiagnosticsLedger>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                resolver,
                transport,
                partitions,
                system,
                ledger,
                settings,
                info: InfoHandle::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Launch one execution. A no-op while another one is still running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!("Update already running");
            return;
        }

        // Published before the task exists so no poll sees the previous outcome
        self.pipeline.info.replace(UpdateInfo {
            status: UpdateStatus::Running,
            current_version: self.pipeline.system.running_version(),
            ..UpdateInfo::default()
        });

        let pipeline = Arc::clone(&self.pipeline);
        *task = Some(tokio::spawn(async move { pipeline.run().await }));
    }

    pub fn get_info(&self) -> UpdateInfo {
        self.pipeline.info.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl UpdateRunner for UpdateExecutor {
    fn start(&self) {
        Self::start(self);
    }

    fn get_info(&self) -> UpdateInfo {
        Self::get_info(self)
    }
}

/// Progress while bytes are still arriving; 100 is reserved for a committed image
#[expect(clippy::integer_division)]
fn streaming_percent(written: u64, declared: u64) -> u8 {
    if declared == 0 {
        return 0;
    }
    let percent = (u128::from(written) * 100 / u128::from(declared)).min(99);
    u8::try_from(percent).unwrap_or(99)
}

impl Pipeline {
    async fn run(&self) {
        let started = Instant::now();
        let current = self.info.snapshot().current_version;

        let manifest = match self.resolver.fetch().await {
            Ok(manifest) => manifest,
            Err(e) => {
                self.fail(&e, &current, None);
                return;
            }
        };

        self.info.publish(|info| {
            info.remote_version = manifest.version.clone();
            info.total_size = manifest.size_bytes;
        });
        self.ledger.record_attempt(&manifest.version);

        if !is_newer(&current, &manifest.version) {
            tracing::info!(
                "No update: manifest version {} is not newer than running {current}",
                manifest.version
            );
            self.info.publish(|info| {
                info.status = UpdateStatus::NoUpdate;
                info.error = ErrorCode::VersionNoUpgrade;
            });
            self.ledger.record_result(
                DiagStatus::NoUpdate,
                ErrorCode::VersionNoUpgrade,
                Some(&manifest.version),
                Some(&current),
            );
            report_event(&LifecycleEvent::NoUpdate {
                running_version: current,
                remote_version: manifest.version,
            });
            return;
        }

        tracing::info!(
            "Updating {current} -> {} ({} bytes)",
            manifest.version,
            manifest.size_bytes
        );
        report_event(&LifecycleEvent::UpdateStarted {
            from_version: current.clone(),
            to_version: manifest.version.clone(),
            size_bytes: manifest.size_bytes,
        });

        if let Err(e) = self.install(&manifest).await {
            self.fail(&e, &current, Some(&manifest.version));
            return;
        }

        self.info.publish(|info| {
            info.status = UpdateStatus::Success;
            info.error = ErrorCode::None;
            info.progress_percent = 100;
        });
        // Persisted before the restart so it survives an immediate reboot
        self.ledger.record_result(
            DiagStatus::Success,
            ErrorCode::None,
            Some(&manifest.version),
            None,
        );
        report_event(&LifecycleEvent::UpdateInstalled {
            from_version: current,
            to_version: manifest.version.clone(),
            duration_secs: started.elapsed().as_secs(),
        });

        tracing::info!("Update to {} committed, restarting", manifest.version);
        tokio::time::sleep(self.settings.reboot_delay).await;
        self.system.restart();
    }

    async fn install(&self, manifest: &Manifest) -> Result<(), UpdateError> {
        let mut stream = self
            .transport
            .open_stream(&manifest.url, self.settings.http_timeout)
            .await
            .map_err(|e| UpdateError::HttpOpen(e.to_string()))?;

        let tx = self
            .partitions
            .begin_write(manifest.size_bytes)
            .await
            .map_err(|e| UpdateError::OtaBegin(e.to_string()))?;

        let streamed = self.stream_into_slot(stream.as_mut(), &tx, manifest).await;
        // Close the connection before touching the slot again
        drop(stream);

        let digest = match streamed {
            Ok(digest) => digest,
            Err(e) => {
                self.partitions.abort(tx).await;
                return Err(e);
            }
        };

        if !digest.eq_ignore_ascii_case(&manifest.sha256) {
            self.partitions.abort(tx).await;
            return Err(UpdateError::Sha256Mismatch {
                expected: manifest.sha256.clone(),
                actual: digest,
            });
        }

        if let Err(e) = self.partitions.end(&tx).await {
            self.partitions.abort(tx).await;
            return Err(UpdateError::OtaEnd(e.to_string()));
        }

        self.partitions
            .set_boot_slot(tx)
            .await
            .map_err(|e| UpdateError::SetBoot(e.to_string()))
    }

    /// Stream the payload into the slot, returning its lowercase hex digest.
    /// The byte count must match the declared size exactly.
    async fn stream_into_slot(
        &self,
        stream: &mut dyn FirmwareStream,
        tx: &SlotTransaction,
        manifest: &Manifest,
    ) -> Result<String, UpdateError> {
        let declared = manifest.size_bytes;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = stream
            .read_chunk(self.settings.chunk_size)
            .await
            .map_err(|e| UpdateError::HttpRead(e.to_string()))?
        {
            let received = written + chunk.len() as u64;
            // Nothing past the declared size reaches the slot
            if received > declared {
                return Err(UpdateError::SizeMismatch {
                    expected: declared,
                    actual: received,
                });
            }

            hasher.update(&chunk);
            self.partitions
                .write(tx, &chunk)
                .await
                .map_err(|e| UpdateError::OtaWrite(e.to_string()))?;

            written = received;
            let percent = streaming_percent(written, declared);
            self.info.publish(|info| {
                info.bytes_written = written;
                info.progress_percent = percent;
            });
        }

        if written != declared {
            return Err(UpdateError::SizeMismatch {
                expected: declared,
                actual: written,
            });
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    fn fail(&self, error: &UpdateError, current: &str, attempt: Option<&str>) {
        let code = error.code();
        tracing::error!("Update failed [{}]: {error}", code.short_code());

        self.info.publish(|info| {
            info.status = UpdateStatus::Failed;
            info.error = code;
            info.last_error_message = error.to_string();
        });
        self.ledger
            .record_result(DiagStatus::Failed, code, attempt, None);
        report_event(&LifecycleEvent::UpdateFailed {
            from_version: current.to_owned(),
            to_version: attempt.map(str::to_owned),
            code: code.short_code().to_owned(),
            error: error.to_string(),
        });
    }
}
