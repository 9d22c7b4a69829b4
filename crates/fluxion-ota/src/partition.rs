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

//! A/B boot slots
//!
//! One slot is active (running), the other is the candidate for the next image.
//! A freshly written candidate becomes bootable only through [`PartitionService::set_boot_slot`],
//! boots in `PendingVerify`, and must be confirmed by the running image. The platform
//! reverts to the previous slot when a pending image keeps failing to confirm.

use crate::error::PartitionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unconfirmed boots of a pending image before the platform reverts it
pub const MAX_BOOT_ATTEMPTS: u8 = 3;

const BOOT_STATE_FILE: &str = "boot_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::A => "slot_a.bin",
            Self::B => "slot_b.bin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotState {
    #[default]
    Unused,
    /// Booted (or about to boot) but not yet confirmed
    PendingVerify,
    Valid,
    /// Reverted by the platform after failing to confirm
    Invalid,
}

/// An open write against the candidate slot
#[derive(Debug)]
pub struct SlotTransaction {
    id: u64,
    slot: Slot,
    declared_size: u64,
}

impl SlotTransaction {
    pub fn new(id: u64, slot: Slot, declared_size: u64) -> Self {
        Self {
            id,
            slot,
            declared_size,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

/// Boot slot primitives provided by the platform
#[async_trait]
pub trait PartitionService: Send + Sync {
    /// Start writing a fresh image of `size` bytes to the candidate slot
    async fn begin_write(&self, size: u64) -> Result<SlotTransaction, PartitionError>;

    async fn write(&self, tx: &SlotTransaction, chunk: &[u8]) -> Result<(), PartitionError>;

    /// Finish the write; the image is complete but not yet bootable
    async fn end(&self, tx: &SlotTransaction) -> Result<(), PartitionError>;

    /// Discard the transaction; the candidate slot never becomes bootable
    async fn abort(&self, tx: SlotTransaction);

    /// Point the next boot at the transaction's slot
    async fn set_boot_slot(&self, tx: SlotTransaction) -> Result<(), PartitionError>;

    /// Whether the running image still awaits confirmation
    fn is_pending_verify(&self) -> bool;

    /// Confirm the running image and cancel any pending automatic revert
    fn confirm_valid(&self) -> Result<(), PartitionError>;

    /// Whether a candidate was reverted by the platform since the last call
    fn last_rollback_occurred(&self) -> bool;
}

/// Persisted view of both slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootState {
    pub active: Slot,
    /// Slot the next boot will start from
    pub boot: Slot,
    pub slot_a: SlotState,
    pub slot_b: SlotState,
    #[serde(default)]
    pub boot_attempts: u8,
    /// A revert happened and nobody has asked about it yet
    #[serde(default)]
    pub rollback_pending: bool,
}

impl Default for BootState {
    fn default() -> Self {
        Self {
            active: Slot::A,
            boot: Slot::A,
            slot_a: SlotState::Valid,
            slot_b: SlotState::Unused,
            boot_attempts: 0,
            rollback_pending: false,
        }
    }
}

impl BootState {
    pub fn state(&self, slot: Slot) -> SlotState {
        match slot {
            Slot::A => self.slot_a,
            Slot::B => self.slot_b,
        }
    }

    fn set_state(&mut self, slot: Slot, state: SlotState) {
        match slot {
            Slot::A => self.slot_a = state,
            Slot::B => self.slot_b = state,
        }
    }

    /// What a bootloader does on power-up: follow the boot pointer, count unconfirmed
    /// boots of a pending image, and revert it once the attempts run out.
    fn power_on(&mut self) {
        if self.boot != self.active {
            if matches!(
                self.state(self.boot),
                SlotState::PendingVerify | SlotState::Valid
            ) {
                self.active = self.boot;
                self.boot_attempts = 0;
            } else {
                self.boot = self.active;
            }
        }

        if self.state(self.active) != SlotState::PendingVerify {
            return;
        }

        if self.boot_attempts >= MAX_BOOT_ATTEMPTS {
            let failed = self.active;
            tracing::warn!(
                "Slot {failed:?} not confirmed after {} boots, reverting",
                self.boot_attempts
            );
            self.set_state(failed, SlotState::Invalid);
            self.active = failed.other();
            self.boot = self.active;
            self.boot_attempts = 0;
            self.rollback_pending = true;
        } else {
            self.boot_attempts += 1;
        }
    }
}

struct OpenWrite {
    id: u64,
    slot: Slot,
    declared: u64,
    written: u64,
    file: File,
    ended: bool,
}

/// A/B slots stored as files in one directory
pub struct FileSlots {
    dir: PathBuf,
    capacity: u64,
    state: Mutex<BootState>,
    open: Mutex<Option<OpenWrite>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FileSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSlots")
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl FileSlots {
    /// Open the slot directory and run the power-on step
    pub fn open(dir: &Path, capacity: u64) -> Result<Self, PartitionError> {
        fs::create_dir_all(dir)?;

        let state_path = dir.join(BOOT_STATE_FILE);
        let mut state = if state_path.exists() {
            let content = fs::read_to_string(&state_path)?;
            serde_json::from_str(&content)
                .map_err(|e| PartitionError::BootState(format!("Failed to parse boot state: {e}")))?
        } else {
            BootState::default()
        };

        state.power_on();
        persist_state(dir, &state)?;
        tracing::info!(
            "Booted slot {:?} ({:?})",
            state.active,
            state.state(state.active)
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            capacity,
            state: Mutex::new(state),
            open: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn boot_state(&self) -> BootState {
        self.state.lock().clone()
    }

    pub fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    fn part_path(&self, slot: Slot) -> PathBuf {
        self.slot_path(slot).with_extension("part")
    }

    fn update_state(&self, f: impl FnOnce(&mut BootState)) -> Result<(), PartitionError> {
        let mut guard = self.state.lock();
        let mut next = guard.clone();
        f(&mut next);
        persist_state(&self.dir, &next)?;
        *guard = next;
        Ok(())
    }

    fn discard(&self, open: OpenWrite) {
        let part = self.part_path(open.slot);
        drop(open.file);
        if part.exists()
            && let Err(e) = fs::remove_file(&part)
        {
            tracing::warn!("Failed to remove {}: {e}", part.display());
        }
    }
}

fn persist_state(dir: &Path, state: &BootState) -> Result<(), PartitionError> {
    let path = dir.join(BOOT_STATE_FILE);
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| PartitionError::BootState(e.to_string()))?;

    // Atomic write
    let mut file = File::create(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, &path)?;
    Ok(())
}

#[async_trait]
impl PartitionService for FileSlots {
    async fn begin_write(&self, size: u64) -> Result<SlotTransaction, PartitionError> {
        if size > self.capacity {
            return Err(PartitionError::TooLarge {
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut open = self.open.lock();
        if let Some(stale) = open.take() {
            tracing::warn!("Discarding unfinished slot write {}", stale.id);
            self.discard(stale);
        }

        let candidate = self.state.lock().active.other();
        // The candidate's old contents are about to be destroyed
        self.update_state(|state| {
            state.set_state(candidate, SlotState::Unused);
            state.boot = state.active;
        })?;

        let file = File::create(self.part_path(candidate))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *open = Some(OpenWrite {
            id,
            slot: candidate,
            declared: size,
            written: 0,
            file,
            ended: false,
        });

        tracing::debug!("Slot write {id} started on {candidate:?} for {size} bytes");
        Ok(SlotTransaction::new(id, candidate, size))
    }

    async fn write(&self, tx: &SlotTransaction, chunk: &[u8]) -> Result<(), PartitionError> {
        let mut open = self.open.lock();
        let current = open
            .as_mut()
            .filter(|w| w.id == tx.id() && !w.ended)
            .ok_or(PartitionError::UnknownTransaction(tx.id()))?;

        if current.written + chunk.len() as u64 > current.declared {
            return Err(PartitionError::Overflow {
                declared: current.declared,
            });
        }

        current.file.write_all(chunk)?;
        current.written += chunk.len() as u64;
        Ok(())
    }

    async fn end(&self, tx: &SlotTransaction) -> Result<(), PartitionError> {
        let mut open = self.open.lock();
        let current = open
            .as_mut()
            .filter(|w| w.id == tx.id() && !w.ended)
            .ok_or(PartitionError::UnknownTransaction(tx.id()))?;

        current.file.sync_all()?;
        fs::rename(self.part_path(current.slot), self.slot_path(current.slot))?;
        current.ended = true;
        Ok(())
    }

    async fn abort(&self, tx: SlotTransaction) {
        let mut open = self.open.lock();
        if open.as_ref().is_some_and(|w| w.id == tx.id())
            && let Some(current) = open.take()
        {
            tracing::info!("Slot write {} aborted", current.id);
            self.discard(current);
        }
    }

    async fn set_boot_slot(&self, tx: SlotTransaction) -> Result<(), PartitionError> {
        let mut open = self.open.lock();
        match open.as_ref() {
            Some(w) if w.id == tx.id() && w.ended => {}
            Some(w) if w.id == tx.id() => return Err(PartitionError::NotEnded(tx.id())),
            _ => return Err(PartitionError::UnknownTransaction(tx.id())),
        }

        let slot = tx.slot();
        self.update_state(|state| {
            state.set_state(slot, SlotState::PendingVerify);
            state.boot = slot;
        })?;
        *open = None;

        tracing::info!("Next boot set to slot {slot:?}");
        Ok(())
    }

    fn is_pending_verify(&self) -> bool {
        let state = self.state.lock();
        state.state(state.active) == SlotState::PendingVerify
    }

    fn confirm_valid(&self) -> Result<(), PartitionError> {
        if !self.is_pending_verify() {
            return Ok(());
        }
        self.update_state(|state| {
            state.set_state(state.active, SlotState::Valid);
            state.boot_attempts = 0;
        })
    }

    fn last_rollback_occurred(&self) -> bool {
        if !self.state.lock().rollback_pending {
            return false;
        }
        // Reported once; a failed persist means it may be reported again next boot
        if let Err(e) = self.update_state(|state| state.rollback_pending = false) {
            tracing::warn!("Failed to clear rollback marker: {e}");
        }
        true
    }
}
