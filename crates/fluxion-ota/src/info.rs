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

//! Session result snapshot shared between the executor and its pollers

use crate::error::ErrorCode;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UpdateStatus {
    #[default]
    Idle,
    Running,
    NoUpdate,
    Success,
    Failed,
}

impl UpdateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NoUpdate | Self::Success | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UpdateInfo {
    pub status: UpdateStatus,
    pub error: ErrorCode,
    /// 0..=100
    pub progress_percent: u8,
    pub bytes_written: u64,
    pub total_size: u64,
    pub current_version: String,
    pub remote_version: String,
    pub last_error_message: String,
}

/// Single-writer, many-reader holder of the latest [`UpdateInfo`].
///
/// Every publish replaces the whole snapshot under the lock, so readers never
/// observe fields from two different updates.
#[derive(Debug, Clone, Default)]
pub struct InfoHandle {
    inner: Arc<RwLock<UpdateInfo>>,
}

impl InfoHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> UpdateInfo {
        self.inner.read().clone()
    }

    /// Derive the next snapshot from the current one and store it in one assignment
    pub fn publish(&self, f: impl FnOnce(&mut UpdateInfo)) -> UpdateInfo {
        let mut guard = self.inner.write();
        let mut next = guard.clone();
        f(&mut next);
        *guard = next.clone();
        next
    }

    pub fn replace(&self, info: UpdateInfo) {
        *self.inner.write() = info;
    }
}
