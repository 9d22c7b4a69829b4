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

//! Update session state machine
//!
//! A cooperative poll loop: [`SessionMachine::tick`] is called on a fixed interval,
//! never blocks, and expresses every wait as "stay in this state until the next tick".
//! The executor runs in its own task and is only observed through its snapshot.

use crate::diagnostics::{DiagStatus, DiagnosticsRecord};
use crate::error::ErrorCode;
use crate::executor::UpdateRunner;
use crate::info::UpdateStatus;
use std::sync::Arc;

const DOWNLOAD_LABEL: &str = "Downloading";

/// Network link collaborator
pub trait Connectivity: Send + Sync {
    fn credentials_available(&self) -> bool;
    fn start(&self);
    fn is_connected(&self) -> bool;
    fn has_failed(&self) -> bool;
}

/// Credential provisioning collaborator
pub trait Provisioning: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_done(&self) -> bool;
    fn has_failed(&self) -> bool;
}

/// Status output for the user
pub trait Display: Send + Sync {
    fn show_message(&self, text: &str);
    fn show_progress(&self, percent: u8, label: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    CheckingConnectivity,
    Provisioning,
    Connecting,
    FetchingAndDownloading,
    Success,
    Failed,
}

impl SessionState {
    /// A new session may only begin from these states
    pub fn accepts_trigger(self) -> bool {
        matches!(self, Self::Idle | Self::Success | Self::Failed)
    }
}

/// Why a session ended in [`SessionState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Provisioning,
    Link,
    Update(ErrorCode),
}

impl FailureReason {
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Provisioning => "PROV",
            Self::Link => "LINK",
            Self::Update(code) => code.short_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionFlags {
    provisioning_started: bool,
    link_started: bool,
    update_started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusLine {
    Message(String),
    Progress(u8, &'static str),
}

pub struct SessionMachine {
    state: SessionState,
    flags: SessionFlags,
    failure: Option<FailureReason>,
    shown: Option<StatusLine>,
    connectivity: Arc<dyn Connectivity>,
    provisioning: Arc<dyn Provisioning>,
    display: Arc<dyn Display>,
    runner: Arc<dyn UpdateRunner>,
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl SessionMachine {
    pub fn new(
        connectivity: Arc<dyn Connectivity>,
        provisioning: Arc<dyn Provisioning>,
        display: Arc<dyn Display>,
        runner: Arc<dyn UpdateRunner>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            flags: SessionFlags::default(),
            failure: None,
            shown: None,
            connectivity,
            provisioning,
            display,
            runner,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Begin a new session. Ignored (returns false) while one is in progress.
    pub fn trigger(&mut self) -> bool {
        if !self.state.accepts_trigger() {
            tracing::debug!("Trigger ignored in state {:?}", self.state);
            return false;
        }

        self.flags = SessionFlags::default();
        self.failure = None;
        self.set_state(SessionState::CheckingConnectivity);
        true
    }

    /// Advance the machine by one step
    pub fn tick(&mut self) {
        match self.state {
            SessionState::Idle => self.flags = SessionFlags::default(),

            SessionState::CheckingConnectivity => {
                self.show_message("Checking network");
                if self.connectivity.credentials_available() {
                    self.set_state(SessionState::Connecting);
                } else {
                    self.set_state(SessionState::Provisioning);
                }
            }

            SessionState::Provisioning => self.poll_provisioning(),

            SessionState::Connecting => {
                self.show_message("Connecting");
                if !self.flags.link_started {
                    self.connectivity.start();
                    self.flags.link_started = true;
                }
                self.set_state(SessionState::FetchingAndDownloading);
            }

            SessionState::FetchingAndDownloading => self.poll_update(),

            // The outcome message stays on screen
            SessionState::Success | SessionState::Failed => {}
        }
    }

    fn poll_provisioning(&mut self) {
        self.show_message("Setup network");
        if !self.flags.provisioning_started {
            self.provisioning.start();
            self.flags.provisioning_started = true;
        }

        if self.provisioning.is_done() {
            self.provisioning.stop();
            self.flags.provisioning_started = false;
            self.set_state(SessionState::Connecting);
        } else if self.provisioning.has_failed() {
            self.provisioning.stop();
            self.flags.provisioning_started = false;
            self.fail(FailureReason::Provisioning);
        }
    }

    fn poll_update(&mut self) {
        if !self.flags.update_started {
            if self.connectivity.is_connected() {
                self.show_progress(0, DOWNLOAD_LABEL);
                self.runner.start();
                self.flags.update_started = true;
            } else if self.connectivity.has_failed() {
                self.show_message("Link failed");
                self.fail(FailureReason::Link);
            } else {
                self.show_message("Waiting for link");
            }
            return;
        }

        let info = self.runner.get_info();
        match info.status {
            UpdateStatus::Running => self.show_progress(info.progress_percent, DOWNLOAD_LABEL),
            UpdateStatus::NoUpdate => {
                self.show_message("No Update");
                self.set_state(SessionState::Success);
            }
            UpdateStatus::Success => {
                // The executor restarts the device
                self.show_message("Update OK");
                self.set_state(SessionState::Success);
            }
            UpdateStatus::Failed => {
                self.show_message(&format!("Fail: {}", info.error.short_code()));
                self.fail(FailureReason::Update(info.error));
            }
            UpdateStatus::Idle => {}
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        tracing::warn!("Update session failed: {}", reason.short_code());
        self.failure = Some(reason);
        self.set_state(SessionState::Failed);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            tracing::info!("Session state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    fn show_message(&mut self, text: &str) {
        self.show(StatusLine::Message(text.to_owned()));
    }

    fn show_progress(&mut self, percent: u8, label: &'static str) {
        self.show(StatusLine::Progress(percent, label));
    }

    /// Only changes reach the display
    fn show(&mut self, line: StatusLine) {
        if self.shown.as_ref() == Some(&line) {
            return;
        }
        match &line {
            StatusLine::Message(text) => self.display.show_message(text),
            StatusLine::Progress(percent, label) => self.display.show_progress(*percent, label),
        }
        self.shown = Some(line);
    }
}

/// Show the outcome of the previous session, e.g. "Last: FAILED" then "Err: SHA"
pub fn announce_last_result(display: &dyn Display, record: Option<&DiagnosticsRecord>) {
    let Some(record) = record else {
        return;
    };

    display.show_message(&format!("Last: {}", record.last_status.as_str()));
    if record.last_status == DiagStatus::Failed {
        display.show_message(&format!("Err: {}", record.error_short_code()));
    }
}
