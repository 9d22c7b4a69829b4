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

//! Error types for the OTA crate

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric outcome code of an update session, as persisted in the diagnostics ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    None,
    ManifestFetch,
    ManifestParse,
    VersionNoUpgrade,
    HttpOpen,
    HttpRead,
    SizeMismatch,
    Sha256Mismatch,
    OtaBegin,
    OtaWrite,
    OtaEnd,
    SetBoot,
    /// Written by the boot check only, never by the executor
    Rollback,
}

/// Reserved raw value for [`ErrorCode::Rollback`], outside the executor's range
pub const ROLLBACK_SENTINEL: u32 = 0xFFFF;

impl ErrorCode {
    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::ManifestFetch => 1,
            Self::ManifestParse => 2,
            Self::VersionNoUpgrade => 3,
            Self::HttpOpen => 4,
            Self::HttpRead => 5,
            Self::SizeMismatch => 6,
            Self::Sha256Mismatch => 7,
            Self::OtaBegin => 8,
            Self::OtaWrite => 9,
            Self::OtaEnd => 10,
            Self::SetBoot => 11,
            Self::Rollback => ROLLBACK_SENTINEL,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let code = match raw {
            0 => Self::None,
            1 => Self::ManifestFetch,
            2 => Self::ManifestParse,
            3 => Self::VersionNoUpgrade,
            4 => Self::HttpOpen,
            5 => Self::HttpRead,
            6 => Self::SizeMismatch,
            7 => Self::Sha256Mismatch,
            8 => Self::OtaBegin,
            9 => Self::OtaWrite,
            10 => Self::OtaEnd,
            11 => Self::SetBoot,
            ROLLBACK_SENTINEL => Self::Rollback,
            _ => return None,
        };
        Some(code)
    }

    /// Short code for small displays
    pub fn short_code(self) -> &'static str {
        match self {
            Self::None => "OK",
            Self::ManifestFetch | Self::ManifestParse => "MANIFEST",
            Self::VersionNoUpgrade => "NO_UPG",
            Self::HttpOpen => "HTTP_OPEN",
            Self::HttpRead => "HTTP_READ",
            Self::SizeMismatch => "SIZE",
            Self::Sha256Mismatch => "SHA",
            Self::OtaBegin => "OTA_BEGIN",
            Self::OtaWrite => "OTA_WRITE",
            Self::OtaEnd => "OTA_END",
            Self::SetBoot => "SET_BOOT",
            Self::Rollback => "ROLLBACK",
        }
    }
}

/// Short display code for a raw persisted value; unknown values render as "ERR"
pub fn short_code(raw: u32) -> &'static str {
    ErrorCode::from_raw(raw).map_or("ERR", ErrorCode::short_code)
}

/// Session-terminal failure of the update executor
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),

    #[error("manifest parse failed: {0}")]
    ManifestParse(String),

    #[error("http open failed: {0}")]
    HttpOpen(String),

    #[error("http read failed: {0}")]
    HttpRead(String),

    #[error("size mismatch: manifest declares {expected} bytes, stream delivered {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    Sha256Mismatch { expected: String, actual: String },

    #[error("slot begin failed: {0}")]
    OtaBegin(String),

    #[error("slot write failed: {0}")]
    OtaWrite(String),

    #[error("slot end failed: {0}")]
    OtaEnd(String),

    #[error("set boot slot failed: {0}")]
    SetBoot(String),
}

impl UpdateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ManifestFetch(_) => ErrorCode::ManifestFetch,
            Self::ManifestParse(_) => ErrorCode::ManifestParse,
            Self::HttpOpen(_) => ErrorCode::HttpOpen,
            Self::HttpRead(_) => ErrorCode::HttpRead,
            Self::SizeMismatch { .. } => ErrorCode::SizeMismatch,
            Self::Sha256Mismatch { .. } => ErrorCode::Sha256Mismatch,
            Self::OtaBegin(_) => ErrorCode::OtaBegin,
            Self::OtaWrite(_) => ErrorCode::OtaWrite,
            Self::OtaEnd(_) => ErrorCode::OtaEnd,
            Self::SetBoot(_) => ErrorCode::SetBoot,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("body read failed: {0}")]
    Body(String),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("image of {requested} bytes does not fit slot capacity of {capacity} bytes")]
    TooLarge { requested: u64, capacity: u64 },

    #[error("write exceeds declared image size of {declared} bytes")]
    Overflow { declared: u64 },

    #[error("transaction {0} is not open")]
    UnknownTransaction(u64),

    #[error("transaction {0} has not been ended")]
    NotEnded(u64),

    #[error("slot i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("boot state error: {0}")]
    BootState(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
