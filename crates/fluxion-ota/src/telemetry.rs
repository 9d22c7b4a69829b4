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

//! Telemetry module for reporting update lifecycle events

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    UpdateStarted {
        from_version: String,
        to_version: String,
        size_bytes: u64,
    },
    NoUpdate {
        running_version: String,
        remote_version: String,
    },
    UpdateInstalled {
        from_version: String,
        to_version: String,
        duration_secs: u64,
    },
    UpdateFailed {
        from_version: String,
        to_version: Option<String>,
        code: String,
        error: String,
    },
    RollbackDetected {
        running_version: String,
    },
    ImageConfirmed {
        version: String,
    },
}

#[derive(Serialize)]
struct TelemetryLine<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a LifecycleEvent,
}

fn render(event: &LifecycleEvent, timestamp: DateTime<Utc>) -> serde_json::Result<String> {
    serde_json::to_string(&TelemetryLine { timestamp, event })
}

/// Report a lifecycle event as one JSON line.
///
/// Fire-and-forget: a serialization failure is logged and otherwise ignored.
pub fn report_event(event: &LifecycleEvent) {
    match render(event, Utc::now()) {
        Ok(line) => tracing::info!("Telemetry event: {line}"),
        Err(e) => tracing::warn!("Failed to serialize telemetry event: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_update_started_serialization() {
        let event = LifecycleEvent::UpdateStarted {
            from_version: "1.0.0".to_string(),
            to_version: "1.1.0".to_string(),
            size_bytes: 4096,
        };
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let json = render(&event, timestamp).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "UpdateStarted");
        assert_eq!(value["from_version"], "1.0.0");
        assert_eq!(value["to_version"], "1.1.0");
        assert_eq!(value["size_bytes"], 4096);
        assert!(value["timestamp"].as_str().unwrap().starts_with("2025-03-01T12:00:00"));
    }

    #[test]
    fn test_update_failed_serialization() {
        let event = LifecycleEvent::UpdateFailed {
            from_version: "1.0.0".to_string(),
            to_version: None,
            code: "MANIFEST".to_string(),
            error: "manifest fetch failed".to_string(),
        };

        let json = render(&event, Utc::now()).unwrap();
        assert!(json.contains("UpdateFailed"));
        assert!(json.contains("MANIFEST"));
        assert!(json.contains("\"to_version\":null"));
    }

    #[test]
    fn test_rollback_detected_serialization() {
        let event = LifecycleEvent::RollbackDetected {
            running_version: "1.0.0".to_string(),
        };

        let json = render(&event, Utc::now()).unwrap();
        assert!(json.contains("RollbackDetected"));
    }
}
