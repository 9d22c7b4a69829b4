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

//! Update manifest fetching and parsing
//!
//! The manifest is a small JSON document:
//!
//! ```json
//! {"version": "1.4.0", "url": "https://...", "sha256": "<64 hex>", "size": 123456,
//!  "release_notes": "optional"}
//! ```
//!
//! Fields are picked out with a tolerant extractor instead of a full JSON parser:
//! order does not matter and unknown fields are ignored.

use crate::error::{TransportError, UpdateError};
use crate::transport::SecureTransport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Descriptor of the candidate firmware image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub url: String,
    /// Hex digest of the payload, exactly 64 characters
    pub sha256: String,
    pub size_bytes: u64,
    pub release_notes: Option<String>,
}

/// Parse a manifest document
pub fn parse_manifest(text: &str) -> Result<Manifest, UpdateError> {
    let missing = |field: &str| UpdateError::ManifestParse(format!("missing or invalid field: {field}"));

    let version = extract_string(text, "version")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| missing("version"))?;
    let url = extract_string(text, "url")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| missing("url"))?;
    let sha256 = extract_string(text, "sha256").ok_or_else(|| missing("sha256"))?;
    let size_bytes = extract_u64(text, "size").ok_or_else(|| missing("size"))?;
    let release_notes = extract_string(text, "release_notes");

    if sha256.len() != SHA256_HEX_LEN || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(UpdateError::ManifestParse(format!(
            "sha256 must be {SHA256_HEX_LEN} hex characters, got {} characters",
            sha256.chars().count()
        )));
    }

    Ok(Manifest {
        version,
        url,
        sha256,
        size_bytes,
        release_notes,
    })
}

/// Text following `"key"` and its colon, with leading whitespace removed.
/// Occurrences of `"key"` that are not followed by a colon (string values) are skipped.
fn find_value<'a>(json: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("\"{key}\"");
    json.match_indices(&pattern).find_map(|(idx, _)| {
        json.get(idx + pattern.len()..)?
            .trim_start()
            .strip_prefix(':')
            .map(str::trim_start)
    })
}

fn extract_string(json: &str, key: &str) -> Option<String> {
    let value = find_value(json, key)?.strip_prefix('"')?;

    let mut out = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                other => out.push(other),
            },
            other => out.push(other),
        }
    }

    // Unterminated string
    None
}

fn extract_u64(json: &str, key: &str) -> Option<u64> {
    let value = find_value(json, key)?;
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    value.get(..digits)?.parse().ok()
}

/// Fetches the manifest from a fixed location
pub struct ManifestResolver {
    transport: Arc<dyn SecureTransport>,
    url: String,
    timeout: Duration,
    max_bytes: usize,
}

impl std::fmt::Debug for ManifestResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestResolver")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl ManifestResolver {
    pub fn new(
        transport: Arc<dyn SecureTransport>,
        url: impl Into<String>,
        timeout: Duration,
        max_bytes: usize,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout,
            max_bytes,
        }
    }

    /// Fetch and parse the manifest. No retries; that is up to the caller.
    pub async fn fetch(&self) -> Result<Manifest, UpdateError> {
        let body = self
            .transport
            .fetch_text(&self.url, self.timeout, self.max_bytes)
            .await
            .map_err(|e| {
                tracing::error!("Manifest fetch from {} failed: {e}", self.url);
                match e {
                    TransportError::TooLarge { limit } => {
                        UpdateError::ManifestFetch(format!("manifest larger than {limit} bytes"))
                    }
                    other => UpdateError::ManifestFetch(other.to_string()),
                }
            })?;

        let text = String::from_utf8_lossy(&body);
        let manifest = parse_manifest(&text).inspect_err(|e| {
            tracing::error!("Manifest parse failed: {e}");
        })?;

        tracing::info!(
            "Manifest: version={} size={} url={}",
            manifest.version,
            manifest.size_bytes,
            manifest.url
        );
        Ok(manifest)
    }
}
