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

//! Secure transport used for the manifest and the firmware stream

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

const USER_AGENT: &str = concat!("fluxion-ota/", env!("CARGO_PKG_VERSION"));

/// Request/response transport over TLS
#[async_trait]
pub trait SecureTransport: Send + Sync {
    /// Fetch a small text document of at most `max_bytes`. Non-success statuses are
    /// errors, and reading stops as soon as the body outgrows the bound.
    async fn fetch_text(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// Open a streaming download. Non-success statuses are errors.
    async fn open_stream(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn FirmwareStream>, TransportError>;
}

/// An open download. Dropping it closes the connection.
#[async_trait]
pub trait FirmwareStream: Send {
    /// Next chunk of at most `max_len` bytes, or `None` at end of stream
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, TransportError>;
}

/// HTTPS transport backed by reqwest with rustls
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn request_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(e.to_string())
    }
}

fn body_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Body(e.to_string())
    }
}

#[async_trait]
impl SecureTransport for HttpTransport {
    async fn fetch_text(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let too_large = TransportError::TooLarge { limit: max_bytes };
        if let Some(length) = response.content_length()
            && !usize::try_from(length).is_ok_and(|length| length <= max_bytes)
        {
            tracing::warn!("{url} announces {length} bytes, limit is {max_bytes}");
            return Err(too_large);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| body_error(&e))? {
            if body.len() + chunk.len() > max_bytes {
                tracing::warn!("{url} sent more than {max_bytes} bytes");
                return Err(too_large);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn open_stream(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn FirmwareStream>, TransportError> {
        // The timeout bounds each wait, not the whole download
        let response = tokio::time::timeout(timeout, self.client.get(url).send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| request_error(&e))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        tracing::debug!(
            "Opened firmware stream {url} (content-length: {:?})",
            response.content_length()
        );

        Ok(Box::new(HttpStream {
            response,
            pending: Vec::new(),
            offset: 0,
            timeout,
        }))
    }
}

struct HttpStream {
    response: reqwest::Response,
    pending: Vec<u8>,
    offset: usize,
    timeout: Duration,
}

#[async_trait]
impl FirmwareStream for HttpStream {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, TransportError> {
        while self.offset >= self.pending.len() {
            let next = tokio::time::timeout(self.timeout, self.response.chunk())
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| body_error(&e))?;

            match next {
                Some(bytes) => {
                    self.pending = bytes.to_vec();
                    self.offset = 0;
                }
                None => return Ok(None),
            }
        }

        let end = self.pending.len().min(self.offset + max_len.max(1));
        let chunk = self.pending[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}
