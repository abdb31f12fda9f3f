/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Network transport seam.
//!
//! Engines talk to channels and peers only through [`Transport`], so tests
//! can substitute an in-memory implementation. [`HttpTransport`] is the
//! production implementation on top of `reqwest`.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::channel::is_anonymity_url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },

    #[error("Download from {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: u64 },

    #[error("{url} is an anonymity-network endpoint but no proxy is configured")]
    NoProxy { url: String },

    #[error("Clearnet request to {url} refused: anonymity-only mode is enabled")]
    ClearnetRefused { url: String },

    #[error("I/O error while writing download: {0}")]
    Io(#[from] std::io::Error),
}

/// Request/response transport used by every engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs a JSON body and decodes a JSON response.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError>;

    /// POSTs a JSON body and streams the raw response body into `dest`.
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, body: &Value, dest: &Path) -> Result<u64, TransportError>;
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub timeout: Duration,
    /// SOCKS proxy for anonymity-network URLs, e.g. `socks5h://127.0.0.1:9050`.
    pub anonymity_proxy: Option<String>,
    /// Refuse every URL that is not an anonymity-network endpoint.
    pub anonymity_only: bool,
    pub max_download_bytes: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            anonymity_proxy: None,
            anonymity_only: false,
            max_download_bytes: 256 * 1024 * 1024,
        }
    }
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let builder_err = |e: reqwest::Error| TransportError::Request {
            url: String::new(),
            message: e.to_string(),
        };

        let direct = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("airlock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(builder_err)?;

        let proxied = match &config.anonymity_proxy {
            Some(proxy) => Some(
                reqwest::Client::builder()
                    .timeout(config.timeout)
                    .proxy(reqwest::Proxy::all(proxy.as_str()).map_err(builder_err)?)
                    .build()
                    .map_err(builder_err)?,
            ),
            None => None,
        };

        Ok(Self {
            direct,
            proxied,
            config,
        })
    }

    fn client_for(&self, url: &str) -> Result<&reqwest::Client, TransportError> {
        if is_anonymity_url(url) {
            return self.proxied.as_ref().ok_or_else(|| TransportError::NoProxy {
                url: url.to_string(),
            });
        }
        if self.config.anonymity_only {
            return Err(TransportError::ClearnetRefused {
                url: url.to_string(),
            });
        }
        Ok(&self.direct)
    }

    async fn send(&self, url: &str, body: &Value) -> Result<reqwest::Response, TransportError> {
        let request_err = |e: reqwest::Error| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client_for(url)?
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        debug!(url = %url, "POST");
        self.send(url, body)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn download(&self, url: &str, body: &Value, dest: &Path) -> Result<u64, TransportError> {
        let limit = self.config.max_download_bytes;
        let mut response = self.send(url, body).await?;

        if response.content_length().map_or(false, |len| len > limit) {
            return Err(TransportError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(TransportError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(url = %url, bytes = written, "Download complete");
        Ok(written)
    }
}
