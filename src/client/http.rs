// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP client for Databricks SQL endpoints and presigned chunk URLs.
//!
//! This module provides a low-level HTTP client with:
//! - Connection pooling
//! - Bearer token authentication on API calls
//! - Configurable timeouts and an optional proxy
//!
//! Each call makes exactly one attempt. Failures come back as [`Error::Http`]
//! or [`Error::Transport`] so that [`RetryPolicy`](crate::client::retry::RetryPolicy)
//! can classify them.

use crate::auth::AuthProvider;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Read timeout duration.
    pub read_timeout: Duration,
    /// Maximum number of idle connections per host.
    pub max_connections_per_host: usize,
    /// User agent string.
    pub user_agent: String,
    /// Proxy URL applied to every scheme.
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            max_connections_per_host: 100,
            user_agent: format!("DatabricksCloudFetchRust/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}

/// HTTP client for communicating with Databricks SQL endpoints.
///
/// One instance is shared by every chunk of a session; reqwest pools the
/// underlying connections.
#[derive(Debug)]
pub struct DatabricksHttpClient {
    client: Client,
    config: HttpClientConfig,
    auth_provider: Arc<dyn AuthProvider>,
}

impl DatabricksHttpClient {
    /// Creates a new HTTP client with the given configuration and auth provider.
    pub fn new(config: HttpClientConfig, auth_provider: Arc<dyn AuthProvider>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .user_agent(&config.user_agent);

        if let Some(ref proxy_url) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                Error::InvalidConfig(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            auth_provider,
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Returns the underlying reqwest client for building requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the authorization header value.
    pub fn auth_header(&self) -> Result<String> {
        self.auth_provider.get_auth_header()
    }

    /// Execute an authenticated API request.
    ///
    /// For presigned CloudFetch URLs use `execute_without_auth`.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let auth_header = self.auth_header()?;
        let value = auth_header
            .parse()
            .map_err(|_| Error::InvalidConfig("Authorization header is not valid ASCII".into()))?;
        request
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, value);
        self.send(request).await
    }

    /// Execute a request without authentication (for CloudFetch downloads).
    ///
    /// Presigned URLs carry their own credentials in the URL or in the
    /// link's headers.
    pub async fn execute_without_auth(&self, request: Request) -> Result<Response> {
        self.send(request).await
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = redact_query(request.url());
        debug!("Executing {} {}", method, url);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::from_reqwest(&format!("{} {} failed", method, url), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        debug!(
            "{} {} returned HTTP {} (retry-after {:?})",
            method,
            url,
            status.as_u16(),
            retry_after
        );

        Err(Error::Http {
            status: status.as_u16(),
            retry_after,
            message: body,
        })
    }
}

/// Numeric `Retry-After` header in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Presigned URLs carry credentials in the query string; keep them out of logs.
fn redact_query(url: &reqwest::Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        shown.set_query(Some("<redacted>"));
    }
    shown.to_string()
}
