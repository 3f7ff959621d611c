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

//! SEA (Statement Execution API) client implementation.
//!
//! Only the chunk-link endpoint lives here; statement execution happens
//! elsewhere and hands its manifest to the reader factory.

use crate::client::{ChunkLinkFetchResult, DatabricksClient, DatabricksHttpClient};
use crate::error::{Error, Result};
use crate::types::cloudfetch::CloudFetchLink;
use crate::types::sea::GetChunksResponse;
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

/// SEA client for the Databricks SQL Statement Execution API.
#[derive(Debug)]
pub struct SeaClient {
    http_client: Arc<DatabricksHttpClient>,
    host: String,
}

impl SeaClient {
    pub fn new(http_client: Arc<DatabricksHttpClient>, host: impl Into<String>) -> Self {
        Self {
            http_client,
            host: host.into(),
        }
    }

    /// Build the base URL for API requests.
    fn base_url(&self) -> String {
        format!("{}/api/2.0/sql", self.host.trim_end_matches('/'))
    }

    fn chunks_url(&self, statement_id: &str, chunk_index: i64) -> String {
        format!(
            "{}/statements/{}/result/chunks/{}",
            self.base_url(),
            statement_id,
            chunk_index
        )
    }

    /// Convert a chunk-link response body into links plus continuation.
    fn parse_chunks_response(body: &str) -> Result<ChunkLinkFetchResult> {
        let chunks_response: GetChunksResponse = serde_json::from_str(body).map_err(|e| {
            Error::InvalidManifest(format!(
                "Failed to parse chunks response: {} - body: {}",
                e, body
            ))
        })?;

        let links = match chunks_response.external_links {
            Some(ref external_links) => external_links
                .iter()
                .map(CloudFetchLink::from_external_link)
                .collect::<Result<Vec<_>>>()?,
            None => vec![],
        };

        // Prefer the top-level continuation, fall back to the first link's.
        let next_chunk_index = chunks_response.next_chunk_index.or_else(|| {
            chunks_response
                .external_links
                .as_ref()
                .and_then(|links| links.first())
                .and_then(|link| link.next_chunk_index)
        });

        Ok(ChunkLinkFetchResult {
            links,
            has_more: next_chunk_index.is_some(),
            next_chunk_index,
        })
    }
}

#[async_trait]
impl DatabricksClient for SeaClient {
    async fn get_result_chunks(
        &self,
        statement_id: &str,
        chunk_index: i64,
    ) -> Result<ChunkLinkFetchResult> {
        // chunk_index is a path parameter, not a query parameter
        let url = self.chunks_url(statement_id, chunk_index);

        debug!("Getting result chunks at {}", url);

        let request = self
            .http_client
            .inner()
            .request(Method::GET, &url)
            .build()
            .map_err(|e| Error::Request(format!("Failed to build request: {}", e)))?;

        let response = self.http_client.execute(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_reqwest("Failed to read response", e))?;

        let result = Self::parse_chunks_response(&body)?;

        debug!(
            "Chunks response: {} links, next_chunk_index={:?}, has_more={}",
            result.links.len(),
            result.next_chunk_index,
            result.has_more
        );

        Ok(result)
    }
}
