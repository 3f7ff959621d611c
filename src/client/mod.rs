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

//! Client implementations for communicating with Databricks SQL endpoints.
//!
//! This module provides:
//! - `DatabricksClient` trait: chunk-link endpoint of the REST protocol
//! - `RpcResultsClient` trait: result-link fetch of the legacy RPC protocol
//! - `DatabricksHttpClient`: low-level single-attempt HTTP client
//! - `SeaClient`: implementation using the Statement Execution API (REST)
//! - `retry`: failure classification and backoff

pub mod http;
pub mod retry;
pub mod sea;

use crate::error::Result;
use crate::types::cloudfetch::CloudFetchLink;
use crate::types::rpc::RpcResultLink;
use async_trait::async_trait;

pub use http::{DatabricksHttpClient, HttpClientConfig};
pub use retry::{FailureClass, RetryConfig, RetryPolicy};
pub use sea::SeaClient;

/// Result of fetching chunk links.
#[derive(Debug, Clone)]
pub struct ChunkLinkFetchResult {
    pub links: Vec<CloudFetchLink>,
    pub has_more: bool,
    pub next_chunk_index: Option<i64>,
}

impl ChunkLinkFetchResult {
    /// Create an empty result indicating end of stream.
    pub fn end_of_stream() -> Self {
        Self {
            links: vec![],
            has_more: false,
            next_chunk_index: None,
        }
    }
}

/// Chunk-link endpoint of the REST protocol.
#[async_trait]
pub trait DatabricksClient: Send + Sync + std::fmt::Debug {
    /// Fetch links starting at `chunk_index`.
    ///
    /// The server may return links for following chunks as well.
    async fn get_result_chunks(
        &self,
        statement_id: &str,
        chunk_index: i64,
    ) -> Result<ChunkLinkFetchResult>;
}

/// Result-link fetch of the legacy RPC protocol.
///
/// Legacy fetches are keyed by row offset, not by chunk index.
#[async_trait]
pub trait RpcResultsClient: Send + Sync + std::fmt::Debug {
    /// Fetch result links for rows starting at `start_row_offset`, in row order.
    async fn fetch_result_links(
        &self,
        statement_id: &str,
        start_row_offset: i64,
    ) -> Result<Vec<RpcResultLink>>;
}
