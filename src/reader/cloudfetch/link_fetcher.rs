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

//! Link resolution strategies.
//!
//! The chunk provider asks a [`LinkResolver`] for links whenever a chunk's link
//! is missing or about to expire. The resolver only talks to the server; the
//! provider applies the returned links to its descriptor store.
//!
//! Two strategies exist, one per wire protocol:
//!
//! | Resolver | Keyed by | Transport |
//! |---|---|---|
//! | [`SeaLinkResolver`] | chunk index | `GET .../result/chunks/{index}` |
//! | [`RpcLinkResolver`] | start row offset | legacy fetch call |
//!
//! Both may return links for more chunks than were asked for. Callers should
//! keep them, since they save a round trip for the following chunks.

use crate::client::{DatabricksClient, RpcResultsClient};
use crate::error::{Error, Result};
use crate::types::cloudfetch::CloudFetchLink;
use crate::types::manifest::ChunkManifest;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A chunk that needs a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRequest {
    pub chunk_index: i64,
    pub row_offset: i64,
}

/// Statement-scoped link source.
#[async_trait]
pub trait LinkResolver: Send + Sync + std::fmt::Debug {
    /// Resolve a link for every requested chunk.
    ///
    /// The result always holds the requested indices and may hold others.
    /// Fails if the server does not return a link for a requested chunk.
    async fn resolve_links(&self, requests: &[LinkRequest]) -> Result<HashMap<i64, CloudFetchLink>>;

    /// HTTP method the resolver issues, used for retry eligibility.
    fn http_method(&self) -> Method {
        Method::GET
    }
}

fn missing_link(chunk_index: i64) -> Error {
    Error::InvalidManifest(format!("server returned no link for chunk {}", chunk_index))
}

/// REST implementation: one request per chunk index still missing.
#[derive(Debug)]
pub struct SeaLinkResolver {
    client: Arc<dyn DatabricksClient>,
    statement_id: String,
}

impl SeaLinkResolver {
    pub fn new(client: Arc<dyn DatabricksClient>, statement_id: impl Into<String>) -> Self {
        Self {
            client,
            statement_id: statement_id.into(),
        }
    }
}

#[async_trait]
impl LinkResolver for SeaLinkResolver {
    async fn resolve_links(&self, requests: &[LinkRequest]) -> Result<HashMap<i64, CloudFetchLink>> {
        let mut indices: Vec<i64> = requests.iter().map(|r| r.chunk_index).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut resolved = HashMap::new();
        for index in indices {
            if resolved.contains_key(&index) {
                continue;
            }

            let result = self
                .client
                .get_result_chunks(&self.statement_id, index)
                .await?;
            debug!(
                "Resolved {} links starting at chunk {} for statement {}",
                result.links.len(),
                index,
                self.statement_id
            );

            for link in result.links {
                resolved.insert(link.chunk_index, link);
            }
            if !resolved.contains_key(&index) {
                return Err(missing_link(index));
            }
        }

        Ok(resolved)
    }
}

/// Legacy implementation.
///
/// Links embedded in the fetch response are served from cache while they are
/// fresh; only missing or expired links cost a fetch call. Fetched links are
/// mapped back to chunk indices through their start row offset.
#[derive(Debug)]
pub struct RpcLinkResolver {
    client: Arc<dyn RpcResultsClient>,
    statement_id: String,
    /// Start row offset -> chunk index.
    chunk_by_offset: HashMap<i64, i64>,
    links: DashMap<i64, CloudFetchLink>,
    expiry_buffer_secs: i64,
}

impl RpcLinkResolver {
    pub fn new(
        client: Arc<dyn RpcResultsClient>,
        statement_id: impl Into<String>,
        manifest: &ChunkManifest,
        expiry_buffer_secs: i64,
    ) -> Self {
        let links = DashMap::new();
        let mut chunk_by_offset = HashMap::new();
        for chunk in manifest.chunks() {
            chunk_by_offset.insert(chunk.row_offset, chunk.index);
            if let Some(ref link) = chunk.link {
                links.insert(chunk.index, link.clone());
            }
        }

        Self {
            client,
            statement_id: statement_id.into(),
            chunk_by_offset,
            links,
            expiry_buffer_secs,
        }
    }

    fn cached(&self, chunk_index: i64) -> Option<CloudFetchLink> {
        self.links
            .get(&chunk_index)
            .map(|link| link.value().clone())
            .filter(|link| !link.is_expired_with_buffer(self.expiry_buffer_secs))
    }
}

#[async_trait]
impl LinkResolver for RpcLinkResolver {
    async fn resolve_links(&self, requests: &[LinkRequest]) -> Result<HashMap<i64, CloudFetchLink>> {
        let mut ordered = requests.to_vec();
        ordered.sort_unstable_by_key(|r| r.row_offset);

        let mut resolved = HashMap::new();
        for request in ordered {
            if resolved.contains_key(&request.chunk_index) {
                continue;
            }
            if let Some(link) = self.cached(request.chunk_index) {
                resolved.insert(request.chunk_index, link);
                continue;
            }

            let fetched = self
                .client
                .fetch_result_links(&self.statement_id, request.row_offset)
                .await?;
            debug!(
                "Fetched {} legacy result links from row {} for statement {}",
                fetched.len(),
                request.row_offset,
                self.statement_id
            );

            for rpc_link in fetched {
                let Some(&index) = self.chunk_by_offset.get(&rpc_link.start_row_offset) else {
                    debug!(
                        "Ignoring result link at unknown row offset {}",
                        rpc_link.start_row_offset
                    );
                    continue;
                };
                let link = rpc_link.to_link(index)?;
                self.links.insert(index, link.clone());
                resolved.insert(index, link);
            }
            if !resolved.contains_key(&request.chunk_index) {
                return Err(missing_link(request.chunk_index));
            }
        }

        Ok(resolved)
    }

    /// Legacy fetches are POSTs.
    fn http_method(&self) -> Method {
        Method::POST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChunkLinkFetchResult;
    use crate::types::manifest::{ChunkMeta, CompressionCodec, PayloadFormat};
    use crate::types::rpc::RpcResultLink;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_link(i: i64) -> CloudFetchLink {
        CloudFetchLink {
            url: format!("https://storage.example.com/chunk{}", i),
            chunk_index: i,
            row_offset: i * 100,
            row_count: 100,
            byte_count: 1000,
            expiration: Utc::now() + chrono::Duration::hours(1),
            http_headers: HashMap::new(),
            next_chunk_index: None,
        }
    }

    /// Returns the requested link plus the next one.
    #[derive(Debug, Default)]
    struct MockSeaClient {
        call_count: AtomicUsize,
        omit_requested: bool,
    }

    #[async_trait]
    impl DatabricksClient for MockSeaClient {
        async fn get_result_chunks(
            &self,
            _statement_id: &str,
            chunk_index: i64,
        ) -> Result<ChunkLinkFetchResult> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut links = vec![create_test_link(chunk_index + 1)];
            if !self.omit_requested {
                links.insert(0, create_test_link(chunk_index));
            }
            Ok(ChunkLinkFetchResult {
                links,
                has_more: true,
                next_chunk_index: Some(chunk_index + 2),
            })
        }
    }

    #[derive(Debug, Default)]
    struct MockRpcClient {
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl RpcResultsClient for MockRpcClient {
        async fn fetch_result_links(
            &self,
            _statement_id: &str,
            start_row_offset: i64,
        ) -> Result<Vec<RpcResultLink>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RpcResultLink {
                file_link: format!("https://storage.example.com/rows{}", start_row_offset),
                expiry_time_ms: (Utc::now() + chrono::Duration::hours(1)).timestamp_millis(),
                start_row_offset,
                row_count: 100,
                bytes_num: 1000,
                http_headers: HashMap::new(),
            }])
        }
    }

    fn request(i: i64) -> LinkRequest {
        LinkRequest {
            chunk_index: i,
            row_offset: i * 100,
        }
    }

    fn rpc_manifest(expired_index: Option<i64>) -> ChunkManifest {
        let chunks = (0..3)
            .map(|i| {
                let mut link = create_test_link(i);
                if Some(i) == expired_index {
                    link.expiration = Utc::now() - chrono::Duration::minutes(5);
                }
                ChunkMeta {
                    index: i,
                    row_offset: i * 100,
                    row_count: 100,
                    byte_count: 1000,
                    link: Some(link),
                }
            })
            .collect();
        ChunkManifest::new(
            300,
            CompressionCodec::Lz4Frame,
            PayloadFormat::ColumnarRowSet,
            chunks,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sea_resolver_keeps_neighbour_links() {
        let client = Arc::new(MockSeaClient::default());
        let resolver = SeaLinkResolver::new(client.clone(), "stmt-1");

        let links = resolver
            .resolve_links(&[request(0), request(1)])
            .await
            .unwrap();

        // chunk 1 came back with the request for chunk 0
        assert_eq!(client.call_count.load(Ordering::SeqCst), 1);
        assert!(links.contains_key(&0));
        assert!(links.contains_key(&1));
        assert_eq!(resolver.http_method(), Method::GET);
    }

    #[tokio::test]
    async fn test_sea_resolver_missing_link_is_error() {
        let client = Arc::new(MockSeaClient {
            omit_requested: true,
            ..Default::default()
        });
        let resolver = SeaLinkResolver::new(client, "stmt-1");

        let result = resolver.resolve_links(&[request(4)]).await;
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[tokio::test]
    async fn test_rpc_resolver_serves_embedded_links() {
        let client = Arc::new(MockRpcClient::default());
        let resolver = RpcLinkResolver::new(client.clone(), "stmt-1", &rpc_manifest(None), 30);

        let links = resolver
            .resolve_links(&[request(0), request(2)])
            .await
            .unwrap();

        assert_eq!(client.call_count.load(Ordering::SeqCst), 0);
        assert_eq!(links.len(), 2);
        assert_eq!(resolver.http_method(), Method::POST);
    }

    #[tokio::test]
    async fn test_rpc_resolver_refreshes_expired_link_by_offset() {
        let client = Arc::new(MockRpcClient::default());
        let resolver = RpcLinkResolver::new(client.clone(), "stmt-1", &rpc_manifest(Some(1)), 30);

        let links = resolver.resolve_links(&[request(1)]).await.unwrap();

        assert_eq!(client.call_count.load(Ordering::SeqCst), 1);
        let link = &links[&1];
        assert_eq!(link.chunk_index, 1);
        assert_eq!(link.url, "https://storage.example.com/rows100");
        assert!(!link.is_expired());

        // Second request is served from the refreshed cache.
        resolver.resolve_links(&[request(1)]).await.unwrap();
        assert_eq!(client.call_count.load(Ordering::SeqCst), 1);
    }
}
