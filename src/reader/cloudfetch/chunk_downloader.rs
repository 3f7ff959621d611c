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

//! ChunkDownloader for downloading chunk payloads from cloud storage.
//!
//! This module handles downloading chunk data from presigned URLs,
//! including HTTP header handling, speed monitoring, decompression,
//! and payload parsing. A download is a single attempt; the chunk provider
//! wraps it in the retry policy.

use crate::client::DatabricksHttpClient;
use crate::error::{Error, Result};
use crate::reader::cloudfetch::arrow_parser::decode_payload;
use crate::types::cloudfetch::CloudFetchLink;
use crate::types::manifest::{CompressionCodec, PayloadFormat};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Decoded chunk plus transfer statistics.
#[derive(Debug, Clone)]
pub struct DownloadedChunk {
    pub batches: Vec<RecordBatch>,
    /// Bytes received on the wire, before decompression.
    pub byte_count: u64,
    pub row_count: i64,
    pub elapsed: Duration,
}

impl DownloadedChunk {
    pub fn new(batches: Vec<RecordBatch>, byte_count: u64, elapsed: Duration) -> Self {
        let row_count = batches.iter().map(|b| b.num_rows() as i64).sum();
        Self {
            batches,
            byte_count,
            row_count,
            elapsed,
        }
    }
}

/// Fetches and decodes the payload behind one link.
#[async_trait]
pub trait ChunkDownloader: Send + Sync + std::fmt::Debug {
    async fn download(&self, link: &CloudFetchLink) -> Result<DownloadedChunk>;
}

/// Downloads chunk payloads over HTTP.
///
/// Handles:
/// - HTTP GET to presigned URL with the link's own headers
/// - Streaming the body while counting bytes
/// - LZ4 decompression (if compression enabled)
/// - Arrow IPC or row-set parsing into RecordBatches
/// - Download speed monitoring
#[derive(Debug)]
pub struct HttpChunkDownloader {
    http_client: Arc<DatabricksHttpClient>,
    codec: CompressionCodec,
    format: PayloadFormat,
    speed_threshold_mbps: f64,
}

impl HttpChunkDownloader {
    /// Create a new chunk downloader.
    ///
    /// # Arguments
    /// * `http_client` - HTTP client for making requests
    /// * `codec` - Compression codec used by the server
    /// * `format` - Payload encoding of the result
    /// * `speed_threshold_mbps` - Log warning if speed falls below this (MB/s)
    pub fn new(
        http_client: Arc<DatabricksHttpClient>,
        codec: CompressionCodec,
        format: PayloadFormat,
        speed_threshold_mbps: f64,
    ) -> Self {
        Self {
            http_client,
            codec,
            format,
            speed_threshold_mbps,
        }
    }

    async fn fetch_body(&self, link: &CloudFetchLink) -> Result<BytesMut> {
        // Build request with custom headers from the link
        let mut request_builder = self.http_client.inner().request(Method::GET, &link.url);
        for (key, value) in &link.http_headers {
            request_builder = request_builder.header(key, value);
        }
        let request = request_builder
            .build()
            .map_err(|e| {
                Error::Request(format!(
                    "Invalid download link for chunk {}: {}",
                    link.chunk_index, e
                ))
            })?;

        // Execute without auth (presigned URLs have their own auth)
        let response = self.http_client.execute_without_auth(request).await?;

        let capacity = usize::try_from(link.byte_count).unwrap_or(0);
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|e| {
                Error::from_reqwest(
                    &format!("Failed to read body of chunk {}", link.chunk_index),
                    e,
                )
            })?;
            body.extend_from_slice(&piece);
        }
        Ok(body)
    }

    fn check_speed(&self, chunk_index: i64, byte_count: u64, elapsed: Duration) {
        let size_mb = byte_count as f64 / 1024.0 / 1024.0;
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let speed_mbps = size_mb / secs;

        debug!(
            "Downloaded chunk {}: {:.2} MB in {:.2}s ({:.2} MB/s)",
            chunk_index, size_mb, secs, speed_mbps
        );

        if byte_count > 0 && speed_mbps < self.speed_threshold_mbps {
            warn!(
                "CloudFetch download slower than threshold: {:.2} MB/s (threshold: {:.2} MB/s)",
                speed_mbps, self.speed_threshold_mbps
            );
        }
    }
}

#[async_trait]
impl ChunkDownloader for HttpChunkDownloader {
    async fn download(&self, link: &CloudFetchLink) -> Result<DownloadedChunk> {
        let start = Instant::now();

        debug!(
            "Downloading chunk {} ({} bytes expected)",
            link.chunk_index, link.byte_count
        );

        let body = self.fetch_body(link).await?;
        let elapsed = start.elapsed();
        let byte_count = body.len() as u64;
        self.check_speed(link.chunk_index, byte_count, elapsed);

        let chunk = DownloadedChunk::new(
            decode_payload(&body, self.codec, self.format)?,
            byte_count,
            elapsed,
        );

        if chunk.row_count != link.row_count {
            warn!(
                "Chunk {} decoded {} rows but its link declares {}",
                link.chunk_index, chunk.row_count, link.row_count
            );
        }
        debug!(
            "Parsed chunk {}: {} batches, {} total rows",
            link.chunk_index,
            chunk.batches.len(),
            chunk.row_count
        );

        Ok(chunk)
    }
}
