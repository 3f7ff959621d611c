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

//! CloudFetch-specific types shared by the resolver, downloader and provider.

use crate::client::retry::RetryConfig;
use crate::error::{Error, Result};
use crate::types::sea::ExternalLink;
use arrow_array::RecordBatch;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Safety buffer (in seconds) before link expiration.
/// Links are considered expired this many seconds before their actual expiration time
/// to avoid race conditions during download.
pub const LINK_EXPIRY_BUFFER_SECS: i64 = 30;

/// Default interval (in seconds) after which a consumer still waiting on a chunk logs.
pub const DEFAULT_CHUNK_READY_TIMEOUT_SECS: u64 = 30;

/// Configuration for CloudFetch retrieval.
#[derive(Debug, Clone)]
pub struct CloudFetchConfig {
    /// Maximum number of chunks downloading or held in memory per query.
    pub max_parallel_chunk_downloads: usize,
    /// Seconds before expiry at which a link is treated as expired.
    pub link_expiry_buffer_secs: i64,
    /// How long a waiting consumer sleeps before logging and checking again.
    pub chunk_ready_timeout: Duration,
    /// Log warning if download speed falls below this threshold (MB/s).
    pub speed_threshold_mbps: f64,
    /// Whether results delivered as external links may be read.
    pub enabled: bool,
    /// Retry policy for link resolution and chunk downloads.
    pub retry: RetryConfig,
}

impl Default for CloudFetchConfig {
    fn default() -> Self {
        Self {
            max_parallel_chunk_downloads: 16,
            link_expiry_buffer_secs: LINK_EXPIRY_BUFFER_SECS,
            chunk_ready_timeout: Duration::from_secs(DEFAULT_CHUNK_READY_TIMEOUT_SECS),
            speed_threshold_mbps: 0.1,
            enabled: true,
            retry: RetryConfig::default(),
        }
    }
}

impl CloudFetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_chunk_downloads == 0 {
            return Err(Error::InvalidConfig(
                "max_parallel_chunk_downloads must be at least 1".to_string(),
            ));
        }
        if self.link_expiry_buffer_secs < 0 {
            return Err(Error::InvalidConfig(
                "link_expiry_buffer_secs must not be negative".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Parsed download link with validated expiration timestamp.
#[derive(Debug, Clone)]
pub struct CloudFetchLink {
    /// Pre-signed URL for downloading the chunk.
    pub url: String,
    /// Index of this chunk in the result set.
    pub chunk_index: i64,
    /// Row offset of this chunk in the result set.
    pub row_offset: i64,
    /// Number of rows in this chunk.
    pub row_count: i64,
    /// Size of this chunk in bytes (compressed if applicable).
    pub byte_count: i64,
    /// When this link expires.
    pub expiration: DateTime<Utc>,
    /// HTTP headers required by the storage service.
    pub http_headers: HashMap<String, String>,
    /// Index of the next chunk, if there are more.
    pub next_chunk_index: Option<i64>,
}

impl CloudFetchLink {
    /// Check if link is expired using the default safety buffer.
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_buffer(LINK_EXPIRY_BUFFER_SECS)
    }

    pub fn is_expired_with_buffer(&self, buffer_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(buffer_secs) >= self.expiration
    }

    /// Convert from SEA API response type.
    pub fn from_external_link(link: &ExternalLink) -> Result<Self> {
        let expiration = DateTime::parse_from_rfc3339(&link.expiration)
            .map_err(|e| Error::InvalidManifest(format!("Invalid expiration timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Self {
            url: link.external_link.clone(),
            chunk_index: link.chunk_index,
            row_offset: link.row_offset,
            row_count: link.row_count,
            byte_count: link.byte_count,
            expiration,
            http_headers: link.http_headers.clone().unwrap_or_default(),
            next_chunk_index: link.next_chunk_index,
        })
    }
}

/// Lifecycle of a chunk.
///
/// ```text
///   Pending -> LinkResolved -> Downloading -> Downloaded -> Consumed
///   Pending | LinkResolved | Downloading -> Failed
///   Downloading -> LinkResolved (link refreshed before another attempt)
///   anything but Consumed -> Released (provider closed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    LinkResolved,
    Downloading,
    Downloaded,
    Consumed,
    Failed,
    Released,
}

impl ChunkStatus {
    pub fn can_transition_to(self, next: ChunkStatus) -> bool {
        use ChunkStatus::*;
        matches!(
            (self, next),
            (Pending, LinkResolved)
                | (Pending, Failed)
                | (LinkResolved, LinkResolved)
                | (LinkResolved, Downloading)
                | (LinkResolved, Failed)
                | (Downloading, LinkResolved)
                | (Downloading, Downloaded)
                | (Downloading, Failed)
                | (Downloaded, Consumed)
        ) || (next == Released && !matches!(self, Consumed | Released))
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkStatus::Consumed | ChunkStatus::Failed | ChunkStatus::Released
        )
    }
}

/// Per-chunk metadata and, once downloaded, its decoded batches.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    pub byte_count: i64,
    pub link: Option<CloudFetchLink>,
    pub status: ChunkStatus,
    /// Retries made by the operation that last ran for this chunk.
    pub retry_count: u32,
    /// Attempts made by the operation that last ran for this chunk.
    pub attempts: u32,
    pub data: Option<Vec<RecordBatch>>,
    /// Fatal failure recorded when the chunk reached `Failed`.
    pub error: Option<Error>,
}

impl ChunkDescriptor {
    pub fn new(index: i64, row_offset: i64, row_count: i64, byte_count: i64) -> Self {
        Self {
            index,
            row_offset,
            row_count,
            byte_count,
            link: None,
            status: ChunkStatus::Pending,
            retry_count: 0,
            attempts: 0,
            data: None,
            error: None,
        }
    }

    /// Whether the chunk has a link that can be used right now.
    pub fn has_usable_link(&self, buffer_secs: i64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| !link.is_expired_with_buffer(buffer_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external_link(expiration: &str) -> ExternalLink {
        ExternalLink {
            external_link: "https://storage.example.com/chunk0".to_string(),
            expiration: expiration.to_string(),
            chunk_index: 0,
            row_offset: 0,
            row_count: 1000,
            byte_count: 50000,
            http_headers: None,
            next_chunk_index: None,
        }
    }

    #[test]
    fn test_cloudfetch_config_default() {
        let config = CloudFetchConfig::default();
        assert_eq!(config.max_parallel_chunk_downloads, 16);
        assert_eq!(config.link_expiry_buffer_secs, 30);
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cloudfetch_config_rejects_zero_parallelism() {
        let config = CloudFetchConfig {
            max_parallel_chunk_downloads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_cloudfetch_link_from_external_link() {
        let mut external = external_link("2099-01-01T12:00:00Z");
        external.http_headers = Some(HashMap::from([(
            "x-custom".to_string(),
            "value".to_string(),
        )]));
        external.next_chunk_index = Some(1);

        let link = CloudFetchLink::from_external_link(&external).unwrap();
        assert_eq!(link.chunk_index, 0);
        assert_eq!(link.next_chunk_index, Some(1));
        assert_eq!(
            link.http_headers.get("x-custom"),
            Some(&"value".to_string())
        );
        assert!(!link.is_expired());
    }

    #[test]
    fn test_cloudfetch_link_invalid_expiration() {
        let result = CloudFetchLink::from_external_link(&external_link("not-a-valid-timestamp"));
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_cloudfetch_link_is_expired() {
        let link = CloudFetchLink::from_external_link(&external_link("2000-01-01T12:00:00Z")).unwrap();
        assert!(link.is_expired());
    }

    #[test]
    fn test_expiry_buffer_applies() {
        let mut link =
            CloudFetchLink::from_external_link(&external_link("2099-01-01T12:00:00Z")).unwrap();
        link.expiration = Utc::now() + chrono::Duration::seconds(10);
        assert!(link.is_expired());
        assert!(!link.is_expired_with_buffer(0));
    }

    #[test]
    fn test_status_transitions() {
        use ChunkStatus::*;
        assert!(Pending.can_transition_to(LinkResolved));
        assert!(LinkResolved.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Downloaded));
        assert!(Downloaded.can_transition_to(Consumed));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Downloaded.can_transition_to(Released));
        assert!(Failed.can_transition_to(Released));

        assert!(!Consumed.can_transition_to(Downloaded));
        assert!(!Consumed.can_transition_to(Released));
        assert!(!Pending.can_transition_to(Downloaded));
        assert!(!Released.can_transition_to(Pending));
        assert!(!Downloaded.can_transition_to(Downloading));
    }

    #[test]
    fn test_descriptor_usable_link() {
        let mut descriptor = ChunkDescriptor::new(0, 0, 10, 100);
        assert!(!descriptor.has_usable_link(0));

        descriptor.link =
            Some(CloudFetchLink::from_external_link(&external_link("2000-01-01T00:00:00Z")).unwrap());
        assert!(!descriptor.has_usable_link(0));

        descriptor.link =
            Some(CloudFetchLink::from_external_link(&external_link("2099-01-01T00:00:00Z")).unwrap());
        assert!(descriptor.has_usable_link(30));
    }
}
