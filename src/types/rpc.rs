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

//! Result types of the legacy RPC protocol.
//!
//! The RPC fetch response lists result links in row order. Links carry a start
//! row offset instead of a chunk index, and their expiry is epoch milliseconds.

use crate::error::{Error, Result};
use crate::types::cloudfetch::CloudFetchLink;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One presigned result file as returned by the RPC fetch call.
#[derive(Debug, Clone)]
pub struct RpcResultLink {
    pub file_link: String,
    /// Expiry as milliseconds since the Unix epoch.
    pub expiry_time_ms: i64,
    pub start_row_offset: i64,
    pub row_count: i64,
    pub bytes_num: i64,
    pub http_headers: HashMap<String, String>,
}

impl RpcResultLink {
    /// Convert to a download link for the chunk at `chunk_index`.
    pub fn to_link(&self, chunk_index: i64) -> Result<CloudFetchLink> {
        let expiration: DateTime<Utc> = DateTime::from_timestamp_millis(self.expiry_time_ms)
            .ok_or_else(|| {
                Error::InvalidManifest(format!(
                    "Invalid expiry time {} for result link at row offset {}",
                    self.expiry_time_ms, self.start_row_offset
                ))
            })?;

        Ok(CloudFetchLink {
            url: self.file_link.clone(),
            chunk_index,
            row_offset: self.start_row_offset,
            row_count: self.row_count,
            byte_count: self.bytes_num,
            expiration,
            http_headers: self.http_headers.clone(),
            next_chunk_index: None,
        })
    }
}

/// Result metadata gathered from the legacy execute and fetch responses.
#[derive(Debug, Clone, Default)]
pub struct RpcResultMetadata {
    pub total_row_count: i64,
    /// Links in row order; position is the chunk index.
    pub result_links: Vec<RpcResultLink>,
    pub lz4_compressed: bool,
    /// Payloads are Arrow IPC streams; otherwise native columnar row-sets.
    pub arrow_format: bool,
    /// Small results delivered directly in the response.
    pub inline_rows: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_link_conversion() {
        let link = RpcResultLink {
            file_link: "https://storage.example.com/file-2".to_string(),
            expiry_time_ms: 4_102_444_800_000, // 2100-01-01
            start_row_offset: 200,
            row_count: 100,
            bytes_num: 4096,
            http_headers: HashMap::from([("x-ms-version".to_string(), "1".to_string())]),
        };

        let converted = link.to_link(2).unwrap();
        assert_eq!(converted.chunk_index, 2);
        assert_eq!(converted.row_offset, 200);
        assert_eq!(converted.byte_count, 4096);
        assert!(!converted.is_expired());
        assert_eq!(converted.http_headers.len(), 1);
    }

    #[test]
    fn test_rpc_link_invalid_expiry() {
        let link = RpcResultLink {
            file_link: "https://storage.example.com/file-0".to_string(),
            expiry_time_ms: i64::MAX,
            start_row_offset: 0,
            row_count: 1,
            bytes_num: 1,
            http_headers: HashMap::new(),
        };
        assert!(matches!(link.to_link(0), Err(Error::InvalidManifest(_))));
    }
}
