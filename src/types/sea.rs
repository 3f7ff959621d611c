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

//! SEA (Statement Execution API) result types.
//!
//! These map directly to the JSON structures the REST protocol returns for a
//! finished statement and for the per-chunk link endpoint.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Manifest describing the result set structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub schema: Option<ResultSchema>,
    #[serde(default)]
    pub total_chunk_count: Option<i64>,
    #[serde(default)]
    pub total_row_count: Option<i64>,
    #[serde(default)]
    pub total_byte_count: Option<i64>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub chunks: Option<Vec<ChunkInfo>>,
    /// Compression codec used for result data ("LZ4_FRAME" or absent for none)
    #[serde(default)]
    pub result_compression: Option<String>,
}

/// Schema of the result set.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSchema {
    pub column_count: i32,
    pub columns: Vec<ColumnInfo>,
}

/// Information about a single column in the result.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub type_text: Option<String>,
    pub position: i32,
}

/// Information about a result chunk (metadata only).
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkInfo {
    pub chunk_index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    #[serde(default)]
    pub byte_count: i64,
}

/// Result data from the initial execution response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub chunk_index: Option<i64>,
    #[serde(default)]
    pub row_offset: Option<i64>,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub next_chunk_index: Option<i64>,
    #[serde(default)]
    pub external_links: Option<Vec<ExternalLink>>,
    /// Inline Arrow IPC data (base64-encoded in JSON, decoded by serde).
    /// Present when server returns inline results instead of CloudFetch.
    #[serde(default, deserialize_with = "deserialize_base64_attachment")]
    pub attachment: Option<Vec<u8>>,
}

/// Deserialize base64-encoded attachment field from JSON.
fn deserialize_base64_attachment<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) if !s.is_empty() => STANDARD
            .decode(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// External link for CloudFetch download.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLink {
    pub external_link: String,
    pub expiration: String, // ISO 8601 timestamp
    pub chunk_index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    #[serde(default)]
    pub byte_count: i64,
    #[serde(default)]
    pub http_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub next_chunk_index: Option<i64>,
}

/// Response from fetching result chunks.
/// Note: The /result/chunks/{chunk_index} endpoint returns a different format
/// than the main execute response - it doesn't include statement_id.
#[derive(Debug, Clone, Deserialize)]
pub struct GetChunksResponse {
    #[serde(default)]
    pub chunk_index: Option<i64>,
    #[serde(default)]
    pub next_chunk_index: Option<i64>,
    #[serde(default)]
    pub external_links: Option<Vec<ExternalLink>>,
}
