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

//! Result-chunk retrieval for Databricks SQL.
//!
//! This crate fetches large query results that the server splits into chunks
//! stored behind presigned cloud-storage URLs (CloudFetch). It resolves chunk
//! links, downloads chunks in parallel under a memory bound, decodes them into
//! Arrow record batches and exposes the rows in order through a cursor.
//!
//! ## Overview
//!
//! - [`ResultReaderFactory`] - Picks chunked, inline or empty reading per result
//! - [`ChunkProvider`] - Orchestrates link resolution and downloads
//! - [`RowCursor`] - Row-at-a-time access to the result
//! - [`RetryPolicy`] - Backoff and per-class retry budgets for every HTTP call
//!
//! ## Protocols
//!
//! - **SEA (Statement Execution API)**: REST/JSON; links are fetched per chunk index
//! - **Legacy RPC**: links come embedded in the fetch response, refreshed by row offset
//!
//! Payloads are Arrow IPC streams or legacy columnar row-sets, optionally LZ4
//! frame compressed.
//!
//! ## Example
//!
//! ```ignore
//! use databricks_cloudfetch::{DriverOptions, PersonalAccessToken, ResultReaderFactory, SessionContext};
//!
//! let options = DriverOptions::from_pairs([("databricks.cloudfetch.max_parallel_downloads", "8")])?;
//! let context = SessionContext::from_options(&options, Arc::new(PersonalAccessToken::new("dapi...")), handle)?;
//! let factory = ResultReaderFactory::new(context);
//! let mut cursor = factory.create_sea_cursor(client, &statement_id, &manifest, result.as_ref())?;
//! while cursor.next_row().await? {
//!     let row = cursor.current_row().unwrap();
//!     println!("{:?}", row.cell(0).and_then(|c| c.as_i64()));
//! }
//! ```
//!
//! ## Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `databricks.cloudfetch.enabled` | true | Enable CloudFetch |
//! | `databricks.cloudfetch.max_parallel_downloads` | 16 | Parallel downloads, also the in-memory chunk bound |
//! | `databricks.cloudfetch.link_expiry_buffer_secs` | 30 | Treat links as expired this early |
//! | `databricks.cloudfetch.chunk_ready_timeout_ms` | 30000 | Log interval while waiting for a chunk |
//! | `databricks.cloudfetch.speed_threshold_mbps` | 0.1 | Slow download warning threshold |
//! | `databricks.retry.temporarily_unavailable` | true | Retry HTTP 503 |
//! | `databricks.retry.rate_limited` | true | Retry HTTP 429 |
//! | `databricks.retry.temporarily_unavailable_timeout_secs` | 900 | Wait budget for 503 |
//! | `databricks.retry.rate_limit_timeout_secs` | 120 | Wait budget for 429 |
//! | `databricks.retry.max_attempts_per_class` | 5 | Retries per failure class |
//! | `databricks.http.connect_timeout_ms` | 30000 | TCP connect timeout |
//! | `databricks.http.read_timeout_ms` | 60000 | Request timeout |
//! | `databricks.log_level` | - | Log filter directive |
//! | `databricks.log_file` | - | Log to this file instead of stderr |

pub mod auth;
pub mod client;
pub mod error;
pub mod logging;
pub mod options;
pub mod reader;
pub mod telemetry;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use options::DriverOptions;
pub use reader::cloudfetch::{ChunkHandle, ChunkProvider, ChunkSnapshot};
pub use reader::{Cell, ResultReaderFactory, RowCursor, RowView, SessionContext};

// Re-export client types for advanced users
pub use auth::{AuthProvider, PersonalAccessToken};
pub use client::{
    DatabricksClient, DatabricksHttpClient, HttpClientConfig, RetryConfig, RetryPolicy,
    RpcResultsClient, SeaClient,
};

// Re-export configuration types
pub use types::cloudfetch::CloudFetchConfig;
