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

//! CloudFetch implementation for streaming chunked results from cloud storage.
//!
//! This module provides:
//! - `ChunkProvider`: Orchestrator that resolves links, downloads in parallel
//!   and hands chunks out in order
//! - `ChunkStore`: Descriptor table with the chunk status machine
//! - `LinkResolver`: Per-protocol link resolution (REST and legacy RPC)
//! - `ChunkDownloader`: Downloads and decodes payloads from presigned URLs
//! - Arrow IPC and columnar row-set parsing utilities

pub mod arrow_parser;
pub mod chunk_downloader;
pub mod chunk_provider;
pub mod chunk_store;
pub mod link_fetcher;
pub mod rowset_parser;

pub use arrow_parser::{decode_payload, parse_arrow_stream};
pub use chunk_downloader::{ChunkDownloader, DownloadedChunk, HttpChunkDownloader};
pub use chunk_provider::{ChunkHandle, ChunkProvider};
pub use chunk_store::{ChunkSnapshot, ChunkStore};
pub use link_fetcher::{LinkRequest, LinkResolver, RpcLinkResolver, SeaLinkResolver};
pub use rowset_parser::{decode_row_set, encode_row_set};
