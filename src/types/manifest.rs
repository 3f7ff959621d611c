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

//! Protocol-neutral chunk manifest.
//!
//! Both wire protocols describe a chunked result differently. `ChunkManifest`
//! is the single shape the chunk provider consumes, built either from a SEA
//! [`ResultManifest`] or from legacy [`RpcResultMetadata`], and validated once.
//! It is immutable after construction.

use crate::error::{Error, Result};
use crate::types::cloudfetch::CloudFetchLink;
use crate::types::rpc::RpcResultMetadata;
use crate::types::sea::{ResultData, ResultManifest};
use tracing::debug;

/// Compression codec for result data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    None,
    Lz4Frame,
}

impl CompressionCodec {
    /// Parse compression codec from manifest field value.
    pub fn from_manifest(value: Option<&str>) -> Self {
        match value {
            Some("LZ4_FRAME") => Self::Lz4Frame,
            _ => Self::None,
        }
    }

    pub fn from_lz4_flag(lz4_compressed: bool) -> Self {
        if lz4_compressed {
            Self::Lz4Frame
        } else {
            Self::None
        }
    }
}

/// Encoding of a decompressed chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Arrow IPC stream (REST protocol, and legacy protocol with Arrow enabled).
    #[default]
    ArrowStream,
    /// Native columnar row-set encoding of the legacy protocol.
    ColumnarRowSet,
}

/// Geometry of one chunk, plus the link if the server already sent one.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    pub byte_count: i64,
    pub link: Option<CloudFetchLink>,
}

#[derive(Debug, Clone)]
pub struct ChunkManifest {
    chunk_count: i64,
    total_row_count: i64,
    codec: CompressionCodec,
    format: PayloadFormat,
    chunks: Vec<ChunkMeta>,
}

impl ChunkManifest {
    /// Build and validate a manifest. `chunks` may be given in any order.
    pub fn new(
        total_row_count: i64,
        codec: CompressionCodec,
        format: PayloadFormat,
        mut chunks: Vec<ChunkMeta>,
    ) -> Result<Self> {
        chunks.sort_by_key(|c| c.index);
        let manifest = Self {
            chunk_count: chunks.len() as i64,
            total_row_count,
            codec,
            format,
            chunks,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Build from a SEA result manifest and the result data of the execute response.
    pub fn from_sea(manifest: &ResultManifest, result: Option<&ResultData>) -> Result<Self> {
        let links = result
            .and_then(|r| r.external_links.as_ref())
            .map(|links| {
                links
                    .iter()
                    .map(CloudFetchLink::from_external_link)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let mut chunks: Vec<ChunkMeta> = match manifest.chunks {
            Some(ref infos) => infos
                .iter()
                .map(|info| ChunkMeta {
                    index: info.chunk_index,
                    row_offset: info.row_offset,
                    row_count: info.row_count,
                    byte_count: info.byte_count,
                    link: None,
                })
                .collect(),
            // Without chunk infos, the links themselves carry the geometry.
            None => links
                .iter()
                .map(|link| ChunkMeta {
                    index: link.chunk_index,
                    row_offset: link.row_offset,
                    row_count: link.row_count,
                    byte_count: link.byte_count,
                    link: None,
                })
                .collect(),
        };
        chunks.sort_by_key(|c| c.index);

        for link in links {
            let index = link.chunk_index;
            let slot = usize::try_from(index)
                .ok()
                .and_then(|i| chunks.get_mut(i))
                .filter(|c| c.index == index)
                .ok_or_else(|| {
                    Error::InvalidManifest(format!(
                        "external link for chunk {} has no matching chunk",
                        index
                    ))
                })?;
            slot.link = Some(link);
        }

        if let Some(expected) = manifest.total_chunk_count {
            if expected != chunks.len() as i64 {
                return Err(Error::InvalidManifest(format!(
                    "total_chunk_count is {} but {} chunks are described",
                    expected,
                    chunks.len()
                )));
            }
        }

        let total_row_count = manifest
            .total_row_count
            .unwrap_or_else(|| chunks.iter().map(|c| c.row_count).sum());
        let codec = CompressionCodec::from_manifest(manifest.result_compression.as_deref());

        debug!(
            "SEA manifest: {} chunks, {} rows, {} links, codec={:?}",
            chunks.len(),
            total_row_count,
            chunks.iter().filter(|c| c.link.is_some()).count(),
            codec
        );

        Self::new(total_row_count, codec, PayloadFormat::ArrowStream, chunks)
    }

    /// Build from legacy RPC result metadata. Chunk indices follow link order.
    pub fn from_rpc(metadata: &RpcResultMetadata) -> Result<Self> {
        let chunks = metadata
            .result_links
            .iter()
            .enumerate()
            .map(|(i, rpc_link)| {
                let index = i as i64;
                Ok(ChunkMeta {
                    index,
                    row_offset: rpc_link.start_row_offset,
                    row_count: rpc_link.row_count,
                    byte_count: rpc_link.bytes_num,
                    link: Some(rpc_link.to_link(index)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let format = if metadata.arrow_format {
            PayloadFormat::ArrowStream
        } else {
            PayloadFormat::ColumnarRowSet
        };

        Self::new(
            metadata.total_row_count,
            CompressionCodec::from_lz4_flag(metadata.lz4_compressed),
            format,
            chunks,
        )
    }

    fn validate(&self) -> Result<()> {
        let mut expected_offset = self.chunks.first().map(|c| c.row_offset).unwrap_or(0);
        let mut rows = 0i64;

        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position as i64 {
                return Err(Error::InvalidManifest(format!(
                    "chunk indices are not contiguous: expected {}, found {}",
                    position, chunk.index
                )));
            }
            if chunk.row_count < 0 || chunk.byte_count < 0 {
                return Err(Error::InvalidManifest(format!(
                    "chunk {} has negative size",
                    chunk.index
                )));
            }
            if chunk.row_offset != expected_offset {
                return Err(Error::InvalidManifest(format!(
                    "chunk {} starts at row {} but previous chunks end at row {}",
                    chunk.index, chunk.row_offset, expected_offset
                )));
            }
            expected_offset += chunk.row_count;
            rows += chunk.row_count;
        }

        if rows != self.total_row_count {
            return Err(Error::InvalidManifest(format!(
                "chunks hold {} rows but total_row_count is {}",
                rows, self.total_row_count
            )));
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> i64 {
        self.chunk_count
    }

    pub fn total_row_count(&self) -> i64 {
        self.total_row_count
    }

    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    pub fn chunks(&self) -> &[ChunkMeta] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rpc::RpcResultLink;
    use crate::types::sea::{ChunkInfo, ExternalLink};
    use std::collections::HashMap;

    fn meta(index: i64, row_offset: i64, row_count: i64) -> ChunkMeta {
        ChunkMeta {
            index,
            row_offset,
            row_count,
            byte_count: row_count * 10,
            link: None,
        }
    }

    fn sea_manifest(chunks: Vec<ChunkInfo>, total_rows: i64) -> ResultManifest {
        ResultManifest {
            format: Some("ARROW_STREAM".to_string()),
            schema: None,
            total_chunk_count: Some(chunks.len() as i64),
            total_row_count: Some(total_rows),
            total_byte_count: None,
            truncated: false,
            chunks: Some(chunks),
            result_compression: Some("LZ4_FRAME".to_string()),
        }
    }

    fn chunk_info(chunk_index: i64, row_offset: i64, row_count: i64) -> ChunkInfo {
        ChunkInfo {
            chunk_index,
            row_offset,
            row_count,
            byte_count: 100,
        }
    }

    #[test]
    fn test_compression_codec_from_manifest() {
        assert_eq!(
            CompressionCodec::from_manifest(Some("LZ4_FRAME")),
            CompressionCodec::Lz4Frame
        );
        assert_eq!(
            CompressionCodec::from_manifest(Some("UNKNOWN")),
            CompressionCodec::None
        );
        assert_eq!(CompressionCodec::from_manifest(None), CompressionCodec::None);
        assert_eq!(CompressionCodec::from_lz4_flag(true), CompressionCodec::Lz4Frame);
    }

    #[test]
    fn test_new_sorts_and_validates() {
        let manifest = ChunkManifest::new(
            250,
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
            vec![meta(2, 200, 50), meta(0, 0, 100), meta(1, 100, 100)],
        )
        .unwrap();
        assert_eq!(manifest.chunk_count(), 3);
        assert_eq!(manifest.chunks()[2].row_offset, 200);
    }

    #[test]
    fn test_gap_in_indices_rejected() {
        let result = ChunkManifest::new(
            200,
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
            vec![meta(0, 0, 100), meta(2, 100, 100)],
        );
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let result = ChunkManifest::new(
            300,
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
            vec![meta(0, 0, 100), meta(1, 100, 100)],
        );
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_row_offset_gap_rejected() {
        let result = ChunkManifest::new(
            200,
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
            vec![meta(0, 0, 100), meta(1, 150, 100)],
        );
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = ChunkManifest::new(
            0,
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
            vec![],
        )
        .unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_from_sea_attaches_links() {
        let manifest = sea_manifest(
            vec![chunk_info(0, 0, 100), chunk_info(1, 100, 50)],
            150,
        );
        let result = ResultData {
            chunk_index: Some(0),
            row_offset: Some(0),
            row_count: Some(100),
            next_chunk_index: Some(1),
            external_links: Some(vec![ExternalLink {
                external_link: "https://storage.example.com/chunk0".to_string(),
                expiration: "2099-01-01T00:00:00Z".to_string(),
                chunk_index: 0,
                row_offset: 0,
                row_count: 100,
                byte_count: 100,
                http_headers: None,
                next_chunk_index: Some(1),
            }]),
            attachment: None,
        };

        let chunk_manifest = ChunkManifest::from_sea(&manifest, Some(&result)).unwrap();
        assert_eq!(chunk_manifest.codec(), CompressionCodec::Lz4Frame);
        assert_eq!(chunk_manifest.format(), PayloadFormat::ArrowStream);
        assert!(chunk_manifest.chunks()[0].link.is_some());
        assert!(chunk_manifest.chunks()[1].link.is_none());
    }

    #[test]
    fn test_from_sea_chunk_count_mismatch() {
        let mut manifest = sea_manifest(vec![chunk_info(0, 0, 100)], 100);
        manifest.total_chunk_count = Some(2);
        assert!(matches!(
            ChunkManifest::from_sea(&manifest, None),
            Err(Error::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_from_rpc() {
        let metadata = RpcResultMetadata {
            total_row_count: 30,
            result_links: (0..3)
                .map(|i| RpcResultLink {
                    file_link: format!("https://storage.example.com/file-{}", i),
                    expiry_time_ms: 4_102_444_800_000,
                    start_row_offset: i * 10,
                    row_count: 10,
                    bytes_num: 512,
                    http_headers: HashMap::new(),
                })
                .collect(),
            lz4_compressed: true,
            arrow_format: false,
            inline_rows: None,
        };

        let manifest = ChunkManifest::from_rpc(&metadata).unwrap();
        assert_eq!(manifest.chunk_count(), 3);
        assert_eq!(manifest.format(), PayloadFormat::ColumnarRowSet);
        assert_eq!(manifest.codec(), CompressionCodec::Lz4Frame);
        assert_eq!(manifest.chunks()[2].link.as_ref().unwrap().chunk_index, 2);
    }
}
