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

//! Result readers for fetching query results from Databricks.
//!
//! This module provides:
//! - `SessionContext`: Per-connection collaborators shared by every result
//! - `ResultReaderFactory`: Picks chunked, inline or empty reading per result
//! - `RowCursor`: Row-at-a-time access over any of them

pub mod cloudfetch;
pub mod inline;
mod row_cursor;

use crate::auth::AuthProvider;
use crate::client::{DatabricksClient, DatabricksHttpClient, RpcResultsClient};
use crate::error::{Error, Result};
use crate::logging::init_logging;
use crate::options::DriverOptions;
use crate::reader::cloudfetch::{
    ChunkDownloader, ChunkProvider, HttpChunkDownloader, LinkResolver, RpcLinkResolver,
    SeaLinkResolver,
};
use crate::reader::inline::InlineProvider;
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use crate::types::cloudfetch::CloudFetchConfig;
use crate::types::manifest::{ChunkManifest, CompressionCodec, PayloadFormat};
use crate::types::rpc::RpcResultMetadata;
use crate::types::sea::{ResultData, ResultManifest};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub use row_cursor::{Cell, RowCursor, RowView};
use row_cursor::CursorSource;

/// Collaborators shared by all results of one connection.
///
/// Created with the connection and dropped with it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    http_client: Arc<DatabricksHttpClient>,
    config: CloudFetchConfig,
    telemetry: Arc<dyn TelemetrySink>,
    runtime_handle: tokio::runtime::Handle,
}

impl SessionContext {
    pub fn new(
        http_client: Arc<DatabricksHttpClient>,
        config: CloudFetchConfig,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            http_client,
            config,
            telemetry: Arc::new(TracingTelemetry),
            runtime_handle,
        }
    }

    /// Build the HTTP client and context from parsed driver options.
    ///
    /// Also installs logging on first use.
    pub fn from_options(
        options: &DriverOptions,
        auth_provider: Arc<dyn AuthProvider>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Result<Self> {
        init_logging(&options.log);
        options.cloudfetch.validate()?;
        let http_client = Arc::new(DatabricksHttpClient::new(
            options.http.clone(),
            auth_provider,
        )?);
        Ok(Self::new(
            http_client,
            options.cloudfetch.clone(),
            runtime_handle,
        ))
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn http_client(&self) -> &Arc<DatabricksHttpClient> {
        &self.http_client
    }

    pub fn config(&self) -> &CloudFetchConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn runtime_handle(&self) -> &tokio::runtime::Handle {
        &self.runtime_handle
    }
}

/// Factory that creates the appropriate cursor for a finished statement.
///
/// Inline payloads are read directly; results split into external chunks go
/// through a [`ChunkProvider`]; results with neither are empty.
#[derive(Debug, Clone)]
pub struct ResultReaderFactory {
    context: SessionContext,
}

impl ResultReaderFactory {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Create a cursor for a REST (SEA) result.
    pub fn create_sea_cursor(
        &self,
        client: Arc<dyn DatabricksClient>,
        statement_id: &str,
        manifest: &ResultManifest,
        result: Option<&ResultData>,
    ) -> Result<RowCursor> {
        tracing::debug!(
            "Result manifest: total_chunks={:?}, total_rows={:?}, total_bytes={:?}, truncated={}",
            manifest.total_chunk_count,
            manifest.total_row_count,
            manifest.total_byte_count,
            manifest.truncated
        );

        let schema = extract_schema_from_manifest(manifest);
        let codec = CompressionCodec::from_manifest(manifest.result_compression.as_deref());

        if let Some(attachment) = result
            .and_then(|r| r.attachment.as_deref())
            .filter(|a| !a.is_empty())
        {
            tracing::info!(
                "Using inline reader: {} bytes of Arrow IPC data",
                attachment.len()
            );
            return self.create_inline_cursor(attachment, codec, PayloadFormat::ArrowStream, schema);
        }

        let chunk_manifest = ChunkManifest::from_sea(manifest, result)?;
        if chunk_manifest.is_empty() {
            tracing::info!("Using empty reader: no chunks for statement {}", statement_id);
            return Ok(RowCursor::new(CursorSource::Empty, schema));
        }

        tracing::info!(
            "Using CloudFetch reader: {} chunks for statement {}",
            chunk_manifest.chunk_count(),
            statement_id
        );
        let resolver = Arc::new(SeaLinkResolver::new(client, statement_id));
        let downloader = self.http_downloader(&chunk_manifest);
        self.create_chunked_cursor(&chunk_manifest, resolver, downloader, schema)
    }

    /// Create a cursor for a legacy RPC result.
    pub fn create_rpc_cursor(
        &self,
        client: Arc<dyn RpcResultsClient>,
        statement_id: &str,
        metadata: &RpcResultMetadata,
    ) -> Result<RowCursor> {
        let codec = CompressionCodec::from_lz4_flag(metadata.lz4_compressed);
        let format = if metadata.arrow_format {
            PayloadFormat::ArrowStream
        } else {
            PayloadFormat::ColumnarRowSet
        };

        if let Some(rows) = metadata.inline_rows.as_deref().filter(|r| !r.is_empty()) {
            tracing::info!("Using inline reader: {} bytes of inline rows", rows.len());
            return self.create_inline_cursor(rows, codec, format, None);
        }

        let chunk_manifest = ChunkManifest::from_rpc(metadata)?;
        if chunk_manifest.is_empty() {
            tracing::info!("Using empty reader: no result links for statement {}", statement_id);
            return Ok(RowCursor::new(CursorSource::Empty, None));
        }

        tracing::info!(
            "Using CloudFetch reader: {} result links for statement {}",
            chunk_manifest.chunk_count(),
            statement_id
        );
        let resolver = Arc::new(RpcLinkResolver::new(
            client,
            statement_id,
            &chunk_manifest,
            self.context.config.link_expiry_buffer_secs,
        ));
        let downloader = self.http_downloader(&chunk_manifest);
        self.create_chunked_cursor(&chunk_manifest, resolver, downloader, None)
    }

    /// Create a cursor over a chunked result with explicit collaborators.
    pub fn create_chunked_cursor(
        &self,
        manifest: &ChunkManifest,
        resolver: Arc<dyn LinkResolver>,
        downloader: Arc<dyn ChunkDownloader>,
        schema: Option<SchemaRef>,
    ) -> Result<RowCursor> {
        let config = &self.context.config;
        if !config.enabled && !manifest.is_empty() {
            return Err(Error::InvalidConfig(
                "CloudFetch is disabled but the result is only available as external chunks"
                    .to_string(),
            ));
        }

        let provider = ChunkProvider::new(
            manifest,
            resolver,
            downloader,
            config.clone(),
            self.context.telemetry.clone(),
            self.context.runtime_handle.clone(),
        )?;
        Ok(RowCursor::new(CursorSource::Chunked(provider), schema))
    }

    fn create_inline_cursor(
        &self,
        data: &[u8],
        codec: CompressionCodec,
        format: PayloadFormat,
        schema: Option<SchemaRef>,
    ) -> Result<RowCursor> {
        let provider = InlineProvider::new(data, codec, format)?;
        let schema = schema.or_else(|| provider.schema().cloned());
        Ok(RowCursor::new(CursorSource::Inline(provider), schema))
    }

    fn http_downloader(&self, manifest: &ChunkManifest) -> Arc<dyn ChunkDownloader> {
        Arc::new(HttpChunkDownloader::new(
            self.context.http_client.clone(),
            manifest.codec(),
            manifest.format(),
            self.context.config.speed_threshold_mbps,
        ))
    }
}

/// Arrow schema declared by the manifest, if it has one.
fn extract_schema_from_manifest(manifest: &ResultManifest) -> Option<SchemaRef> {
    let schema = manifest.schema.as_ref()?;
    let fields: Vec<Field> = schema
        .columns
        .iter()
        .map(|col| Field::new(&col.name, map_databricks_type(&col.type_name), true))
        .collect();
    Some(Arc::new(Schema::new(fields)))
}

/// Map Databricks SQL type names to Arrow DataTypes.
fn map_databricks_type(type_name: &str) -> DataType {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" => DataType::Boolean,
        "BYTE" | "TINYINT" => DataType::Int8,
        "SHORT" | "SMALLINT" => DataType::Int16,
        "INT" | "INTEGER" => DataType::Int32,
        "LONG" | "BIGINT" => DataType::Int64,
        "FLOAT" | "REAL" => DataType::Float32,
        "DOUBLE" => DataType::Float64,
        "STRING" => DataType::Utf8,
        "BINARY" => DataType::Binary,
        "DATE" => DataType::Date32,
        "TIMESTAMP" | "TIMESTAMP_NTZ" => {
            DataType::Timestamp(arrow_schema::TimeUnit::Microsecond, None)
        }
        // Complex and unknown types; the downloaded data carries the real type
        _ => {
            tracing::debug!("Unknown Databricks type '{}', mapping to Utf8", type_name);
            DataType::Utf8
        }
    }
}
