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

//! HTTP-level tests against a local axum server.
//!
//! The server plays both roles: the REST chunk-link endpoint and the cloud
//! storage holding LZ4-compressed Arrow IPC chunk files.

use arrow_array::{Int64Array, RecordBatch};
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{DataType, Field, Schema};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use databricks_cloudfetch::auth::PersonalAccessToken;
use databricks_cloudfetch::client::{
    DatabricksHttpClient, HttpClientConfig, RetryConfig, RetryPolicy, SeaClient,
};
use databricks_cloudfetch::error::Error;
use databricks_cloudfetch::reader::cloudfetch::{ChunkDownloader, HttpChunkDownloader};
use databricks_cloudfetch::reader::{ResultReaderFactory, SessionContext};
use databricks_cloudfetch::types::cloudfetch::{CloudFetchConfig, CloudFetchLink};
use databricks_cloudfetch::types::manifest::{CompressionCodec, PayloadFormat};
use databricks_cloudfetch::types::sea::ResultManifest;
use lz4_flex::frame::FrameEncoder;
use reqwest::Method;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ROWS_PER_CHUNK: i64 = 25;
const CHUNK_COUNT: i64 = 3;
const TOKEN: &str = "test-token";

#[derive(Debug, Default)]
struct ServerState {
    base_url: std::sync::OnceLock<String>,
    link_requests: AtomicUsize,
    flaky_hits: AtomicUsize,
}

/// LZ4-framed Arrow IPC stream with the absolute row numbers of a chunk.
fn chunk_payload(index: i64) -> Vec<u8> {
    let schema = Arc::new(Schema::new(vec![Field::new("row", DataType::Int64, false)]));
    let start = index * ROWS_PER_CHUNK;
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from_iter_values(
            start..start + ROWS_PER_CHUNK,
        ))],
    )
    .unwrap();

    let mut ipc = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut ipc, &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    let mut compressed = Vec::new();
    let mut encoder = FrameEncoder::new(&mut compressed);
    encoder.write_all(&ipc).unwrap();
    encoder.finish().unwrap();
    compressed
}

async fn serve_file(Path(index): Path<i64>) -> Response {
    chunk_payload(index).into_response()
}

/// Two 503s with `Retry-After: 0`, then the payload.
async fn serve_flaky(State(state): State<Arc<ServerState>>) -> Response {
    if state.flaky_hits.fetch_add(1, Ordering::SeqCst) < 2 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("retry-after", "0")],
            "warehouse starting",
        )
            .into_response();
    }
    chunk_payload(0).into_response()
}

async fn serve_secured(headers: HeaderMap) -> Response {
    if headers.get("x-amz-test").and_then(|v| v.to_str().ok()) != Some("signed") {
        return (StatusCode::FORBIDDEN, "missing signature header").into_response();
    }
    if headers.contains_key("authorization") {
        return (StatusCode::BAD_REQUEST, "presigned request carried a token").into_response();
    }
    chunk_payload(0).into_response()
}

async fn serve_links(
    State(state): State<Arc<ServerState>>,
    Path((_statement_id, index)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Response {
    let expected = format!("Bearer {}", TOKEN);
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.link_requests.fetch_add(1, Ordering::SeqCst);

    let base = state.base_url.get().cloned().unwrap_or_default();
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let next = (index + 1 < CHUNK_COUNT).then_some(index + 1);
    Json(serde_json::json!({
        "external_links": [{
            "external_link": format!("{}/files/{}", base, index),
            "expiration": expiration,
            "chunk_index": index,
            "row_offset": index * ROWS_PER_CHUNK,
            "row_count": ROWS_PER_CHUNK,
            "byte_count": 0,
            "next_chunk_index": next
        }],
        "next_chunk_index": next
    }))
    .into_response()
}

async fn start_server() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/files/:index", get(serve_file))
        .route("/flaky", get(serve_flaky))
        .route("/secured", get(serve_secured))
        .route(
            "/api/2.0/sql/statements/:statement_id/result/chunks/:index",
            get(serve_links),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    state.base_url.set(base_url.clone()).unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base_url, state)
}

fn http_client() -> Arc<DatabricksHttpClient> {
    let auth = Arc::new(PersonalAccessToken::new(TOKEN));
    Arc::new(DatabricksHttpClient::new(HttpClientConfig::default(), auth).unwrap())
}

fn link(url: String) -> CloudFetchLink {
    CloudFetchLink {
        url,
        chunk_index: 0,
        row_offset: 0,
        row_count: ROWS_PER_CHUNK,
        byte_count: 0,
        expiration: chrono::Utc::now() + chrono::Duration::hours(1),
        http_headers: HashMap::new(),
        next_chunk_index: None,
    }
}

fn lz4_downloader() -> HttpChunkDownloader {
    HttpChunkDownloader::new(
        http_client(),
        CompressionCodec::Lz4Frame,
        PayloadFormat::ArrowStream,
        0.0,
    )
}

#[tokio::test]
async fn test_downloads_and_decodes_lz4_arrow() {
    let (base_url, _state) = start_server().await;

    let chunk = lz4_downloader()
        .download(&link(format!("{}/files/0", base_url)))
        .await
        .unwrap();

    assert_eq!(chunk.row_count, ROWS_PER_CHUNK);
    assert_eq!(chunk.byte_count, chunk_payload(0).len() as u64);
    assert_eq!(chunk.batches[0].schema().field(0).name(), "row");
}

#[tokio::test]
async fn test_link_headers_are_sent_without_token() {
    let (base_url, _state) = start_server().await;
    let downloader = lz4_downloader();

    let mut signed = link(format!("{}/secured", base_url));
    signed
        .http_headers
        .insert("x-amz-test".to_string(), "signed".to_string());
    assert_eq!(downloader.download(&signed).await.unwrap().row_count, 25);

    let unsigned = link(format!("{}/secured", base_url));
    let err = downloader.download(&unsigned).await.unwrap_err();
    assert!(matches!(err, Error::Http { status: 403, .. }));
}

#[tokio::test]
async fn test_retry_after_zero_is_retried_by_policy() {
    let (base_url, state) = start_server().await;
    let downloader = lz4_downloader();
    let target = link(format!("{}/flaky", base_url));
    let policy = RetryPolicy::new(RetryConfig {
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(10),
        ..Default::default()
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        policy.execute(&Method::GET, &CancellationToken::new(), |_| {
            downloader.download(&target)
        }),
    )
    .await
    .expect("Retry-After: 0 must replace the 5s backoff");

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.result.unwrap().row_count, ROWS_PER_CHUNK);
    assert_eq!(state.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sea_result_end_to_end() {
    let (base_url, state) = start_server().await;
    let http_client = http_client();

    let manifest: ResultManifest = serde_json::from_value(serde_json::json!({
        "format": "ARROW_STREAM",
        "schema": {
            "column_count": 1,
            "columns": [{"name": "row", "type_name": "BIGINT", "position": 0}]
        },
        "total_chunk_count": CHUNK_COUNT,
        "total_row_count": CHUNK_COUNT * ROWS_PER_CHUNK,
        "chunks": (0..CHUNK_COUNT).map(|i| serde_json::json!({
            "chunk_index": i,
            "row_offset": i * ROWS_PER_CHUNK,
            "row_count": ROWS_PER_CHUNK
        })).collect::<Vec<_>>(),
        "result_compression": "LZ4_FRAME"
    }))
    .unwrap();

    let config = CloudFetchConfig {
        max_parallel_chunk_downloads: 2,
        ..Default::default()
    };
    let context = SessionContext::new(
        http_client.clone(),
        config,
        tokio::runtime::Handle::current(),
    );
    let factory = ResultReaderFactory::new(context);
    let client = Arc::new(SeaClient::new(http_client, base_url));

    let mut cursor = factory
        .create_sea_cursor(client, "stmt-1", &manifest, None)
        .unwrap();

    let mut expected = 0;
    while cursor.next_row().await.unwrap() {
        let value = cursor.current_row().unwrap().cell(0).unwrap().as_i64();
        assert_eq!(value, Some(expected));
        expected += 1;
    }

    assert_eq!(expected, CHUNK_COUNT * ROWS_PER_CHUNK);
    assert_eq!(state.link_requests.load(Ordering::SeqCst), CHUNK_COUNT as usize);
    let provider = cursor.provider().unwrap();
    assert!(provider.peak_chunks_in_memory() <= 2);
    assert_eq!(provider.row_count(), CHUNK_COUNT * ROWS_PER_CHUNK);
}
