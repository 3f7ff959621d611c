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

//! Per-chunk latency and retry events.
//!
//! The provider reports every link resolution, download and retry to a
//! [`TelemetrySink`]. The sink is owned by the session context, so there is no
//! process-wide collector.

use crate::client::retry::FailureClass;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    LinksResolved {
        chunk_indices: Vec<i64>,
        link_count: usize,
        attempts: u32,
        duration: Duration,
    },
    DownloadCompleted {
        chunk_index: i64,
        byte_count: u64,
        row_count: i64,
        attempts: u32,
        duration: Duration,
    },
    DownloadFailed {
        chunk_index: i64,
        retry_count: u32,
        duration: Duration,
        error: String,
    },
    RetryScheduled {
        chunk_index: i64,
        class: FailureClass,
        attempt: u32,
        delay: Duration,
    },
}

pub trait TelemetrySink: Send + Sync + std::fmt::Debug {
    fn record(&self, event: ChunkEvent);
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: ChunkEvent) {
        match event {
            ChunkEvent::LinksResolved {
                chunk_indices,
                link_count,
                attempts,
                duration,
            } => debug!(
                ?chunk_indices,
                link_count,
                attempts,
                duration_ms = duration.as_millis() as u64,
                "chunk links resolved"
            ),
            ChunkEvent::DownloadCompleted {
                chunk_index,
                byte_count,
                row_count,
                attempts,
                duration,
            } => debug!(
                chunk_index,
                byte_count,
                row_count,
                attempts,
                duration_ms = duration.as_millis() as u64,
                "chunk downloaded"
            ),
            ChunkEvent::DownloadFailed {
                chunk_index,
                retry_count,
                duration,
                error,
            } => warn!(
                chunk_index,
                retry_count,
                duration_ms = duration.as_millis() as u64,
                %error,
                "chunk download failed"
            ),
            ChunkEvent::RetryScheduled {
                chunk_index,
                class,
                attempt,
                delay,
            } => debug!(
                chunk_index,
                ?class,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "chunk retry scheduled"
            ),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: ChunkEvent) {}
}

/// Await `fut` and return its output together with the elapsed wall time.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}
