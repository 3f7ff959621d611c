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

//! Chunk provider: orchestrates link resolution and parallel downloads and
//! hands chunks to the consumer strictly in index order.
//!
//! ## Architecture
//!
//! ```text
//!            advance()                     spawned per claimed chunk
//!  consumer ──────────► fill() ──claim──► run_chunk(i)
//!     ▲                   │                 ├─ ensure_link   (retry policy)
//!     │                   │                 ├─ download      (retry policy)
//!     │                   ▼                 └─ complete ──► store + notify
//!     └──── wait_for_chunk(i) ◄───────── chunk_state_changed
//! ```
//!
//! All shared state (descriptor store, counters, in-flight tasks) lives in one
//! `ProviderState` behind a `std::sync::Mutex` that is never held across an
//! `.await`. Download tasks do their network I/O without the lock and apply
//! their result in one short critical section.
//!
//! ## Memory bound
//!
//! A chunk counts against `allowed_chunks_in_memory` from the moment `fill`
//! claims it until the consumer moves past it (or it fails). `fill` never
//! claims more, so the number of chunks resolving, downloading or held
//! downloaded never exceeds the bound.
//!
//! ## Close
//!
//! `close()` sets the closed flag under the same lock `fill` claims under,
//! cancels the token, aborts every in-flight task and releases all batches.
//! A task that finishes concurrently sees the flag and discards its result.

use crate::client::retry::RetryPolicy;
use crate::error::{Error, Result};
use crate::reader::cloudfetch::chunk_downloader::{ChunkDownloader, DownloadedChunk};
use crate::reader::cloudfetch::chunk_store::{ChunkSnapshot, ChunkStore};
use crate::reader::cloudfetch::link_fetcher::{LinkRequest, LinkResolver};
use crate::telemetry::{timed, ChunkEvent, TelemetrySink};
use crate::types::cloudfetch::{ChunkStatus, CloudFetchConfig, CloudFetchLink};
use crate::types::manifest::ChunkManifest;
use arrow_array::RecordBatch;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// A downloaded chunk handed to the consumer.
#[derive(Debug, Clone)]
pub struct ChunkHandle {
    pub index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    pub batches: Vec<RecordBatch>,
}

#[derive(Debug)]
struct ProviderState {
    store: ChunkStore,
    next_chunk_to_download: i64,
    total_chunks_in_memory: usize,
    peak_chunks_in_memory: usize,
    /// Index last handed to the consumer, -1 before the first advance.
    current_chunk_index: i64,
    in_flight: HashMap<i64, AbortHandle>,
    is_closed: bool,
    /// Set once any chunk failed; no further chunks are claimed.
    dispatch_halted: bool,
    /// Failure already returned to the consumer, returned again on later advances.
    surfaced_failure: Option<Error>,
}

/// Failure of one chunk task together with the attempts it took.
struct ChunkFailure {
    error: Error,
    attempts: u32,
}

impl ChunkFailure {
    fn new(error: Error, attempts: u32) -> Self {
        Self { error, attempts }
    }
}

struct ProviderInner {
    state: Mutex<ProviderState>,
    chunk_state_changed: Notify,
    resolver: Arc<dyn LinkResolver>,
    downloader: Arc<dyn ChunkDownloader>,
    retry_policy: RetryPolicy,
    telemetry: Arc<dyn TelemetrySink>,
    config: CloudFetchConfig,
    cancel_token: CancellationToken,
    runtime_handle: Handle,
    chunk_count: i64,
    total_row_count: i64,
    allowed_chunks_in_memory: usize,
}

/// Orchestrator for one chunked result.
pub struct ChunkProvider {
    inner: Arc<ProviderInner>,
}

impl std::fmt::Debug for ChunkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ChunkProvider")
            .field("chunk_count", &self.inner.chunk_count)
            .field("total_row_count", &self.inner.total_row_count)
            .field("allowed_chunks_in_memory", &self.inner.allowed_chunks_in_memory)
            .field("next_chunk_to_download", &state.next_chunk_to_download)
            .field("total_chunks_in_memory", &state.total_chunks_in_memory)
            .field("current_chunk_index", &state.current_chunk_index)
            .field("in_flight", &state.in_flight.len())
            .field("is_closed", &state.is_closed)
            .finish()
    }
}

impl ChunkProvider {
    /// Create a provider and start downloading the first chunks.
    ///
    /// Tasks are spawned on `runtime_handle`.
    pub fn new(
        manifest: &ChunkManifest,
        resolver: Arc<dyn LinkResolver>,
        downloader: Arc<dyn ChunkDownloader>,
        config: CloudFetchConfig,
        telemetry: Arc<dyn TelemetrySink>,
        runtime_handle: Handle,
    ) -> Result<Self> {
        config.validate()?;

        let chunk_count = manifest.chunk_count();
        let allowed_chunks_in_memory = config
            .max_parallel_chunk_downloads
            .min(usize::try_from(chunk_count).unwrap_or(0));

        debug!(
            "Creating chunk provider: {} chunks, {} rows, {} allowed in memory, codec={:?}, format={:?}",
            chunk_count,
            manifest.total_row_count(),
            allowed_chunks_in_memory,
            manifest.codec(),
            manifest.format()
        );

        let state = ProviderState {
            store: ChunkStore::initialize(manifest),
            next_chunk_to_download: 0,
            total_chunks_in_memory: 0,
            peak_chunks_in_memory: 0,
            current_chunk_index: -1,
            in_flight: HashMap::new(),
            is_closed: false,
            dispatch_halted: false,
            surfaced_failure: None,
        };

        let inner = Arc::new(ProviderInner {
            state: Mutex::new(state),
            chunk_state_changed: Notify::new(),
            resolver,
            downloader,
            retry_policy: RetryPolicy::new(config.retry.clone()),
            telemetry,
            config,
            cancel_token: CancellationToken::new(),
            runtime_handle,
            chunk_count,
            total_row_count: manifest.total_row_count(),
            allowed_chunks_in_memory,
        });

        ProviderInner::fill(&inner);
        Ok(Self { inner })
    }

    /// Whether `advance` would yield another chunk.
    pub fn has_next(&self) -> bool {
        let state = self.inner.lock();
        !state.is_closed
            && state.surfaced_failure.is_none()
            && state.current_chunk_index + 1 < self.inner.chunk_count
    }

    /// Release the chunk handed out last and wait for the next one.
    ///
    /// Returns `Ok(None)` once every chunk was handed out. A chunk that failed
    /// returns its error here, on the read that needs it, and on every later call.
    ///
    /// Cancel safe: if the future is dropped before it resolves, the next call
    /// waits for the same chunk again.
    pub async fn advance(&self) -> Result<Option<ChunkHandle>> {
        let index = {
            let mut state = self.inner.lock();
            if state.is_closed {
                return Err(Error::ProviderClosed);
            }
            if let Some(ref failure) = state.surfaced_failure {
                return Err(failure.clone());
            }

            let previous = state.current_chunk_index;
            if previous >= 0 && previous < self.inner.chunk_count {
                self.inner.release_chunk(&mut *state, previous)?;
            }

            let next = previous + 1;
            if next >= self.inner.chunk_count {
                state.current_chunk_index = self.inner.chunk_count;
                trace!("Chunk provider exhausted after {} chunks", self.inner.chunk_count);
                return Ok(None);
            }
            next
        };

        ProviderInner::fill(&self.inner);
        self.inner.wait_for_chunk(index).await.map(Some)
    }

    /// Stop all work and free every chunk. Safe to call repeatedly and from any thread.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn descriptor(&self, index: i64) -> Result<ChunkSnapshot> {
        self.inner.lock().store.snapshot(index)
    }

    pub fn total_chunks_in_memory(&self) -> usize {
        self.inner.lock().total_chunks_in_memory
    }

    pub fn peak_chunks_in_memory(&self) -> usize {
        self.inner.lock().peak_chunks_in_memory
    }

    pub fn allowed_chunks_in_memory(&self) -> usize {
        self.inner.allowed_chunks_in_memory
    }

    pub fn next_chunk_to_download(&self) -> i64 {
        self.inner.lock().next_chunk_to_download
    }

    pub fn chunk_count(&self) -> i64 {
        self.inner.chunk_count
    }

    pub fn row_count(&self) -> i64 {
        self.inner.total_row_count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed
    }
}

impl Drop for ChunkProvider {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl ProviderInner {
    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim chunks in index order until the memory bound is reached.
    fn fill(this: &Arc<Self>) {
        let mut state = this.lock();
        while !state.is_closed
            && !state.dispatch_halted
            && state.next_chunk_to_download < this.chunk_count
            && state.total_chunks_in_memory < this.allowed_chunks_in_memory
        {
            let index = state.next_chunk_to_download;
            state.next_chunk_to_download += 1;
            state.total_chunks_in_memory += 1;
            state.peak_chunks_in_memory = state
                .peak_chunks_in_memory
                .max(state.total_chunks_in_memory);

            debug!(
                "Scheduling chunk {}: chunks_in_memory={}/{}, consumer_at={}",
                index,
                state.total_chunks_in_memory,
                this.allowed_chunks_in_memory,
                state.current_chunk_index
            );

            let task = Arc::clone(this);
            let handle = this
                .runtime_handle
                .spawn(async move { task.run_chunk(index).await });
            state.in_flight.insert(index, handle.abort_handle());
        }
    }

    /// Mark a handed-out chunk consumed and free its slot.
    fn release_chunk(&self, state: &mut ProviderState, index: i64) -> Result<()> {
        if state.store.get(index)?.status != ChunkStatus::Downloaded {
            return Ok(());
        }
        state.store.release(index)?;
        state.total_chunks_in_memory = state.total_chunks_in_memory.saturating_sub(1);
        trace!(
            "Released chunk {}: chunks_in_memory={}",
            index,
            state.total_chunks_in_memory
        );
        Ok(())
    }

    async fn run_chunk(self: Arc<Self>, index: i64) {
        let started = Instant::now();
        let outcome = self.fetch_chunk(index).await;
        self.complete(index, outcome, started);
    }

    async fn fetch_chunk(&self, index: i64) -> std::result::Result<(DownloadedChunk, u32), ChunkFailure> {
        self.ensure_link(index).await?;

        {
            let mut state = self.lock();
            if state.is_closed {
                return Err(ChunkFailure::new(Error::ProviderClosed, 0));
            }
            state
                .store
                .update_status(index, ChunkStatus::Downloading)
                .map_err(|e| ChunkFailure::new(e, 0))?;
        }

        let outcome = self
            .retry_policy
            .execute_observed(
                &Method::GET,
                &self.cancel_token,
                |class, attempt, delay| {
                    self.telemetry.record(ChunkEvent::RetryScheduled {
                        chunk_index: index,
                        class,
                        attempt,
                        delay,
                    })
                },
                |_| self.download_attempt(index),
            )
            .await;

        match outcome.result {
            Ok(chunk) => Ok((chunk, outcome.attempts)),
            Err(e) => Err(ChunkFailure::new(e, outcome.attempts)),
        }
    }

    /// Make sure the chunk has a fresh link, resolving one if needed.
    async fn ensure_link(&self, index: i64) -> std::result::Result<(), ChunkFailure> {
        let request = {
            let mut state = self.lock();
            if state.is_closed {
                return Err(ChunkFailure::new(Error::ProviderClosed, 0));
            }
            let descriptor = state
                .store
                .get(index)
                .map_err(|e| ChunkFailure::new(e, 0))?;
            if descriptor.has_usable_link(self.config.link_expiry_buffer_secs) {
                state
                    .store
                    .update_status(index, ChunkStatus::LinkResolved)
                    .map_err(|e| ChunkFailure::new(e, 0))?;
                return Ok(());
            }
            LinkRequest {
                chunk_index: index,
                row_offset: descriptor.row_offset,
            }
        };

        debug!("Chunk {} has no usable link, resolving", index);
        let method = self.resolver.http_method();
        let (outcome, duration) = timed(self.retry_policy.execute_observed(
            &method,
            &self.cancel_token,
            |class, attempt, delay| {
                self.telemetry.record(ChunkEvent::RetryScheduled {
                    chunk_index: index,
                    class,
                    attempt,
                    delay,
                })
            },
            |_| self.resolver.resolve_links(std::slice::from_ref(&request)),
        ))
        .await;

        let attempts = outcome.attempts;
        let links = outcome.result.map_err(|e| {
            ChunkFailure::new(
                Error::LinkResolution {
                    chunk_indices: vec![index],
                    source: Box::new(e),
                },
                attempts,
            )
        })?;

        self.telemetry.record(ChunkEvent::LinksResolved {
            chunk_indices: vec![index],
            link_count: links.len(),
            attempts,
            duration,
        });

        self.apply_links(index, links)
            .map_err(|e| ChunkFailure::new(e, attempts))?;
        let mut state = self.lock();
        state
            .store
            .update_status(index, ChunkStatus::LinkResolved)
            .map_err(|e| ChunkFailure::new(e, attempts))?;
        Ok(())
    }

    /// Store resolved links, including those for chunks not yet claimed.
    fn apply_links(&self, index: i64, links: HashMap<i64, CloudFetchLink>) -> Result<()> {
        let mut state = self.lock();
        if state.is_closed {
            return Err(Error::ProviderClosed);
        }
        for (_, link) in links {
            let link_index = link.chunk_index;
            match state.store.set_link(link) {
                Ok(true) => trace!("Applied link for chunk {}", link_index),
                Ok(false) => trace!("Chunk {} no longer needs a link", link_index),
                Err(e) => debug!("Ignoring link for chunk {}: {}", link_index, e),
            }
        }
        if state.store.get(index)?.link.is_none() {
            return Err(Error::InvalidManifest(format!(
                "no link was resolved for chunk {}",
                index
            )));
        }
        Ok(())
    }

    /// One download attempt. Refreshes the link first if it expired while retrying.
    async fn download_attempt(&self, index: i64) -> Result<DownloadedChunk> {
        let current = {
            let state = self.lock();
            if state.is_closed {
                return Err(Error::ProviderClosed);
            }
            let descriptor = state.store.get(index)?;
            descriptor
                .link
                .clone()
                .filter(|_| descriptor.has_usable_link(self.config.link_expiry_buffer_secs))
        };

        let link = match current {
            Some(link) => link,
            None => self.refresh_link(index).await?,
        };
        self.downloader.download(&link).await
    }

    async fn refresh_link(&self, index: i64) -> Result<CloudFetchLink> {
        let request = {
            let mut state = self.lock();
            let row_offset = state.store.get(index)?.row_offset;
            state.store.update_status(index, ChunkStatus::LinkResolved)?;
            LinkRequest {
                chunk_index: index,
                row_offset,
            }
        };
        debug!("Link for chunk {} expired during download, refreshing", index);

        let links = self
            .resolver
            .resolve_links(std::slice::from_ref(&request))
            .await?;
        self.apply_links(index, links)?;

        let mut state = self.lock();
        state.store.update_status(index, ChunkStatus::Downloading)?;
        state
            .store
            .get(index)?
            .link
            .clone()
            .ok_or_else(|| Error::InvalidState(format!("chunk {} lost its link", index)))
    }

    /// Apply a task's outcome to the store and wake waiting consumers.
    fn complete(
        &self,
        index: i64,
        outcome: std::result::Result<(DownloadedChunk, u32), ChunkFailure>,
        started: Instant,
    ) {
        let duration = started.elapsed();
        let event = {
            let mut state = self.lock();
            state.in_flight.remove(&index);
            if state.is_closed {
                debug!("Discarding result of chunk {} after close", index);
                return;
            }

            match outcome {
                Ok((chunk, attempts)) => {
                    let byte_count = chunk.byte_count;
                    let row_count = chunk.row_count;
                    if let Ok(descriptor) = state.store.get_mut(index) {
                        descriptor.attempts = attempts;
                        descriptor.retry_count = attempts.saturating_sub(1);
                    }
                    match state.store.set_data(index, chunk.batches) {
                        Ok(()) => ChunkEvent::DownloadCompleted {
                            chunk_index: index,
                            byte_count,
                            row_count,
                            attempts,
                            duration,
                        },
                        Err(e) => {
                            error!("Could not store chunk {}: {}", index, e);
                            self.fail_chunk(&mut *state, index, e, attempts, duration)
                        }
                    }
                }
                Err(ChunkFailure { error, attempts }) => {
                    let error = match error {
                        e @ (Error::LinkResolution { .. } | Error::ProviderClosed) => e,
                        e => Error::ChunkDownload {
                            chunk_index: index,
                            retry_count: attempts.saturating_sub(1),
                            source: Box::new(e),
                        },
                    };
                    self.fail_chunk(&mut *state, index, error, attempts, duration)
                }
            }
        };

        self.telemetry.record(event);
        self.chunk_state_changed.notify_waiters();
    }

    fn fail_chunk(
        &self,
        state: &mut ProviderState,
        index: i64,
        error: Error,
        attempts: u32,
        duration: std::time::Duration,
    ) -> ChunkEvent {
        let retry_count = attempts.saturating_sub(1);
        error!("Chunk {} failed after {} attempts: {}", index, attempts, error);

        if let Ok(descriptor) = state.store.get_mut(index) {
            descriptor.attempts = attempts;
            descriptor.retry_count = retry_count;
        }
        if let Err(e) = state.store.set_failed(index, error.clone()) {
            warn!("Could not mark chunk {} failed: {}", index, e);
        }
        state.dispatch_halted = true;
        state.total_chunks_in_memory = state.total_chunks_in_memory.saturating_sub(1);

        ChunkEvent::DownloadFailed {
            chunk_index: index,
            retry_count,
            duration,
            error: error.to_string(),
        }
    }

    async fn wait_for_chunk(&self, index: i64) -> Result<ChunkHandle> {
        let wait_started = Instant::now();
        loop {
            let notified = self.chunk_state_changed.notified();
            tokio::pin!(notified);
            // Register before checking state so a completion in between is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.is_closed {
                    return Err(Error::ProviderClosed);
                }
                let descriptor = state.store.get(index)?;
                let status = descriptor.status;
                match status {
                    ChunkStatus::Downloaded => {
                        trace!("Chunk {} ready after {:?}", index, wait_started.elapsed());
                        let handle = ChunkHandle {
                            index,
                            row_offset: descriptor.row_offset,
                            row_count: descriptor.row_count,
                            batches: descriptor.data.clone().unwrap_or_default(),
                        };
                        // Only a chunk actually returned counts as handed out.
                        state.current_chunk_index = index;
                        return Ok(handle);
                    }
                    ChunkStatus::Failed => {
                        let failure = descriptor.error.clone().unwrap_or_else(|| {
                            Error::InvalidState(format!("chunk {} failed", index))
                        });
                        state.surfaced_failure = Some(failure.clone());
                        return Err(failure);
                    }
                    ChunkStatus::Consumed | ChunkStatus::Released => {
                        return Err(Error::InvalidState(format!(
                            "chunk {} is no longer available",
                            index
                        )));
                    }
                    ChunkStatus::Pending | ChunkStatus::LinkResolved | ChunkStatus::Downloading => {}
                }
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    return Err(Error::ProviderClosed);
                }
                _ = &mut notified => {
                    // State changed, loop to check
                }
                _ = tokio::time::sleep(self.config.chunk_ready_timeout) => {
                    debug!(
                        "Still waiting for chunk {} after {:?}, continuing...",
                        index,
                        wait_started.elapsed()
                    );
                }
            }
        }
    }

    fn close(&self) {
        let (aborted, freed) = {
            let mut state = self.lock();
            if state.is_closed {
                return;
            }
            state.is_closed = true;
            self.cancel_token.cancel();

            let aborted = state.in_flight.len();
            for (_, handle) in state.in_flight.drain() {
                handle.abort();
            }
            let freed = state.store.release_all();
            state.total_chunks_in_memory = 0;
            (aborted, freed)
        };

        self.chunk_state_changed.notify_waiters();
        debug!(
            "Chunk provider closed: {} in-flight tasks aborted, {} chunks freed",
            aborted, freed
        );
    }
}
