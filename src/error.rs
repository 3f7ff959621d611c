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

//! Error taxonomy for the chunk retrieval engine.
//!
//! Classification guidance:
//! - [`Error::Http`] / [`Error::Transport`]: raw outcome of a single network attempt,
//!   classified by the retry policy
//! - [`Error::LinkResolution`] / [`Error::ChunkDownload`]: attached to a specific chunk
//!   once retrying gave up
//! - [`Error::Decompression`] / [`Error::Parse`]: corrupt payloads, never retried
//! - [`Error::Request`]: malformed URL, header or client setup, never retried
//! - [`Error::InvalidIndex`] / [`Error::ProviderClosed`]: usage errors, never retried
//!
//! The enum is `Clone` so that a failure recorded on a chunk descriptor can be handed
//! to the consumer on the read that needs the chunk.

use crate::client::retry::FailureClass;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Non-success HTTP status.
    #[error("HTTP {status} - {message}")]
    Http {
        status: u16,
        /// Parsed numeric `Retry-After` header, if the server sent one.
        retry_after: Option<Duration>,
        message: String,
    },

    /// Connect, timeout, reset or body-read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built or was rejected before reaching the network.
    #[error("request error: {0}")]
    Request(String),

    /// Link metadata could not be obtained for the given chunks.
    #[error("failed to resolve links for chunks {chunk_indices:?}: {source}")]
    LinkResolution {
        chunk_indices: Vec<i64>,
        source: Box<Error>,
    },

    /// A chunk could not be downloaded or decoded.
    #[error("failed to download chunk {chunk_index} after {retry_count} retries: {source}")]
    ChunkDownload {
        chunk_index: i64,
        retry_count: u32,
        source: Box<Error>,
    },

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("payload parse failed: {0}")]
    Parse(String),

    /// The retry budget of one failure class ran out.
    #[error("retry budget exhausted for {class:?} after {attempts} attempts ({waited:?} waited): {source}")]
    RetryBudgetExhausted {
        class: FailureClass,
        attempts: u32,
        waited: Duration,
        source: Box<Error>,
    },

    #[error("chunk index {index} out of range [0, {chunk_count})")]
    InvalidIndex { index: i64, chunk_count: i64 },

    #[error("chunk provider is closed")]
    ProviderClosed,

    /// A chunk status change that the state machine does not allow.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Manifest is malformed (non-contiguous indices, counts that do not add up).
    #[error("invalid result manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status of the innermost error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::LinkResolution { source, .. }
            | Error::ChunkDownload { source, .. }
            | Error::RetryBudgetExhausted { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// True when the payload itself is bad, so downloading it again cannot help.
    pub fn is_corrupt_data(&self) -> bool {
        match self {
            Error::Decompression(_) | Error::Parse(_) => true,
            Error::ChunkDownload { source, .. } => source.is_corrupt_data(),
            _ => false,
        }
    }

    /// Strips chunk-level wrappers and returns the underlying cause.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::LinkResolution { source, .. }
            | Error::ChunkDownload { source, .. }
            | Error::RetryBudgetExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl Error {
    /// Map a reqwest failure, prefixing `context`.
    ///
    /// Only timeouts, connect failures, send failures and body-read failures become
    /// [`Error::Transport`]; builder, redirect and decode failures are [`Error::Request`].
    pub fn from_reqwest(context: &str, e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Error::Http {
                status: status.as_u16(),
                retry_after: None,
                message: format!("{}: {}", context, e),
            };
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            Error::Transport(format!("{}: {}", context, e))
        } else {
            Error::Request(format!("{}: {}", context, e))
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::from_reqwest("request failed", e)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
