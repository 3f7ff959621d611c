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

//! Indexed table of chunk descriptors.
//!
//! The store does no locking of its own; the chunk provider owns it behind its
//! state mutex and is the only writer. Every status change goes through
//! [`ChunkStatus::can_transition_to`].

use crate::error::{Error, Result};
use crate::types::cloudfetch::{ChunkDescriptor, ChunkStatus, CloudFetchLink};
use crate::types::manifest::ChunkManifest;
use arrow_array::RecordBatch;
use tracing::trace;

/// Copy of a descriptor without its batches.
#[derive(Debug, Clone)]
pub struct ChunkSnapshot {
    pub index: i64,
    pub row_offset: i64,
    pub row_count: i64,
    pub byte_count: i64,
    pub status: ChunkStatus,
    pub retry_count: u32,
    pub attempts: u32,
    pub has_link: bool,
    pub has_data: bool,
    pub error: Option<Error>,
}

impl From<&ChunkDescriptor> for ChunkSnapshot {
    fn from(d: &ChunkDescriptor) -> Self {
        Self {
            index: d.index,
            row_offset: d.row_offset,
            row_count: d.row_count,
            byte_count: d.byte_count,
            status: d.status,
            retry_count: d.retry_count,
            attempts: d.attempts,
            has_link: d.link.is_some(),
            has_data: d.data.is_some(),
            error: d.error.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkStore {
    /// One `Pending` descriptor per manifest chunk, seeded with any embedded link.
    pub fn initialize(manifest: &ChunkManifest) -> Self {
        let chunks = manifest
            .chunks()
            .iter()
            .map(|meta| {
                let mut descriptor = ChunkDescriptor::new(
                    meta.index,
                    meta.row_offset,
                    meta.row_count,
                    meta.byte_count,
                );
                descriptor.link = meta.link.clone();
                descriptor
            })
            .collect();
        Self { chunks }
    }

    pub fn len(&self) -> i64 {
        self.chunks.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn position(&self, index: i64) -> Result<usize> {
        if index < 0 || index >= self.len() {
            return Err(Error::InvalidIndex {
                index,
                chunk_count: self.len(),
            });
        }
        Ok(index as usize)
    }

    pub fn get(&self, index: i64) -> Result<&ChunkDescriptor> {
        let pos = self.position(index)?;
        Ok(&self.chunks[pos])
    }

    pub fn get_mut(&mut self, index: i64) -> Result<&mut ChunkDescriptor> {
        let pos = self.position(index)?;
        Ok(&mut self.chunks[pos])
    }

    pub fn snapshot(&self, index: i64) -> Result<ChunkSnapshot> {
        self.get(index).map(ChunkSnapshot::from)
    }

    /// Move a chunk to `next`, returning the previous status.
    pub fn update_status(&mut self, index: i64, next: ChunkStatus) -> Result<ChunkStatus> {
        let descriptor = self.get_mut(index)?;
        let previous = descriptor.status;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "chunk {} cannot move from {:?} to {:?}",
                index, previous, next
            )));
        }
        descriptor.status = next;
        trace!("Chunk {}: {:?} -> {:?}", index, previous, next);
        Ok(previous)
    }

    /// Attach a link. Chunks that already hold data or are finished keep what they have.
    ///
    /// Returns whether the link was stored.
    pub fn set_link(&mut self, link: CloudFetchLink) -> Result<bool> {
        let descriptor = self.get_mut(link.chunk_index)?;
        match descriptor.status {
            ChunkStatus::Pending | ChunkStatus::LinkResolved | ChunkStatus::Downloading => {
                descriptor.link = Some(link);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Store decoded batches and mark the chunk `Downloaded`.
    pub fn set_data(&mut self, index: i64, batches: Vec<RecordBatch>) -> Result<()> {
        self.update_status(index, ChunkStatus::Downloaded)?;
        let descriptor = self.get_mut(index)?;
        descriptor.data = Some(batches);
        descriptor.error = None;
        Ok(())
    }

    /// Record a fatal failure and mark the chunk `Failed`.
    pub fn set_failed(&mut self, index: i64, error: Error) -> Result<()> {
        self.update_status(index, ChunkStatus::Failed)?;
        let descriptor = self.get_mut(index)?;
        descriptor.data = None;
        descriptor.error = Some(error);
        Ok(())
    }

    /// Mark a downloaded chunk `Consumed` and free its batches.
    ///
    /// Releasing an already consumed chunk is a no-op. Returns whether data was freed.
    pub fn release(&mut self, index: i64) -> Result<bool> {
        let descriptor = self.get_mut(index)?;
        if descriptor.status == ChunkStatus::Consumed {
            return Ok(false);
        }
        self.update_status(index, ChunkStatus::Consumed)?;
        let descriptor = self.get_mut(index)?;
        Ok(descriptor.data.take().is_some())
    }

    /// Mark every unfinished chunk `Released` and free all batches.
    ///
    /// Returns the number of chunks whose data was freed.
    pub fn release_all(&mut self) -> usize {
        let mut freed = 0;
        for descriptor in &mut self.chunks {
            if descriptor.status.can_transition_to(ChunkStatus::Released) {
                descriptor.status = ChunkStatus::Released;
            }
            if descriptor.data.take().is_some() {
                freed += 1;
            }
        }
        freed
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter()
    }
}
