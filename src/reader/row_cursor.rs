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

//! Row-at-a-time view over a result.
//!
//! The cursor walks the batches of the current chunk and asks its source for
//! the next chunk once they run out. End of data is `Ok(false)`, not an error.
//! Typed conversion beyond the primitive accessors on [`Cell`] is left to the
//! caller.

use crate::error::{Error, Result};
use crate::reader::cloudfetch::ChunkProvider;
use crate::reader::inline::InlineProvider;
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use std::collections::VecDeque;

/// Where the cursor's batches come from.
#[derive(Debug)]
pub(crate) enum CursorSource {
    Chunked(ChunkProvider),
    Inline(InlineProvider),
    Empty,
}

/// Forward-only row cursor.
#[derive(Debug)]
pub struct RowCursor {
    source: CursorSource,
    schema: Option<SchemaRef>,
    pending: VecDeque<RecordBatch>,
    batch: Option<RecordBatch>,
    row: usize,
    rows_read: i64,
    closed: bool,
}

impl RowCursor {
    pub(crate) fn new(source: CursorSource, schema: Option<SchemaRef>) -> Self {
        Self {
            source,
            schema,
            pending: VecDeque::new(),
            batch: None,
            row: 0,
            rows_read: 0,
            closed: false,
        }
    }

    /// Move to the next row. Returns `false` once all rows were read.
    pub async fn next_row(&mut self) -> Result<bool> {
        if self.closed {
            return Err(Error::ProviderClosed);
        }

        if let Some(ref batch) = self.batch {
            if self.row + 1 < batch.num_rows() {
                self.row += 1;
                self.rows_read += 1;
                return Ok(true);
            }
        }

        loop {
            if let Some(batch) = self.pending.pop_front() {
                if batch.num_rows() == 0 {
                    continue;
                }
                if self.schema.is_none() {
                    self.schema = Some(batch.schema());
                }
                self.batch = Some(batch);
                self.row = 0;
                self.rows_read += 1;
                return Ok(true);
            }

            let more = match &mut self.source {
                CursorSource::Chunked(provider) => match provider.advance().await? {
                    Some(chunk) => {
                        tracing::trace!(
                            "Cursor moved to chunk {} ({} rows)",
                            chunk.index,
                            chunk.row_count
                        );
                        self.pending.extend(chunk.batches);
                        true
                    }
                    None => false,
                },
                CursorSource::Inline(provider) => match provider.next_batch() {
                    Some(batch) => {
                        self.pending.push_back(batch);
                        true
                    }
                    None => false,
                },
                CursorSource::Empty => false,
            };

            if !more {
                self.batch = None;
                return Ok(false);
            }
        }
    }

    /// The row `next_row` last moved to.
    pub fn current_row(&self) -> Option<RowView<'_>> {
        self.batch.as_ref().map(|batch| RowView {
            batch,
            row: self.row,
        })
    }

    /// Whether rows may remain after the current one.
    pub fn has_next(&self) -> bool {
        if self.closed {
            return false;
        }
        let in_batch = self
            .batch
            .as_ref()
            .is_some_and(|b| self.row + 1 < b.num_rows());
        if in_batch || self.pending.iter().any(|b| b.num_rows() > 0) {
            return true;
        }
        match &self.source {
            CursorSource::Chunked(provider) => provider.has_next(),
            CursorSource::Inline(provider) => provider.has_more(),
            CursorSource::Empty => false,
        }
    }

    /// Result schema, known upfront or taken from the first batch.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub fn rows_read(&self) -> i64 {
        self.rows_read
    }

    /// The orchestrator behind a chunked result.
    pub fn provider(&self) -> Option<&ChunkProvider> {
        match &self.source {
            CursorSource::Chunked(provider) => Some(provider),
            _ => None,
        }
    }

    /// Release all data. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let CursorSource::Chunked(ref provider) = self.source {
            provider.close();
        }
        self.pending.clear();
        self.batch = None;
        tracing::debug!("Row cursor closed after {} rows", self.rows_read);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// One row of the current batch.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    batch: &'a RecordBatch,
    row: usize,
}

impl<'a> RowView<'a> {
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_name(&self, column: usize) -> Option<&'a str> {
        let schema = self.batch.schema_ref();
        (column < schema.fields().len()).then(|| schema.field(column).name().as_str())
    }

    pub fn cell(&self, column: usize) -> Option<Cell<'a>> {
        (column < self.batch.num_columns()).then(|| Cell {
            array: self.batch.column(column),
            row: self.row,
        })
    }

    /// Out-of-range columns count as null.
    pub fn is_null(&self, column: usize) -> bool {
        self.cell(column).map_or(true, |c| c.is_null())
    }
}

/// A single value with primitive accessors.
///
/// Accessors return `None` for nulls and for types they do not cover.
#[derive(Debug, Clone, Copy)]
pub struct Cell<'a> {
    array: &'a ArrayRef,
    row: usize,
}

impl<'a> Cell<'a> {
    pub fn data_type(&self) -> &'a DataType {
        self.array.data_type()
    }

    pub fn is_null(&self) -> bool {
        self.array.is_null(self.row)
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.is_null() {
            return None;
        }
        let array = self.array;
        match array.data_type() {
            DataType::Int8 => array
                .as_primitive_opt::<Int8Type>()
                .map(|a| i64::from(a.value(self.row))),
            DataType::Int16 => array
                .as_primitive_opt::<Int16Type>()
                .map(|a| i64::from(a.value(self.row))),
            DataType::Int32 => array
                .as_primitive_opt::<Int32Type>()
                .map(|a| i64::from(a.value(self.row))),
            DataType::Int64 => array
                .as_primitive_opt::<Int64Type>()
                .map(|a| a.value(self.row)),
            _ => None,
        }
    }

    /// Floating point value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        if self.is_null() {
            return None;
        }
        let array = self.array;
        match array.data_type() {
            DataType::Float32 => array
                .as_primitive_opt::<Float32Type>()
                .map(|a| f64::from(a.value(self.row))),
            DataType::Float64 => array
                .as_primitive_opt::<Float64Type>()
                .map(|a| a.value(self.row)),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        if self.is_null() {
            return None;
        }
        let array = self.array;
        match array.data_type() {
            DataType::Utf8 => array.as_string_opt::<i32>().map(|a| a.value(self.row)),
            DataType::LargeUtf8 => array.as_string_opt::<i64>().map(|a| a.value(self.row)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if self.is_null() {
            return None;
        }
        self.array.as_boolean_opt().map(|a| a.value(self.row))
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        if self.is_null() {
            return None;
        }
        self.array.as_binary_opt::<i32>().map(|a| a.value(self.row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{BinaryArray, BooleanArray, Float32Array, Int16Array, Int64Array, StringArray};
    use arrow_schema::{Field, Schema};
    use std::sync::Arc;

    fn create_test_batch(ids: Vec<Option<i64>>) -> RecordBatch {
        let rows = ids.len();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("flag", DataType::Boolean, true),
            Field::new("ratio", DataType::Float32, true),
            Field::new("small", DataType::Int16, true),
            Field::new("raw", DataType::Binary, true),
        ]));
        let names: Vec<String> = (0..rows).map(|i| format!("row_{}", i)).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
                Arc::new(BooleanArray::from(vec![true; rows])),
                Arc::new(Float32Array::from(vec![0.5f32; rows])),
                Arc::new(Int16Array::from(vec![7i16; rows])),
                Arc::new(BinaryArray::from_vec(vec![b"ab".as_slice(); rows])),
            ],
        )
        .unwrap()
    }

    /// Cursor whose batches are already queued.
    fn cursor_over(batches: Vec<RecordBatch>) -> RowCursor {
        let mut cursor = RowCursor::new(CursorSource::Empty, None);
        cursor.pending.extend(batches);
        cursor
    }

    #[tokio::test]
    async fn test_cursor_walks_batches_and_skips_empty_ones() {
        let mut cursor = cursor_over(vec![
            create_test_batch(vec![Some(1), Some(2)]),
            create_test_batch(vec![]),
            create_test_batch(vec![Some(3)]),
        ]);

        let mut ids = vec![];
        while cursor.next_row().await.unwrap() {
            ids.push(cursor.current_row().unwrap().cell(0).unwrap().as_i64().unwrap());
        }

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(cursor.rows_read(), 3);
        assert!(cursor.current_row().is_none());
        assert!(!cursor.has_next());
        assert_eq!(cursor.schema().unwrap().field(0).name(), "id");
    }

    #[tokio::test]
    async fn test_cell_accessors() {
        let mut cursor = cursor_over(vec![create_test_batch(vec![None, Some(9)])]);

        assert!(cursor.next_row().await.unwrap());
        let row = cursor.current_row().unwrap();
        assert_eq!(row.num_columns(), 6);
        assert_eq!(row.column_name(1), Some("name"));
        assert_eq!(row.column_name(6), None);
        assert!(row.is_null(0));
        assert!(row.is_null(42));
        assert_eq!(row.cell(0).unwrap().as_i64(), None);
        assert_eq!(row.cell(1).unwrap().as_str(), Some("row_0"));
        assert_eq!(row.cell(2).unwrap().as_bool(), Some(true));
        assert_eq!(row.cell(3).unwrap().as_f64(), Some(0.5));
        assert_eq!(row.cell(4).unwrap().as_i64(), Some(7));
        assert_eq!(row.cell(4).unwrap().as_f64(), Some(7.0));
        assert_eq!(row.cell(5).unwrap().as_bytes(), Some(b"ab".as_slice()));
        assert_eq!(row.cell(1).unwrap().as_i64(), None);

        assert!(cursor.next_row().await.unwrap());
        assert_eq!(cursor.current_row().unwrap().cell(0).unwrap().as_i64(), Some(9));
        assert!(!cursor.next_row().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_cursor_rejects_reads() {
        let mut cursor = cursor_over(vec![create_test_batch(vec![Some(1)])]);
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
        assert!(!cursor.has_next());
        assert!(matches!(cursor.next_row().await, Err(Error::ProviderClosed)));
    }
}
