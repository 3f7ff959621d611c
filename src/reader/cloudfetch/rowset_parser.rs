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

//! Legacy columnar row-set codec.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "DBRS" | version: u8 = 1 | column_count: u32 | row_count: u32
//! per column:
//!   name_len: u32 | name: utf8
//!   type_tag: u8
//!   bitmap_len: u32 | null bitmap (LSB first, bit set = null)
//!   row_count values: fixed width, or u32 length + bytes
//! ```
//!
//! Null rows still carry a placeholder value so that every column can be
//! read without consulting the bitmap.

use crate::error::{Error, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int16Type, Int32Type, Int64Type, Int8Type};
use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, RecordBatch, RecordBatchOptions, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"DBRS";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Bool = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Float64 = 5,
    Utf8 = 6,
    Binary = 7,
}

impl ColumnType {
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Bool,
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Float64,
            6 => Self::Utf8,
            7 => Self::Binary,
            other => return Err(Error::Parse(format!("unknown row-set type tag {}", other))),
        })
    }

    fn from_data_type(data_type: &DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Boolean => Self::Bool,
            DataType::Int8 => Self::Int8,
            DataType::Int16 => Self::Int16,
            DataType::Int32 => Self::Int32,
            DataType::Int64 => Self::Int64,
            DataType::Float64 => Self::Float64,
            DataType::Utf8 => Self::Utf8,
            DataType::Binary => Self::Binary,
            other => {
                return Err(Error::Parse(format!(
                    "type {} cannot be encoded as a row-set column",
                    other
                )))
            }
        })
    }

    fn data_type(self) -> DataType {
        match self {
            Self::Bool => DataType::Boolean,
            Self::Int8 => DataType::Int8,
            Self::Int16 => DataType::Int16,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::Float64 => DataType::Float64,
            Self::Utf8 => DataType::Utf8,
            Self::Binary => DataType::Binary,
        }
    }

    fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Utf8 | Self::Binary => None,
        }
    }
}

fn truncated(what: &str) -> Error {
    Error::Parse(format!("row-set truncated while reading {}", what))
}

fn ensure(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    Ok(())
}

fn read_u32(buf: &mut &[u8], what: &str) -> Result<usize> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32_le() as usize)
}

fn take<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    ensure(buf, len, what)?;
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Decode one row-set into a record batch with nullable columns.
pub fn decode_row_set(data: &[u8]) -> Result<RecordBatch> {
    let mut buf = data;
    ensure(buf, HEADER_LEN, "header")?;

    if &buf[..4] != MAGIC {
        return Err(Error::Parse("row-set has a bad magic".to_string()));
    }
    buf.advance(4);
    let version = buf.get_u8();
    if version != VERSION {
        return Err(Error::Parse(format!(
            "unsupported row-set version {}",
            version
        )));
    }
    let column_count = buf.get_u32_le() as usize;
    let row_count = buf.get_u32_le() as usize;

    let mut fields = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();

    for _ in 0..column_count {
        let name_len = read_u32(&mut buf, "column name length")?;
        let name = std::str::from_utf8(take(&mut buf, name_len, "column name")?)
            .map_err(|e| Error::Parse(format!("column name is not UTF-8: {}", e)))?;

        ensure(buf, 1, "type tag")?;
        let column_type = ColumnType::from_tag(buf.get_u8())?;

        let bitmap_len = read_u32(&mut buf, "null bitmap length")?;
        let bitmap = take(&mut buf, bitmap_len, "null bitmap")?;
        if bitmap.len() < row_count.div_ceil(8) {
            return Err(Error::Parse(format!(
                "null bitmap of column '{}' covers fewer than {} rows",
                name, row_count
            )));
        }
        let is_null = |row: usize| bitmap[row / 8] & (1 << (row % 8)) != 0;

        if let Some(width) = column_type.fixed_width() {
            let len = row_count
                .checked_mul(width)
                .ok_or_else(|| truncated("column values"))?;
            ensure(buf, len, "column values")?;
        }

        macro_rules! fixed {
            ($array:ty, $get:ident) => {{
                let values: $array = (0..row_count)
                    .map(|row| {
                        let value = buf.$get();
                        (!is_null(row)).then_some(value)
                    })
                    .collect();
                Arc::new(values) as ArrayRef
            }};
        }

        let array = match column_type {
            ColumnType::Bool => {
                let values: BooleanArray = (0..row_count)
                    .map(|row| {
                        let value = buf.get_u8() != 0;
                        (!is_null(row)).then_some(value)
                    })
                    .collect();
                Arc::new(values) as ArrayRef
            }
            ColumnType::Int8 => fixed!(Int8Array, get_i8),
            ColumnType::Int16 => fixed!(Int16Array, get_i16_le),
            ColumnType::Int32 => fixed!(Int32Array, get_i32_le),
            ColumnType::Int64 => fixed!(Int64Array, get_i64_le),
            ColumnType::Float64 => fixed!(Float64Array, get_f64_le),
            ColumnType::Utf8 => {
                let mut values = Vec::with_capacity(row_count.min(buf.len()));
                for row in 0..row_count {
                    let len = read_u32(&mut buf, "string length")?;
                    let bytes = take(&mut buf, len, "string value")?;
                    let value = std::str::from_utf8(bytes).map_err(|e| {
                        Error::Parse(format!("column '{}' row {} is not UTF-8: {}", name, row, e))
                    })?;
                    values.push((!is_null(row)).then_some(value));
                }
                Arc::new(StringArray::from(values)) as ArrayRef
            }
            ColumnType::Binary => {
                let mut values = Vec::with_capacity(row_count.min(buf.len()));
                for row in 0..row_count {
                    let len = read_u32(&mut buf, "binary length")?;
                    let bytes = take(&mut buf, len, "binary value")?;
                    values.push((!is_null(row)).then_some(bytes));
                }
                Arc::new(BinaryArray::from(values)) as ArrayRef
            }
        };

        fields.push(Field::new(name, column_type.data_type(), true));
        columns.push(array);
    }

    if buf.has_remaining() {
        return Err(Error::Parse(format!(
            "{} trailing bytes after row-set",
            buf.remaining()
        )));
    }

    let options = RecordBatchOptions::new().with_row_count(Some(row_count));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)
        .map_err(|e| Error::Parse(format!("row-set does not form a valid batch: {}", e)))
}

fn put_len(out: &mut BytesMut, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Parse(format!("{} too large for a row-set", what)))?;
    out.put_u32_le(len);
    Ok(())
}

fn mismatch(name: &str) -> Error {
    Error::Parse(format!("column '{}' does not match its declared type", name))
}

/// Encode a record batch in the row-set layout read by [`decode_row_set`].
pub fn encode_row_set(batch: &RecordBatch) -> Result<Vec<u8>> {
    let rows = batch.num_rows();
    let mut out = BytesMut::new();
    out.put_slice(MAGIC);
    out.put_u8(VERSION);
    put_len(&mut out, batch.num_columns(), "column count")?;
    put_len(&mut out, rows, "row count")?;

    let schema = batch.schema();
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let name = field.name();
        let column_type = ColumnType::from_data_type(field.data_type())?;

        put_len(&mut out, name.len(), "column name")?;
        out.put_slice(name.as_bytes());
        out.put_u8(column_type as u8);

        let mut bitmap = vec![0u8; rows.div_ceil(8)];
        for row in 0..rows {
            if column.is_null(row) {
                bitmap[row / 8] |= 1 << (row % 8);
            }
        }
        put_len(&mut out, bitmap.len(), "null bitmap")?;
        out.put_slice(&bitmap);

        macro_rules! put_fixed {
            ($type:ty, $put:ident) => {{
                let array = column
                    .as_primitive_opt::<$type>()
                    .ok_or_else(|| mismatch(name))?;
                for row in 0..rows {
                    out.$put(array.value(row));
                }
            }};
        }

        match column_type {
            ColumnType::Bool => {
                let array = column.as_boolean_opt().ok_or_else(|| mismatch(name))?;
                for row in 0..rows {
                    out.put_u8(u8::from(array.value(row)));
                }
            }
            ColumnType::Int8 => put_fixed!(Int8Type, put_i8),
            ColumnType::Int16 => put_fixed!(Int16Type, put_i16_le),
            ColumnType::Int32 => put_fixed!(Int32Type, put_i32_le),
            ColumnType::Int64 => put_fixed!(Int64Type, put_i64_le),
            ColumnType::Float64 => put_fixed!(Float64Type, put_f64_le),
            ColumnType::Utf8 => {
                let array = column
                    .as_string_opt::<i32>()
                    .ok_or_else(|| mismatch(name))?;
                for row in 0..rows {
                    let value = if array.is_null(row) { "" } else { array.value(row) };
                    put_len(&mut out, value.len(), "string value")?;
                    out.put_slice(value.as_bytes());
                }
            }
            ColumnType::Binary => {
                let array = column
                    .as_binary_opt::<i32>()
                    .ok_or_else(|| mismatch(name))?;
                for row in 0..rows {
                    let value: &[u8] = if array.is_null(row) { &[] } else { array.value(row) };
                    put_len(&mut out, value.len(), "binary value")?;
                    out.put_slice(value);
                }
            }
        }
    }

    Ok(out.to_vec())
}
