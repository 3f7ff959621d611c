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

//! Payload decoding for downloaded chunks.
//!
//! A chunk body is an Arrow IPC stream or a legacy columnar row-set, optionally
//! wrapped in an LZ4 frame. The codec and format come from the result manifest.

use crate::error::{Error, Result};
use crate::reader::cloudfetch::rowset_parser::decode_row_set;
use crate::types::manifest::{CompressionCodec, PayloadFormat};
use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use lz4_flex::frame::FrameDecoder;
use std::borrow::Cow;
use std::io::{Cursor, Read};

/// Undo the block codec. Uncompressed data is borrowed, not copied.
pub fn decompress(data: &[u8], codec: CompressionCodec) -> Result<Cow<'_, [u8]>> {
    match codec {
        CompressionCodec::Lz4Frame => {
            let mut decoder = FrameDecoder::new(Cursor::new(data));
            let mut buf = Vec::with_capacity(data.len() * 2);
            decoder
                .read_to_end(&mut buf)
                .map_err(|e| Error::Decompression(format!("LZ4 frame: {}", e)))?;
            Ok(Cow::Owned(buf))
        }
        CompressionCodec::None => Ok(Cow::Borrowed(data)),
    }
}

/// Parse an Arrow IPC stream into its record batches.
///
/// A single chunk may contain multiple batches, or none.
pub fn parse_arrow_stream(data: &[u8], codec: CompressionCodec) -> Result<Vec<RecordBatch>> {
    let bytes = decompress(data, codec)?;

    let reader = StreamReader::try_new(Cursor::new(bytes.as_ref()), None)
        .map_err(|e| Error::Parse(format!("Failed to create Arrow IPC reader: {}", e)))?;

    reader
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Parse(format!("Failed to read Arrow batches: {}", e)))
}

/// Decode a downloaded chunk body according to the manifest's codec and format.
pub fn decode_payload(
    data: &[u8],
    codec: CompressionCodec,
    format: PayloadFormat,
) -> Result<Vec<RecordBatch>> {
    match format {
        PayloadFormat::ArrowStream => parse_arrow_stream(data, codec),
        PayloadFormat::ColumnarRowSet => {
            let bytes = decompress(data, codec)?;
            Ok(vec![decode_row_set(&bytes)?])
        }
    }
}
