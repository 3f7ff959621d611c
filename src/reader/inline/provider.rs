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

//! InlineProvider for handling inline results.

use crate::error::Result;
use crate::reader::cloudfetch::decode_payload;
use crate::types::manifest::{CompressionCodec, PayloadFormat};
use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use std::collections::VecDeque;

/// Provider for inline results.
///
/// Unlike CloudFetch, inline results are:
/// - Always a single chunk
/// - Already present in the response (no download needed)
/// - Typically smaller datasets
///
/// The payload is decoded upfront, either a REST attachment (Arrow IPC) or a
/// legacy inline row-set, using the same codec as downloaded chunks.
#[derive(Debug)]
pub struct InlineProvider {
    batches: VecDeque<RecordBatch>,
    schema: Option<SchemaRef>,
}

impl InlineProvider {
    /// Decode `data` into batches ready for iteration.
    ///
    /// # Errors
    /// - If decompression fails
    /// - If the payload cannot be parsed
    pub fn new(data: &[u8], codec: CompressionCodec, format: PayloadFormat) -> Result<Self> {
        if data.is_empty() {
            tracing::debug!("Empty inline payload, creating empty provider");
            return Ok(Self {
                batches: VecDeque::new(),
                schema: None,
            });
        }

        tracing::debug!(
            "Decoding inline payload: {} bytes, codec={:?}, format={:?}",
            data.len(),
            codec,
            format
        );

        let batches = decode_payload(data, codec, format)?;
        let schema = batches.first().map(|b| b.schema());

        tracing::debug!(
            "Decoded inline payload: {} batches, {} total rows",
            batches.len(),
            batches.iter().map(|b| b.num_rows()).sum::<usize>()
        );

        Ok(Self {
            batches: VecDeque::from(batches),
            schema,
        })
    }

    /// Schema of the first batch, `None` for an empty payload.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn next_batch(&mut self) -> Option<RecordBatch> {
        self.batches.pop_front()
    }

    pub fn has_more(&self) -> bool {
        !self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reader::cloudfetch::encode_row_set;
    use arrow_array::{Int32Array, StringArray};
    use arrow_ipc::writer::StreamWriter;
    use arrow_schema::{DataType, Field, Schema};
    use lz4_flex::frame::FrameEncoder;
    use std::io::Write;
    use std::sync::Arc;

    fn create_test_arrow_ipc(batches: &[RecordBatch]) -> Vec<u8> {
        let schema = batches[0].schema();
        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buffer, &schema).unwrap();
            for batch in batches {
                writer.write(batch).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer
    }

    fn create_test_batch(num_rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
        ]));

        let ids: Vec<i32> = (0..num_rows as i32).collect();
        let names: Vec<String> = (0..num_rows).map(|i| format!("name_{}", i)).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn lz4(data: &[u8]) -> Vec<u8> {
        let mut compressed = Vec::new();
        let mut encoder = FrameEncoder::new(&mut compressed);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
        compressed
    }

    #[test]
    fn test_inline_provider_with_uncompressed_data() {
        let ipc_data = create_test_arrow_ipc(&[create_test_batch(100)]);

        let mut provider =
            InlineProvider::new(&ipc_data, CompressionCodec::None, PayloadFormat::ArrowStream)
                .unwrap();

        let schema = provider.schema().unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.field(0).name(), "id");

        assert!(provider.has_more());
        let batch = provider.next_batch().unwrap();
        assert_eq!(batch.num_rows(), 100);

        assert!(!provider.has_more());
        assert!(provider.next_batch().is_none());
    }

    #[test]
    fn test_inline_provider_with_compressed_data() {
        let ipc_data = create_test_arrow_ipc(&[create_test_batch(50), create_test_batch(30)]);

        let mut provider = InlineProvider::new(
            &lz4(&ipc_data),
            CompressionCodec::Lz4Frame,
            PayloadFormat::ArrowStream,
        )
        .unwrap();

        assert_eq!(provider.next_batch().unwrap().num_rows(), 50);
        assert_eq!(provider.next_batch().unwrap().num_rows(), 30);
        assert!(provider.next_batch().is_none());
    }

    #[test]
    fn test_inline_provider_with_row_set() {
        let encoded = encode_row_set(&create_test_batch(7)).unwrap();

        let mut provider = InlineProvider::new(
            &lz4(&encoded),
            CompressionCodec::Lz4Frame,
            PayloadFormat::ColumnarRowSet,
        )
        .unwrap();

        let batch = provider.next_batch().unwrap();
        assert_eq!(batch.num_rows(), 7);
        assert_eq!(batch.schema().field(1).name(), "name");
    }

    #[test]
    fn test_inline_provider_with_empty_data() {
        let provider =
            InlineProvider::new(&[], CompressionCodec::None, PayloadFormat::ArrowStream).unwrap();

        assert!(provider.schema().is_none());
        assert!(!provider.has_more());
    }

    #[test]
    fn test_inline_provider_with_invalid_data() {
        let result = InlineProvider::new(
            b"this is not valid arrow ipc data",
            CompressionCodec::None,
            PayloadFormat::ArrowStream,
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
