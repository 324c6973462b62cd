//! Parquet encoding of candidate snapshots.
//!
//! Every field is a non-null UTF-8 column; `collected_at` is RFC 3339.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{AppError, Result};
use crate::models::Candidate;

const COLUMNS: [&str; 7] = [
    "source",
    "title",
    "url",
    "raw_content",
    "published_at",
    "collected_at",
    "content_hash",
];

fn schema() -> SchemaRef {
    let fields: Vec<Field> = COLUMNS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, false))
        .collect();
    Arc::new(Schema::new(fields))
}

fn strings<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

pub fn encode(candidates: &[Candidate]) -> Result<Vec<u8>> {
    let collected: Vec<String> = candidates.iter().map(|c| c.collected_at.to_rfc3339()).collect();

    let columns = vec![
        strings(candidates.iter().map(|c| c.source.as_str())),
        strings(candidates.iter().map(|c| c.title.as_str())),
        strings(candidates.iter().map(|c| c.url.as_str())),
        strings(candidates.iter().map(|c| c.raw_content.as_str())),
        strings(candidates.iter().map(|c| c.published_at.as_str())),
        strings(collected.iter().map(String::as_str)),
        strings(candidates.iter().map(|c| c.content_hash.as_str())),
    ];
    let batch = RecordBatch::try_new(schema(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}

pub fn decode(bytes: Vec<u8>) -> Result<Vec<Candidate>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?.build()?;

    let mut candidates = Vec::new();
    for batch in reader {
        let batch = batch?;
        let source = column(&batch, "source")?;
        let title = column(&batch, "title")?;
        let url = column(&batch, "url")?;
        let raw_content = column(&batch, "raw_content")?;
        let published_at = column(&batch, "published_at")?;
        let collected_at = column(&batch, "collected_at")?;
        let content_hash = column(&batch, "content_hash")?;

        for i in 0..batch.num_rows() {
            let collected = DateTime::parse_from_rfc3339(collected_at.value(i))
                .map_err(|e| AppError::Archive(format!("bad collected_at in row {}: {}", i, e)))?
                .with_timezone(&Utc);

            candidates.push(Candidate {
                source: source.value(i).to_string(),
                title: title.value(i).to_string(),
                url: url.value(i).to_string(),
                raw_content: raw_content.value(i).to_string(),
                published_at: published_at.value(i).to_string(),
                collected_at: collected,
                content_hash: content_hash.value(i).to_string(),
            });
        }
    }

    Ok(candidates)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| AppError::Archive(format!("missing column {}", name)))?;

    if array.null_count() > 0 {
        return Err(AppError::Archive(format!("null values in column {}", name)));
    }

    array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AppError::Archive(format!("column {} is not utf8", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_encoding() {
        let candidates = vec![
            Candidate::new(
                "네이버 D2",
                "대규모 트래픽 처리",
                "https://d2.naver.com/helloworld/1",
                "Kafka 기반 파이프라인을 소개합니다.",
                "Tue, 10 Feb 2026 08:30:00 +0000",
                Utc::now(),
            ),
            Candidate::new("네이버 D2", "Second", "https://d2.naver.com/helloworld/2", "", "", Utc::now()),
        ];

        let bytes = encode(&candidates).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");

        let decoded = decode(bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].content_hash, candidates[0].content_hash);
        assert_eq!(decoded[0].raw_content, candidates[0].raw_content);
        assert_eq!(decoded[1].published_at, "");
        assert_eq!(
            decoded[0].collected_at.timestamp_micros(),
            candidates[0].collected_at.timestamp_micros()
        );
    }

    #[test]
    fn rejects_non_parquet_bytes() {
        assert!(decode(b"definitely not parquet".to_vec()).is_err());
    }
}
