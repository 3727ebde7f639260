//! Sealed, compressed groups of records

use super::codec;
use crate::core::{LogLevel, LogRecord, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Earliest and latest record timestamps in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A sealed batch
///
/// `compressed_payload` is the gzip of the JSON array of the batch's
/// records, in the order they were added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub log_count: usize,
    pub uncompressed_size: usize,
    pub compressed_size: usize,
    /// `compressed_size / uncompressed_size`
    pub compression_ratio: f64,
    pub compressed_payload: Vec<u8>,
    /// Distinct levels present, lowest first
    pub severities: Vec<LogLevel>,
    pub time_range: TimeRange,
}

impl Batch {
    /// Seal `records` around an already compressed payload
    ///
    /// `records` must not be empty.
    pub(crate) fn seal(records: &[LogRecord], compressed: Vec<u8>, uncompressed_size: usize) -> Self {
        let timestamp = Utc::now();
        let severities: BTreeSet<LogLevel> = records.iter().map(|r| r.level).collect();

        let start = records.iter().map(|r| r.timestamp).min().unwrap_or(timestamp);
        let end = records.iter().map(|r| r.timestamp).max().unwrap_or(timestamp);

        let compressed_size = compressed.len();
        let compression_ratio = if uncompressed_size == 0 {
            0.0
        } else {
            compressed_size as f64 / uncompressed_size as f64
        };

        Self {
            id: format!(
                "batch-{}-{:08x}",
                timestamp.timestamp_millis(),
                rand::random::<u32>()
            ),
            timestamp,
            log_count: records.len(),
            uncompressed_size,
            compressed_size,
            compression_ratio,
            compressed_payload: compressed,
            severities: severities.into_iter().collect(),
            time_range: TimeRange { start, end },
        }
    }

    /// The serialized record bytes, exactly as they were before compression
    pub fn decompress(&self) -> Result<Vec<u8>> {
        codec::gunzip(&self.compressed_payload)
    }

    /// Decode the batch back into its records
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let bytes = self.decompress()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
