//! Gzip encoding for batch payloads

use crate::core::{PipelineError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip `data` at `level` (0-9)
pub fn gzip(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::new(level.min(9)),
    );
    encoder
        .write_all(data)
        .map_err(|e| PipelineError::compression("gzip", e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PipelineError::compression("gzip", e.to_string()))
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::compression("gunzip", e.to_string()))?;
    Ok(out)
}
