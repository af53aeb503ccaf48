//! Wire encoding for batches
//!
//! A batch travels as `base64(gzip(json_array))`. The gzip header carries a
//! zero modification time so identical input always encodes identically.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};

use crate::error::{Error, Result};

/// Compress and encode a raw batch payload.
pub fn encode(raw: &str) -> Result<String> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder
        .write_all(raw.as_bytes())
        .map_err(|e| Error::Data(format!("gzip write failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::Data(format!("gzip finish failed: {}", e)))?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Inverse of [`encode`].
pub fn decode(encoded: &str) -> Result<String> {
    let compressed = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Data(format!("invalid base64: {}", e)))?;
    let mut raw = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut raw)
        .map_err(|e| Error::Data(format!("invalid gzip stream: {}", e)))?;
    Ok(raw)
}
